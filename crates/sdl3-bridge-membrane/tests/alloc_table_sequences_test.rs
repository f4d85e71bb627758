use sdl3_bridge_membrane::{AllocationTable, FreeResult, GRANULARITY, TableStats};
use std::sync::Arc;
use std::thread;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

fn stamp(ptr: *mut u8, len: usize, tag: u8) {
    // SAFETY: callers pass live blocks of at least `len` bytes.
    unsafe { std::ptr::write_bytes(ptr, tag, len) };
}

fn check_stamp(ptr: *mut u8, len: usize, tag: u8) -> bool {
    // SAFETY: callers pass live blocks of at least `len` bytes.
    unsafe { std::slice::from_raw_parts(ptr, len) }
        .iter()
        .all(|&b| b == tag)
}

#[test]
fn deterministic_sequences_keep_bookkeeping_exact() {
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 3_000;
    const SLOTS: usize = 32;

    for seed in SEEDS {
        let table = AllocationTable::new();
        let mut rng = XorShift64::new(seed);
        let mut ptrs = [std::ptr::null_mut::<u8>(); SLOTS];
        let mut sizes = [0_usize; SLOTS];

        for step in 0..STEPS {
            let idx = rng.gen_range_usize(0, SLOTS - 1);
            let tag = (idx as u8).wrapping_add(1);
            match rng.gen_range_usize(0, 99) {
                // malloc (biased)
                0..=39 => {
                    if !ptrs[idx].is_null() {
                        continue;
                    }
                    let size = rng.gen_range_usize(1, 1024);
                    let ptr = table.allocate(size).expect("alloc").as_ptr();
                    stamp(ptr, size, tag);
                    ptrs[idx] = ptr;
                    sizes[idx] = size;
                }
                // realloc
                40..=69 => {
                    if ptrs[idx].is_null() {
                        continue;
                    }
                    let new_size = rng.gen_range_usize(1, 2048);
                    let old_size = sizes[idx];
                    let ptr = table
                        .reallocate(ptrs[idx], new_size)
                        .expect("realloc")
                        .as_ptr();
                    assert!(
                        check_stamp(ptr, old_size.min(new_size), tag),
                        "seed={seed} step={step}: realloc lost contents"
                    );
                    stamp(ptr, new_size, tag);
                    ptrs[idx] = ptr;
                    sizes[idx] = new_size;
                }
                // free
                _ => {
                    let expected = if ptrs[idx].is_null() {
                        FreeResult::Null
                    } else {
                        FreeResult::Released
                    };
                    assert_eq!(table.free(ptrs[idx]), expected, "seed={seed} step={step}");
                    ptrs[idx] = std::ptr::null_mut();
                    sizes[idx] = 0;
                }
            }

            let live: Vec<usize> = (0..SLOTS).filter(|&i| !ptrs[i].is_null()).collect();
            let expected_bytes: usize = live
                .iter()
                .map(|&i| sizes[i].next_multiple_of(GRANULARITY))
                .sum();
            assert_eq!(
                table.stats(),
                TableStats {
                    live_blocks: live.len(),
                    tracked_bytes: expected_bytes,
                },
                "seed={seed} step={step}: stats drifted"
            );
            for &i in &live {
                let record = table.lookup(ptrs[i] as usize).expect("live block tracked");
                assert_eq!(record.size, sizes[i], "seed={seed} step={step}");
                assert!(check_stamp(ptrs[i], sizes[i], (i as u8).wrapping_add(1)));
            }
        }

        for ptr in ptrs.into_iter().filter(|p| !p.is_null()) {
            assert_eq!(table.free(ptr), FreeResult::Released);
        }
        assert_eq!(table.stats(), TableStats::default());
    }
}

#[test]
fn concurrent_threads_on_disjoint_blocks_do_not_corrupt_table() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 2_000;

    let table = Arc::new(AllocationTable::new());
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let mut rng = XorShift64::new(0x9E37_79B9 ^ t as u64);
                let tag = t as u8 + 1;
                let mut live: Vec<(*mut u8, usize)> = Vec::new();
                for _ in 0..ROUNDS {
                    let size = rng.gen_range_usize(1, 512);
                    let ptr = table.allocate(size).expect("alloc").as_ptr();
                    stamp(ptr, size, tag);
                    live.push((ptr, size));

                    if rng.gen_range_usize(0, 2) == 0 {
                        let (p, s) = live.swap_remove(rng.gen_range_usize(0, live.len() - 1));
                        let grown = s + rng.gen_range_usize(1, 256);
                        let q = table.reallocate(p, grown).expect("realloc").as_ptr();
                        assert!(check_stamp(q, s, tag));
                        stamp(q, grown, tag);
                        live.push((q, grown));
                    }
                    if live.len() > 16 {
                        let (p, s) = live.swap_remove(0);
                        assert!(check_stamp(p, s, tag));
                        assert_eq!(table.free(p), FreeResult::Released);
                    }
                }
                for (p, _) in live {
                    assert_eq!(table.free(p), FreeResult::Released);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }
    assert_eq!(table.stats(), TableStats::default());
}
