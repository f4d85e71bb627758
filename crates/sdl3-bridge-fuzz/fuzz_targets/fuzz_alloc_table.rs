#![no_main]
use libfuzzer_sys::fuzz_target;
use sdl3_bridge_membrane::{AllocationTable, FreeResult, GRANULARITY};

// Each 4-byte chunk is one operation: [op, size_lo, size_hi, slot].
fuzz_target!(|data: &[u8]| {
    let table = AllocationTable::new();
    let mut live: Vec<(*mut u8, usize)> = Vec::new();

    for chunk in data.chunks_exact(4) {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize;
        let slot = chunk[3] as usize;

        match chunk[0] % 4 {
            0 => {
                if let Some(ptr) = table.allocate(size) {
                    live.push((ptr.as_ptr(), size));
                }
            }
            1 => {
                if let Some(ptr) = table.allocate_zeroed(size, chunk[3] as usize) {
                    live.push((ptr.as_ptr(), size * chunk[3] as usize));
                }
            }
            2 if !live.is_empty() => {
                let (ptr, _) = live.swap_remove(slot % live.len());
                if let Some(new) = table.reallocate(ptr, size) {
                    live.push((new.as_ptr(), size));
                }
            }
            _ if !live.is_empty() => {
                let (ptr, _) = live.swap_remove(slot % live.len());
                assert_eq!(table.free(ptr), FreeResult::Released);
                assert_eq!(table.free(ptr), FreeResult::Foreign);
            }
            _ => {}
        }

        let stats = table.stats();
        assert_eq!(stats.live_blocks, live.len());
        let expected: usize = live.iter().map(|&(_, s)| s.next_multiple_of(GRANULARITY)).sum();
        assert_eq!(stats.tracked_bytes, expected);
    }

    for (ptr, _) in live {
        assert_eq!(table.free(ptr), FreeResult::Released);
    }
});
