//! Allocator bridge: `SDL_malloc`/`SDL_calloc`/`SDL_realloc`/`SDL_free` hooks.
//!
//! Once installed, every allocation SDL makes is served by the process-wide
//! [`AllocationTable`](sdl3_bridge_membrane::AllocationTable), so the host
//! allocator owns native memory and [`stats`] sees all of it.
//!
//! Install before SDL allocates anything and uninstall after it has released
//! everything; SDL forbids switching allocators while allocations are live.

use std::ffi::{c_int, c_void};
use std::sync::atomic::Ordering;

use sdl3_bridge_membrane::{FreeResult, TableStats};

use crate::bridge_state::{INSTALLED, global_table};
use crate::error::{BridgeError, Result, check_bool};
use crate::native::{MemoryFunctions, NativeRuntime};
use crate::structured_log::{self, Level, LogEntry};

// ---------------------------------------------------------------------------
// hooks
// ---------------------------------------------------------------------------

/// `SDL_malloc_func`. Zero bytes yields null.
///
/// # Safety
///
/// The result must be released through [`bridge_free`] or [`bridge_realloc`].
pub unsafe extern "C" fn bridge_malloc(size: usize) -> *mut c_void {
    match global_table().allocate(size) {
        Some(ptr) => ptr.as_ptr().cast(),
        None => std::ptr::null_mut(),
    }
}

/// `SDL_calloc_func`. Overflowing `nmemb * size` yields null.
///
/// # Safety
///
/// Same contract as [`bridge_malloc`].
pub unsafe extern "C" fn bridge_calloc(nmemb: usize, size: usize) -> *mut c_void {
    match global_table().allocate_zeroed(nmemb, size) {
        Some(ptr) => ptr.as_ptr().cast(),
        None => std::ptr::null_mut(),
    }
}

/// `SDL_realloc_func`.
///
/// # Safety
///
/// `mem` is null or a block from these hooks that has not been released.
pub unsafe extern "C" fn bridge_realloc(mem: *mut c_void, size: usize) -> *mut c_void {
    match global_table().reallocate(mem.cast(), size) {
        Some(ptr) => ptr.as_ptr().cast(),
        None => std::ptr::null_mut(),
    }
}

/// `SDL_free_func`. Null and addresses the bridge never issued are ignored.
///
/// # Safety
///
/// `mem` must not be used after this call.
pub unsafe extern "C" fn bridge_free(mem: *mut c_void) {
    if global_table().free(mem.cast()) == FreeResult::Foreign {
        structured_log::log_with(Level::Debug, || {
            LogEntry::new(Level::Debug, "foreign_free")
                .with_symbol("bridge_free")
                .with_addr(mem.addr())
        });
    }
}

/// The four hooks as one set.
#[must_use]
pub fn bridge_memory_functions() -> MemoryFunctions {
    MemoryFunctions {
        malloc: bridge_malloc,
        calloc: bridge_calloc,
        realloc: bridge_realloc,
        free: bridge_free,
    }
}

/// True when `functions` is exactly the bridge's set.
#[must_use]
pub fn is_bridge(functions: &MemoryFunctions) -> bool {
    functions.same_as(&bridge_memory_functions())
}

// ---------------------------------------------------------------------------
// install / uninstall
// ---------------------------------------------------------------------------

/// Blocks native code still held when the bridge was uninstalled.
///
/// They stay tracked by the bridge table; releasing them through the
/// restored allocator would hand foreign memory to SDL's built-in `free`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub outstanding_blocks: usize,
    pub outstanding_bytes: usize,
    /// SDL's own live-allocation count at uninstall (`SDL_GetNumAllocations`);
    /// `None` when the library does not count.
    pub native_allocations: Option<c_int>,
}

/// Route SDL's allocator through the bridge.
///
/// # Safety
///
/// SDL must have no live allocations made by the previous allocator set.
pub unsafe fn install(runtime: &dyn NativeRuntime) -> Result<()> {
    if INSTALLED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(BridgeError::AllocatorAlreadyInstalled);
    }

    runtime.clear_error();
    // SAFETY: forwarded from the caller.
    let ok = unsafe { runtime.set_memory_functions(bridge_memory_functions()) };
    if let Err(err) = check_bool(ok, "SDL_SetMemoryFunctions", runtime) {
        INSTALLED.store(false, Ordering::Release);
        return Err(err);
    }

    structured_log::log_with(Level::Info, || {
        LogEntry::new(Level::Info, "allocator_installed").with_symbol("SDL_SetMemoryFunctions")
    });
    Ok(())
}

/// Restore SDL's built-in allocator.
///
/// # Safety
///
/// SDL must have released every block it allocated through the bridge.
/// Anything still outstanding is reported and kept alive, never freed.
pub unsafe fn uninstall(runtime: &dyn NativeRuntime) -> Result<UninstallReport> {
    if !INSTALLED.load(Ordering::Acquire) {
        return Err(BridgeError::AllocatorNotInstalled);
    }

    let original = runtime.original_memory_functions()?;
    let native_allocations = runtime.allocation_count();
    runtime.clear_error();
    // SAFETY: forwarded from the caller.
    let ok = unsafe { runtime.set_memory_functions(original) };
    check_bool(ok, "SDL_SetMemoryFunctions", runtime)?;
    INSTALLED.store(false, Ordering::Release);

    let TableStats {
        live_blocks,
        tracked_bytes,
    } = global_table().stats();
    let report = UninstallReport {
        outstanding_blocks: live_blocks,
        outstanding_bytes: tracked_bytes,
        native_allocations,
    };

    if live_blocks > 0 {
        structured_log::log_with(Level::Warn, || {
            let entry = LogEntry::new(Level::Warn, "allocator_outstanding_blocks")
                .with_outstanding(live_blocks, tracked_bytes);
            match native_allocations {
                Some(count) => entry.with_details(serde_json::json!({ "native_allocations": count })),
                None => entry,
            }
        });
    }
    structured_log::log_with(Level::Info, || {
        LogEntry::new(Level::Info, "allocator_uninstalled").with_symbol("SDL_SetMemoryFunctions")
    });
    Ok(report)
}

/// True between a successful [`install`] and [`uninstall`].
#[must_use]
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::Acquire)
}

/// Live blocks and reserved bytes currently held through the bridge.
#[must_use]
pub fn stats() -> TableStats {
    global_table().stats()
}

/// The allocator set SDL is using right now, and whether it is the bridge.
pub fn current_memory_functions(runtime: &dyn NativeRuntime) -> Result<(MemoryFunctions, bool)> {
    let active = runtime.memory_functions()?;
    let bridged = is_bridge(&active);
    Ok((active, bridged))
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global table is shared with other tests in this binary, so these
    // check per-address state rather than totals.

    #[test]
    fn malloc_zero_is_null() {
        // SAFETY: size 0 allocates nothing.
        assert!(unsafe { bridge_malloc(0) }.is_null());
    }

    #[test]
    fn hooks_track_and_release_blocks() {
        // SAFETY: every block below is released exactly once through the hooks.
        unsafe {
            let p = bridge_malloc(10);
            assert!(!p.is_null());
            let record = global_table().lookup(p.addr()).expect("tracked");
            assert_eq!(record.size, 10);

            p.cast::<u8>().write_bytes(0x3C, 10);
            let q = bridge_realloc(p, 100);
            assert!(!q.is_null());
            assert_eq!(global_table().lookup(q.addr()).expect("tracked").size, 100);
            assert!(std::slice::from_raw_parts(q.cast::<u8>(), 10).iter().all(|&b| b == 0x3C));

            bridge_free(q);
            assert!(!global_table().contains(q.addr()));
        }
    }

    #[test]
    fn calloc_zeroes_and_rejects_overflow() {
        // SAFETY: the block is 32 bytes and released below.
        unsafe {
            assert!(bridge_calloc(usize::MAX, 2).is_null());
            let p = bridge_calloc(4, 8).cast::<u8>();
            assert!(std::slice::from_raw_parts(p, 32).iter().all(|&b| b == 0));
            bridge_free(p.cast());
        }
    }

    #[test]
    fn free_of_unknown_address_is_ignored() {
        let mut local = 0u64;
        // SAFETY: foreign addresses are never dereferenced by the hook.
        unsafe {
            bridge_free(std::ptr::null_mut());
            bridge_free(std::ptr::addr_of_mut!(local).cast());
        }
        assert_eq!(local, 0);
    }

    #[test]
    fn bridge_set_is_recognised() {
        assert!(is_bridge(&bridge_memory_functions()));
    }
}
