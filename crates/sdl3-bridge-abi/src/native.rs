//! Seam between the bridge and the native library.
//!
//! Everything the bridge itself needs from SDL goes through [`NativeRuntime`]:
//! last-error text and the memory-function table. The `link-sdl3` feature
//! implements it over the real symbols; tests implement it with a double.

use std::ffi::{c_int, c_void};

use crate::error::{BridgeError, ErrorSource, Result};

/// `SDL_malloc_func`
pub type MallocFn = unsafe extern "C" fn(size: usize) -> *mut c_void;
/// `SDL_calloc_func`
pub type CallocFn = unsafe extern "C" fn(nmemb: usize, size: usize) -> *mut c_void;
/// `SDL_realloc_func`
pub type ReallocFn = unsafe extern "C" fn(mem: *mut c_void, size: usize) -> *mut c_void;
/// `SDL_free_func`
pub type FreeFn = unsafe extern "C" fn(mem: *mut c_void);

/// A complete allocator function set. All four are always present together.
#[derive(Debug, Clone, Copy)]
pub struct MemoryFunctions {
    pub malloc: MallocFn,
    pub calloc: CallocFn,
    pub realloc: ReallocFn,
    pub free: FreeFn,
}

impl MemoryFunctions {
    /// Assemble a set from the nullable pointers the native getters fill in.
    pub fn from_parts(
        malloc: Option<MallocFn>,
        calloc: Option<CallocFn>,
        realloc: Option<ReallocFn>,
        free: Option<FreeFn>,
    ) -> Result<Self> {
        Ok(Self {
            malloc: malloc.ok_or(BridgeError::MissingMemoryFunction { which: "malloc" })?,
            calloc: calloc.ok_or(BridgeError::MissingMemoryFunction { which: "calloc" })?,
            realloc: realloc.ok_or(BridgeError::MissingMemoryFunction { which: "realloc" })?,
            free: free.ok_or(BridgeError::MissingMemoryFunction { which: "free" })?,
        })
    }

    /// True when both sets name the same four functions.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.malloc as usize == other.malloc as usize
            && self.calloc as usize == other.calloc as usize
            && self.realloc as usize == other.realloc as usize
            && self.free as usize == other.free as usize
    }
}

/// What the bridge needs from the native library.
pub trait NativeRuntime: ErrorSource + Send + Sync {
    /// `SDL_ClearError`.
    fn clear_error(&self);

    /// Active allocator set (`SDL_GetMemoryFunctions`).
    fn memory_functions(&self) -> Result<MemoryFunctions>;

    /// Built-in allocator set (`SDL_GetOriginalMemoryFunctions`).
    fn original_memory_functions(&self) -> Result<MemoryFunctions>;

    /// Replace the active allocator set (`SDL_SetMemoryFunctions`).
    ///
    /// # Safety
    ///
    /// Memory allocated under the previous set must not be released through
    /// the new one. Callers ensure no native allocation is outstanding.
    unsafe fn set_memory_functions(&self, functions: MemoryFunctions) -> bool;

    /// Outstanding native allocations (`SDL_GetNumAllocations`); `None` when
    /// the library was built without allocation counting.
    fn allocation_count(&self) -> Option<c_int>;
}
