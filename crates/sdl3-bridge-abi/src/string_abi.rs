//! Host string <-> C string conversion at the native boundary.
//!
//! Outbound: [`ScopedCStr`] measures the host string, encodes it with a
//! trailing NUL into inline storage (short strings) or a heap buffer, and
//! releases that buffer when it goes out of scope. Strings with an interior
//! NUL cannot cross and are rejected.
//!
//! Inbound: `from_native*` decode borrowed C strings without taking
//! ownership; [`NativeOwnedString`] adopts a string the native side
//! allocated and releases it with the native `free`.

use std::ffi::{CStr, c_char};
use std::fmt;
use std::ptr::NonNull;

use crate::error::{BridgeError, Result};
use crate::native::{FreeFn, NativeRuntime};

/// Bytes available inline, including the terminating NUL.
pub const INLINE_CAPACITY: usize = 256;

enum Storage {
    Inline([u8; INLINE_CAPACITY]),
    Heap(Box<[u8]>),
}

/// A NUL-terminated copy of a host string, valid for as long as it lives.
pub struct ScopedCStr {
    storage: Storage,
    len: usize,
}

impl ScopedCStr {
    /// Encode `text`. Fails with [`BridgeError::InteriorNul`] if it contains a
    /// NUL byte.
    pub fn new(text: &str) -> Result<Self> {
        let bytes = text.as_bytes();
        if let Some(position) = bytes.iter().position(|&b| b == 0) {
            return Err(BridgeError::InteriorNul { position });
        }

        let len = bytes.len();
        let storage = if len < INLINE_CAPACITY {
            let mut buf = [0u8; INLINE_CAPACITY];
            buf[..len].copy_from_slice(bytes);
            Storage::Inline(buf)
        } else {
            let mut buf = Vec::with_capacity(len + 1);
            buf.extend_from_slice(bytes);
            buf.push(0);
            Storage::Heap(buf.into_boxed_slice())
        };
        Ok(Self { storage, len })
    }

    /// Pointer to the first byte; valid while `self` is alive and unmoved.
    #[must_use]
    pub fn as_ptr(&self) -> *const c_char {
        self.with_nul().as_ptr().cast()
    }

    #[must_use]
    pub fn as_c_str(&self) -> &CStr {
        // SAFETY: constructed with exactly one NUL, at index `len`.
        unsafe { CStr::from_bytes_with_nul_unchecked(self.with_nul()) }
    }

    /// Encoded bytes without the terminator.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.with_nul()[..self.len]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when no heap buffer was needed.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        matches!(self.storage, Storage::Inline(_))
    }

    fn with_nul(&self) -> &[u8] {
        match &self.storage {
            Storage::Inline(buf) => &buf[..=self.len],
            Storage::Heap(buf) => buf,
        }
    }
}

impl fmt::Debug for ScopedCStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCStr")
            .field("text", &self.as_c_str())
            .field("inline", &self.is_inline())
            .finish()
    }
}

/// Run `f` with a C-string view of `text`; the buffer is gone when this
/// returns or unwinds.
pub fn with_c_str<R>(text: &str, f: impl FnOnce(*const c_char) -> R) -> Result<R> {
    let c = ScopedCStr::new(text)?;
    Ok(f(c.as_ptr()))
}

/// A nullable string parameter: `None` passes null.
#[derive(Debug, Default)]
pub struct OptionalCStr(Option<ScopedCStr>);

impl OptionalCStr {
    pub fn new(text: Option<&str>) -> Result<Self> {
        text.map(ScopedCStr::new).transpose().map(Self)
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const c_char {
        self.0
            .as_ref()
            .map_or(std::ptr::null(), ScopedCStr::as_ptr)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }
}

// ---------------------------------------------------------------------------
// inbound
// ---------------------------------------------------------------------------

/// Length of the C string at `ptr`, stopping at `bound` when given.
/// Returns `(len, terminated)`.
///
/// # Safety
///
/// `ptr` must be readable up to the first NUL, or up to `bound` bytes.
unsafe fn scan(ptr: *const c_char, bound: Option<usize>) -> (usize, bool) {
    let limit = bound.unwrap_or(usize::MAX);
    let mut len = 0;
    while len < limit {
        // SAFETY: within the readable prefix per the caller's contract.
        if unsafe { *ptr.add(len) } == 0 {
            return (len, true);
        }
        len += 1;
    }
    (len, false)
}

/// Decode a borrowed C string; `None` for null. Invalid UTF-8 is replaced.
///
/// # Safety
///
/// A non-null `ptr` must point to a NUL-terminated string.
#[must_use]
pub unsafe fn from_native(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: forwarded from the caller.
    let (len, _) = unsafe { scan(ptr, None) };
    // SAFETY: `len` bytes were just read.
    let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) };
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Text decoded by [`from_native_bounded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedText {
    pub text: String,
    /// No NUL within the bound: `text` is only a prefix.
    pub truncated: bool,
}

/// Like [`from_native`], reading at most `max` bytes.
///
/// # Safety
///
/// A non-null `ptr` must be readable up to its NUL or `max` bytes,
/// whichever comes first.
#[must_use]
pub unsafe fn from_native_bounded(ptr: *const c_char, max: usize) -> Option<BoundedText> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: forwarded from the caller.
    let (len, terminated) = unsafe { scan(ptr, Some(max)) };
    // SAFETY: `len <= max` bytes were just read.
    let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) };
    Some(BoundedText {
        text: String::from_utf8_lossy(bytes).into_owned(),
        truncated: !terminated,
    })
}

/// Decode a NULL-terminated array of C strings; `None` for a null array.
///
/// # Safety
///
/// A non-null `list` must point to an array ending in a null entry, each
/// earlier entry a NUL-terminated string.
#[must_use]
pub unsafe fn from_native_list(list: *const *const c_char) -> Option<Vec<String>> {
    if list.is_null() {
        return None;
    }
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        // SAFETY: entries up to and including the null terminator are readable.
        let entry = unsafe { *list.add(i) };
        // SAFETY: forwarded from the caller.
        match unsafe { from_native(entry) } {
            Some(s) => out.push(s),
            None => break,
        }
        i += 1;
    }
    Some(out)
}

/// A C string the native side allocated and the host must release.
///
/// Freed with the native `free` captured at adoption, on drop.
pub struct NativeOwnedString {
    ptr: NonNull<c_char>,
    free: FreeFn,
}

impl NativeOwnedString {
    /// Adopt `ptr`, to be released with `free`. Null yields `None`.
    ///
    /// # Safety
    ///
    /// `ptr` is null or a NUL-terminated string allocated by the allocator
    /// that `free` belongs to, not owned by anyone else.
    #[must_use]
    pub unsafe fn from_raw(ptr: *mut c_char, free: FreeFn) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, free })
    }

    /// Adopt `ptr`, releasing it with the runtime's active `free`.
    ///
    /// # Safety
    ///
    /// As for [`from_raw`](Self::from_raw), with the runtime's current
    /// allocator as the owner.
    pub unsafe fn adopt(ptr: *mut c_char, runtime: &dyn NativeRuntime) -> Result<Option<Self>> {
        if ptr.is_null() {
            return Ok(None);
        }
        let free = runtime.memory_functions()?.free;
        // SAFETY: forwarded from the caller.
        Ok(unsafe { Self::from_raw(ptr, free) })
    }

    #[must_use]
    pub fn as_c_str(&self) -> &CStr {
        // SAFETY: adopted strings are NUL-terminated and live until drop.
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }
    }

    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        self.as_c_str().to_string_lossy().into_owned()
    }
}

impl fmt::Debug for NativeOwnedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NativeOwnedString")
            .field(&self.as_c_str())
            .finish()
    }
}

impl Drop for NativeOwnedString {
    fn drop(&mut self) {
        // SAFETY: ownership was transferred on adoption; released once here.
        unsafe { (self.free)(self.ptr.as_ptr().cast()) };
    }
}
