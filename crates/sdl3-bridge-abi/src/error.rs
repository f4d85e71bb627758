//! Bridge error type and the native result-checking convention.
//!
//! Every wrapped SDL entry point documents a failure sentinel: `false`, a null
//! pointer, a negative integer, or a zero id. Call sites pass the raw result
//! through one of the `check_*` functions below, which fetch SDL's last-error
//! text only on failure and turn it into [`BridgeError::NativeCall`]. Nothing
//! here retries.

use std::ffi::c_int;
use std::ptr::NonNull;

use sdl3_bridge_membrane::metrics::{BridgeMetrics, global_metrics};
use thiserror::Error;

use crate::structured_log::{self, Level, LogEntry};

/// Every failure the bridge reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A native call returned its failure sentinel.
    #[error("{function} failed: {message}")]
    NativeCall {
        function: &'static str,
        message: String,
    },
    /// Host text cannot be passed as a C string.
    #[error("string contains an interior NUL byte at offset {position}")]
    InteriorNul { position: usize },
    #[error("allocator bridge is already installed")]
    AllocatorAlreadyInstalled,
    #[error("allocator bridge is not installed")]
    AllocatorNotInstalled,
    /// The native side reported a null entry in its memory function set.
    #[error("native memory function set has no `{which}` entry")]
    MissingMemoryFunction { which: &'static str },
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Access to the native library's thread-local last-error text.
pub trait ErrorSource {
    /// Current error message (`SDL_GetError`). Empty when none is set.
    fn last_error(&self) -> String;
}

/// Build the error for a failed `function`, reading `source` once.
pub fn native_failure(function: &'static str, source: &(impl ErrorSource + ?Sized)) -> BridgeError {
    let mut message = source.last_error();
    if message.is_empty() {
        message.push_str("no error message set");
    }
    BridgeMetrics::inc(&global_metrics().native_failures);
    structured_log::log_with(Level::Warn, || {
        LogEntry::new(Level::Warn, "native_call_failed")
            .with_symbol(function)
            .with_message(&message)
    });
    BridgeError::NativeCall { function, message }
}

/// `bool`-returning entry points: `false` is failure.
pub fn check_bool(
    ok: bool,
    function: &'static str,
    source: &(impl ErrorSource + ?Sized),
) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(native_failure(function, source))
    }
}

/// Pointer-returning entry points: null is failure.
pub fn check_ptr<T>(
    ptr: *mut T,
    function: &'static str,
    source: &(impl ErrorSource + ?Sized),
) -> Result<NonNull<T>> {
    NonNull::new(ptr).ok_or_else(|| native_failure(function, source))
}

/// `int`-returning entry points: negative is failure.
pub fn check_non_negative(
    value: c_int,
    function: &'static str,
    source: &(impl ErrorSource + ?Sized),
) -> Result<c_int> {
    if value < 0 {
        Err(native_failure(function, source))
    } else {
        Ok(value)
    }
}

/// Id-returning entry points (timer ids, device ids, property groups): zero
/// is failure.
pub fn check_nonzero<T>(
    value: T,
    function: &'static str,
    source: &(impl ErrorSource + ?Sized),
) -> Result<T>
where
    T: Copy + Default + PartialEq,
{
    if value == T::default() {
        Err(native_failure(function, source))
    } else {
        Ok(value)
    }
}
