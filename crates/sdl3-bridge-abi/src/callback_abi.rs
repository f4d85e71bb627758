//! `extern "C"` trampolines for SDL callbacks.
//!
//! Native code gets a static trampoline plus a [`Token`] disguised as its
//! `void *userdata`. On each call the trampoline resolves the token in the
//! global [`UserDataStore`](sdl3_bridge_membrane::UserDataStore), checks the
//! registered type, and forwards to the host closure.
//!
//! Unknown, stale, or mistyped tokens are skipped and the trampoline returns
//! the callback's neutral value. A host panic is caught here, logged, and
//! also turned into the neutral value; it never unwinds into C.

use std::any::Any;
use std::ffi::{c_char, c_int, c_void};
use std::fmt;
use std::marker::{PhantomData, PhantomPinned};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::NonNull;

use parking_lot::Mutex;
use sdl3_bridge_membrane::metrics::{BridgeMetrics, global_metrics};
use sdl3_bridge_membrane::{Token, global_store};

use crate::error::Result;
use crate::string_abi::{from_native, from_native_list};
use crate::structured_log::{self, Level, LogEntry};

/// `SDL_TimerID`
pub type TimerId = u32;

/// `SDL_LogPriority`
pub type LogPriority = c_int;

/// Opaque `SDL_Event`; only ever seen behind a pointer.
#[repr(C)]
pub struct SdlEvent {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// Opaque `SDL_AudioStream`.
#[repr(C)]
pub struct SdlAudioStream {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

macro_rules! callback_wrapper {
    ($(#[$meta:meta])* $name:ident, $($sig:tt)*) => {
        $(#[$meta])*
        pub struct $name(Box<dyn $($sig)* + Send + Sync>);

        impl $name {
            pub fn new(f: impl $($sig)* + Send + Sync + 'static) -> Self {
                Self(Box::new(f))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(stringify!($name))
            }
        }
    };
}

callback_wrapper!(
    /// `SDL_TimerCallback`: returns the next interval in ms, `0` to stop.
    TimerCallback,
    Fn(TimerId, u32) -> u32
);
callback_wrapper!(
    /// `SDL_EventFilter`: `false` drops the event (filters only).
    EventFilter,
    Fn(NonNull<SdlEvent>) -> bool
);
callback_wrapper!(
    /// `SDL_HintCallback`: `(name, old_value, new_value)`.
    HintCallback,
    Fn(&str, Option<&str>, Option<&str>)
);
callback_wrapper!(
    /// `SDL_AudioStreamCallback`: `(stream, additional_amount, total_amount)`.
    AudioStreamCallback,
    Fn(NonNull<SdlAudioStream>, i32, i32)
);
callback_wrapper!(
    /// `SDL_LogOutputFunction`: `(category, priority, message)`.
    LogOutputFunction,
    Fn(i32, LogPriority, &str)
);

/// `SDL_MainThreadCallback`. Fires at most once and unregisters itself.
pub struct MainThreadCallback(Mutex<Option<Box<dyn FnOnce() + Send>>>);

impl MainThreadCallback {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Mutex::new(Some(Box::new(f))))
    }
}

impl fmt::Debug for MainThreadCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MainThreadCallback")
    }
}

/// `SDL_CleanupPropertyCallback`: receives the property value being
/// released. SDL calls it once per value, so it unregisters itself.
pub struct CleanupCallback(Mutex<Option<Box<dyn FnOnce(*mut c_void) + Send>>>);

impl CleanupCallback {
    pub fn new(f: impl FnOnce(*mut c_void) + Send + 'static) -> Self {
        Self(Mutex::new(Some(Box::new(f))))
    }
}

impl fmt::Debug for CleanupCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CleanupCallback")
    }
}

/// What a file dialog produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogOutcome {
    /// One or more paths were chosen.
    Selected(Vec<String>),
    /// The user dismissed the dialog.
    Cancelled,
    /// SDL reported an error; its text is in `SDL_GetError` on this thread.
    Failed,
}

/// `SDL_DialogFileCallback`: `(outcome, selected filter index)`. Fires at
/// most once and unregisters itself.
pub struct DialogFileCallback(Mutex<Option<Box<dyn FnOnce(DialogOutcome, i32) + Send>>>);

impl DialogFileCallback {
    pub fn new(f: impl FnOnce(DialogOutcome, i32) + Send + 'static) -> Self {
        Self(Mutex::new(Some(Box::new(f))))
    }
}

impl fmt::Debug for DialogFileCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DialogFileCallback")
    }
}

// ---------------------------------------------------------------------------
// registration
// ---------------------------------------------------------------------------

/// Register `callback` and return the token to pass as `userdata`.
pub fn register<C: Any + Send + Sync>(callback: C) -> Token {
    global_store().add(callback)
}

/// Drop the registration behind `token`. `false` if it was already gone.
pub fn unregister(token: Token) -> bool {
    global_store().remove(token)
}

/// Register `callback`, then run `native` with its `userdata`.
///
/// If `native` fails (or panics) the registration is removed again, so a
/// callback the native side never accepted cannot linger.
pub fn attach<C, R>(callback: C, native: impl FnOnce(*mut c_void) -> Result<R>) -> Result<(Token, R)>
where
    C: Any + Send + Sync,
{
    let registration = Registration::new(callback);
    let value = native(registration.userdata())?;
    Ok((registration.into_token(), value))
}

/// A registration that is removed when dropped.
#[derive(Debug)]
#[must_use = "dropping a Registration unregisters it immediately"]
pub struct Registration {
    token: Token,
}

impl Registration {
    pub fn new<C: Any + Send + Sync>(callback: C) -> Self {
        Self {
            token: register(callback),
        }
    }

    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// The `void *userdata` value for native calls.
    #[must_use]
    pub fn userdata(&self) -> *mut c_void {
        self.token.as_ptr()
    }

    /// Keep the registration alive past this guard.
    #[must_use]
    pub fn into_token(self) -> Token {
        let token = self.token;
        std::mem::forget(self);
        token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        unregister(self.token);
    }
}

// ---------------------------------------------------------------------------
// dispatch
// ---------------------------------------------------------------------------

fn note_stale(symbol: &'static str, userdata: *mut c_void) {
    structured_log::log_with(Level::Debug, || {
        let entry = LogEntry::new(Level::Debug, "stale_token").with_symbol(symbol);
        match Token::from_ptr(userdata) {
            Some(token) => entry.with_token(token),
            None => entry.with_message("null userdata"),
        }
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn guarded<R>(symbol: &'static str, token: Token, neutral: R, call: impl FnOnce() -> R) -> R {
    BridgeMetrics::inc(&global_metrics().dispatches);
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(value) => value,
        Err(payload) => {
            BridgeMetrics::inc(&global_metrics().callback_panics);
            let message = panic_message(&*payload);
            structured_log::log_with(Level::Error, || {
                LogEntry::new(Level::Error, "callback_panicked")
                    .with_symbol(symbol)
                    .with_token(token)
                    .with_message(message)
            });
            neutral
        }
    }
}

/// Resolve `userdata` to a `C` and run `call` on it.
fn dispatch<C, R>(
    symbol: &'static str,
    userdata: *mut c_void,
    neutral: R,
    call: impl FnOnce(&C) -> R,
) -> R
where
    C: Any + Send + Sync,
{
    let Some((token, callback)) =
        Token::from_ptr(userdata).and_then(|t| global_store().get::<C>(t).map(|c| (t, c)))
    else {
        note_stale(symbol, userdata);
        return neutral;
    };
    guarded(symbol, token, neutral, || call(callback.as_ref()))
}

/// Like [`dispatch`], but removes the registration before calling.
fn dispatch_once<C>(symbol: &'static str, userdata: *mut c_void, call: impl FnOnce(&C))
where
    C: Any + Send + Sync,
{
    let Some((token, callback)) =
        Token::from_ptr(userdata).and_then(|t| global_store().take::<C>(t).map(|c| (t, c)))
    else {
        note_stale(symbol, userdata);
        return;
    };
    guarded(symbol, token, (), || call(callback.as_ref()));
}

// ---------------------------------------------------------------------------
// trampolines
// ---------------------------------------------------------------------------

/// Trampoline for [`TimerCallback`]. Neutral value `0` cancels the timer.
pub unsafe extern "C" fn timer_trampoline(
    userdata: *mut c_void,
    timer_id: TimerId,
    interval: u32,
) -> u32 {
    dispatch(
        "timer_trampoline",
        userdata,
        0,
        |cb: &TimerCallback| (cb.0)(timer_id, interval),
    )
}

/// Trampoline for [`EventFilter`]. Neutral value `true` keeps the event.
///
/// # Safety
///
/// `event` is null or points to an event valid for the call.
pub unsafe extern "C" fn event_filter_trampoline(userdata: *mut c_void, event: *mut SdlEvent) -> bool {
    let Some(event) = NonNull::new(event) else {
        return true;
    };
    dispatch("event_filter_trampoline", userdata, true, |cb: &EventFilter| {
        (cb.0)(event)
    })
}

/// Trampoline for [`HintCallback`].
///
/// # Safety
///
/// The string arguments are null or NUL-terminated.
pub unsafe extern "C" fn hint_trampoline(
    userdata: *mut c_void,
    name: *const c_char,
    old_value: *const c_char,
    new_value: *const c_char,
) {
    // SAFETY: forwarded from the caller.
    let (name, old_value, new_value) =
        unsafe { (from_native(name), from_native(old_value), from_native(new_value)) };
    let name = name.unwrap_or_default();
    dispatch("hint_trampoline", userdata, (), |cb: &HintCallback| {
        (cb.0)(&name, old_value.as_deref(), new_value.as_deref());
    });
}

/// Trampoline for [`AudioStreamCallback`].
pub unsafe extern "C" fn audio_stream_trampoline(
    userdata: *mut c_void,
    stream: *mut SdlAudioStream,
    additional_amount: c_int,
    total_amount: c_int,
) {
    let Some(stream) = NonNull::new(stream) else {
        return;
    };
    dispatch(
        "audio_stream_trampoline",
        userdata,
        (),
        |cb: &AudioStreamCallback| (cb.0)(stream, additional_amount, total_amount),
    );
}

/// Trampoline for [`LogOutputFunction`].
///
/// # Safety
///
/// `message` is null or NUL-terminated.
pub unsafe extern "C" fn log_output_trampoline(
    userdata: *mut c_void,
    category: c_int,
    priority: LogPriority,
    message: *const c_char,
) {
    // SAFETY: forwarded from the caller.
    let message = unsafe { from_native(message) }.unwrap_or_default();
    dispatch(
        "log_output_trampoline",
        userdata,
        (),
        |cb: &LogOutputFunction| (cb.0)(category, priority, &message),
    );
}

/// Trampoline for [`CleanupCallback`]. Removes the registration.
pub unsafe extern "C" fn cleanup_trampoline(userdata: *mut c_void, value: *mut c_void) {
    dispatch_once("cleanup_trampoline", userdata, |cb: &CleanupCallback| {
        let f = cb.0.lock().take();
        if let Some(f) = f {
            f(value);
        }
    });
}

/// Trampoline for [`MainThreadCallback`]. Removes the registration.
pub unsafe extern "C" fn main_thread_trampoline(userdata: *mut c_void) {
    dispatch_once("main_thread_trampoline", userdata, |cb: &MainThreadCallback| {
        let f = cb.0.lock().take();
        if let Some(f) = f {
            f();
        }
    });
}

/// Trampoline for [`DialogFileCallback`]. Removes the registration.
///
/// # Safety
///
/// `filelist` is null or a null-terminated array of NUL-terminated strings.
pub unsafe extern "C" fn dialog_file_trampoline(
    userdata: *mut c_void,
    filelist: *const *const c_char,
    filter: c_int,
) {
    // SAFETY: forwarded from the caller.
    let outcome = match unsafe { from_native_list(filelist) } {
        None => DialogOutcome::Failed,
        Some(files) if files.is_empty() => DialogOutcome::Cancelled,
        Some(files) => DialogOutcome::Selected(files),
    };
    dispatch_once("dialog_file_trampoline", userdata, |cb: &DialogFileCallback| {
        let f = cb.0.lock().take();
        if let Some(f) = f {
            f(outcome, filter);
        }
    });
}
