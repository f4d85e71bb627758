//! Binding to the real SDL3 library (`link-sdl3` feature).
//!
//! [`Sdl3`] implements [`NativeRuntime`] over the `sdl3-sys` bindings, and its
//! inherent methods wrap a few entry points end to end: host strings go out
//! through [`ScopedCStr`], callbacks through a token and a trampoline, and
//! every sentinel comes back as a [`BridgeError`](crate::BridgeError).

use std::ffi::{c_char, c_int, c_void};

use sdl3_bridge_membrane::Token;
use sdl3_sys::error::{SDL_ClearError, SDL_GetError};
use sdl3_sys::events::{SDL_AddEventWatch, SDL_Event, SDL_RemoveEventWatch};
use sdl3_sys::hints::{SDL_AddHintCallback, SDL_GetHint, SDL_RemoveHintCallback, SDL_SetHint};
use sdl3_sys::init::SDL_RunOnMainThread;
use sdl3_sys::log::{SDL_LogPriority, SDL_SetLogOutputFunction};
use sdl3_sys::stdinc::{
    SDL_GetMemoryFunctions, SDL_GetNumAllocations, SDL_GetOriginalMemoryFunctions,
    SDL_SetMemoryFunctions, SDL_calloc_func, SDL_free_func, SDL_malloc_func, SDL_realloc_func,
};
use sdl3_sys::timer::{SDL_AddTimer, SDL_RemoveTimer, SDL_TimerID};

use crate::callback_abi::{
    self, EventFilter, HintCallback, LogOutputFunction, MainThreadCallback, SdlEvent,
    TimerCallback, TimerId,
};
use crate::error::{ErrorSource, Result, check_bool, check_nonzero};
use crate::native::{CallocFn, FreeFn, MallocFn, MemoryFunctions, NativeRuntime, ReallocFn};
use crate::string_abi::{ScopedCStr, from_native};

// The bridge's allocator signatures are SDL's with the nullability lifted.
const _: fn(MallocFn) -> SDL_malloc_func = Some;
const _: fn(CallocFn) -> SDL_calloc_func = Some;
const _: fn(ReallocFn) -> SDL_realloc_func = Some;
const _: fn(FreeFn) -> SDL_free_func = Some;

// sdl3-sys wraps ids and enums in newtypes; these adapt them to the
// plain-integer trampolines in `callback_abi`.

unsafe extern "C" fn sdl_timer(userdata: *mut c_void, id: SDL_TimerID, interval: u32) -> u32 {
    // SAFETY: forwarded from SDL.
    unsafe { callback_abi::timer_trampoline(userdata, id.0, interval) }
}

unsafe extern "C" fn sdl_event_filter(userdata: *mut c_void, event: *mut SDL_Event) -> bool {
    // SAFETY: forwarded from SDL; the event is only passed on as a pointer.
    unsafe { callback_abi::event_filter_trampoline(userdata, event.cast::<SdlEvent>()) }
}

unsafe extern "C" fn sdl_log_output(
    userdata: *mut c_void,
    category: c_int,
    priority: SDL_LogPriority,
    message: *const c_char,
) {
    // SAFETY: forwarded from SDL.
    unsafe { callback_abi::log_output_trampoline(userdata, category, priority.0, message) }
}

/// A running timer: SDL's id plus the registration behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    pub id: TimerId,
    pub token: Token,
}

/// The linked SDL3 library.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sdl3;

impl ErrorSource for Sdl3 {
    fn last_error(&self) -> String {
        // SAFETY: SDL_GetError returns a valid, possibly empty, C string.
        unsafe { from_native(SDL_GetError()) }.unwrap_or_default()
    }
}

type MemorySlots = (
    SDL_malloc_func,
    SDL_calloc_func,
    SDL_realloc_func,
    SDL_free_func,
);

fn read_memory_functions(
    getter: unsafe extern "C" fn(
        *mut SDL_malloc_func,
        *mut SDL_calloc_func,
        *mut SDL_realloc_func,
        *mut SDL_free_func,
    ),
) -> Result<MemoryFunctions> {
    let mut slots: MemorySlots = (None, None, None, None);
    // SAFETY: the getter only writes the four out-parameters.
    unsafe { getter(&mut slots.0, &mut slots.1, &mut slots.2, &mut slots.3) };
    MemoryFunctions::from_parts(slots.0, slots.1, slots.2, slots.3)
}

impl NativeRuntime for Sdl3 {
    fn clear_error(&self) {
        // SAFETY: no preconditions.
        unsafe { SDL_ClearError() };
    }

    fn memory_functions(&self) -> Result<MemoryFunctions> {
        read_memory_functions(SDL_GetMemoryFunctions)
    }

    fn original_memory_functions(&self) -> Result<MemoryFunctions> {
        read_memory_functions(SDL_GetOriginalMemoryFunctions)
    }

    unsafe fn set_memory_functions(&self, f: MemoryFunctions) -> bool {
        // SAFETY: the caller upholds SDL's no-outstanding-allocations rule.
        unsafe {
            SDL_SetMemoryFunctions(Some(f.malloc), Some(f.calloc), Some(f.realloc), Some(f.free))
        }
    }

    fn allocation_count(&self) -> Option<c_int> {
        // SAFETY: no preconditions; -1 means counting is compiled out.
        let count = unsafe { SDL_GetNumAllocations() };
        (count >= 0).then_some(count)
    }
}

impl Sdl3 {
    pub fn set_hint(&self, name: &str, value: &str) -> Result<()> {
        let name = ScopedCStr::new(name)?;
        let value = ScopedCStr::new(value)?;
        // SAFETY: both strings outlive the call; SDL copies them.
        let ok = unsafe { SDL_SetHint(name.as_ptr(), value.as_ptr()) };
        check_bool(ok, "SDL_SetHint", self)
    }

    /// Current value of a hint; `None` when unset.
    pub fn get_hint(&self, name: &str) -> Result<Option<String>> {
        let name = ScopedCStr::new(name)?;
        // SAFETY: the returned string is owned by SDL and read immediately.
        Ok(unsafe { from_native(SDL_GetHint(name.as_ptr())) })
    }

    pub fn add_hint_callback(&self, name: &str, callback: HintCallback) -> Result<Token> {
        let name = ScopedCStr::new(name)?;
        let (token, ()) = callback_abi::attach(callback, |userdata| {
            // SAFETY: the trampoline matches SDL_HintCallback; `name` outlives the call.
            let ok = unsafe {
                SDL_AddHintCallback(name.as_ptr(), Some(callback_abi::hint_trampoline), userdata)
            };
            check_bool(ok, "SDL_AddHintCallback", self)
        })?;
        Ok(token)
    }

    pub fn remove_hint_callback(&self, name: &str, token: Token) -> Result<()> {
        let name = ScopedCStr::new(name)?;
        // SAFETY: same (callback, userdata) pair that was registered.
        unsafe {
            SDL_RemoveHintCallback(name.as_ptr(), Some(callback_abi::hint_trampoline), token.as_ptr());
        }
        callback_abi::unregister(token);
        Ok(())
    }

    pub fn add_timer(&self, interval_ms: u32, callback: TimerCallback) -> Result<TimerHandle> {
        let (token, id) = callback_abi::attach(callback, |userdata| {
            // SAFETY: the adapter matches SDL_TimerCallback.
            let id = unsafe { SDL_AddTimer(interval_ms, Some(sdl_timer), userdata) };
            check_nonzero(id.0, "SDL_AddTimer", self)
        })?;
        Ok(TimerHandle { id, token })
    }

    /// Stop the timer and drop its registration. The registration is dropped
    /// even when SDL no longer knows the timer (its callback returned `0`).
    pub fn remove_timer(&self, timer: TimerHandle) -> Result<()> {
        // SAFETY: no preconditions.
        let ok = unsafe { SDL_RemoveTimer(SDL_TimerID(timer.id)) };
        callback_abi::unregister(timer.token);
        check_bool(ok, "SDL_RemoveTimer", self)
    }

    pub fn add_event_watch(&self, filter: EventFilter) -> Result<Token> {
        let (token, ()) = callback_abi::attach(filter, |userdata| {
            // SAFETY: the adapter matches SDL_EventFilter.
            let ok = unsafe { SDL_AddEventWatch(Some(sdl_event_filter), userdata) };
            check_bool(ok, "SDL_AddEventWatch", self)
        })?;
        Ok(token)
    }

    pub fn remove_event_watch(&self, token: Token) {
        // SAFETY: same (filter, userdata) pair that was registered.
        unsafe { SDL_RemoveEventWatch(Some(sdl_event_filter), token.as_ptr()) };
        callback_abi::unregister(token);
    }

    /// Route SDL's log output to `output`. The returned token stays
    /// registered until the host unregisters it after restoring another sink.
    pub fn set_log_output_function(&self, output: LogOutputFunction) -> Token {
        let token = callback_abi::register(output);
        // SAFETY: the adapter matches SDL_LogOutputFunction.
        unsafe { SDL_SetLogOutputFunction(Some(sdl_log_output), token.as_ptr()) };
        token
    }

    /// Run `f` on SDL's main thread, optionally waiting for it to finish.
    pub fn run_on_main_thread(&self, f: impl FnOnce() + Send + 'static, wait: bool) -> Result<()> {
        callback_abi::attach(MainThreadCallback::new(f), |userdata| {
            // SAFETY: the trampoline matches SDL_MainThreadCallback.
            let ok = unsafe {
                SDL_RunOnMainThread(Some(callback_abi::main_thread_trampoline), userdata, wait)
            };
            check_bool(ok, "SDL_RunOnMainThread", self)
        })
        .map(|_| ())
    }
}
