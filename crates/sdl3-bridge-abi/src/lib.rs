// Trampolines and allocator hooks take raw pointers straight from native code;
// each carries its own `# Safety` section where the contract is not obvious.
#![allow(clippy::missing_safety_doc)]
//! # sdl3-bridge-abi
//!
//! The `extern "C"` side of the SDL3 interop bridge.
//!
//! # Architecture
//!
//! ```text
//! host code -> wrapper -> ScopedCStr -> SDL entry point -> sentinel check -> Result
//!                      \-> Token (UserDataStore) ~~> SDL ~~> trampoline -> host callback
//! SDL_malloc/calloc/realloc/free ~~> bridge hooks -> AllocationTable
//! ```
//!
//! - [`string_abi`]: scoped host-string -> C-string conversion and the reverse
//! - [`callback_abi`]: `extern "C"` trampolines resolving `userdata` tokens
//! - [`memory_abi`]: allocator hooks and install/uninstall of the bridge
//! - [`error`]: `BridgeError` and the sentinel-check convention
//! - [`native`]: the seam to the native library (`NativeRuntime`)
//! - [`structured_log`]: JSONL logging driven by `SDL3_BRIDGE_LOG`
//!
//! With the `link-sdl3` feature, [`sdl3`] binds the real library and shows
//! the full chain on a handful of wrapped entry points.

mod bridge_state;

pub mod callback_abi;
pub mod error;
pub mod memory_abi;
pub mod native;
pub mod string_abi;
pub mod structured_log;

#[cfg(feature = "link-sdl3")]
pub mod sdl3;

pub use error::{BridgeError, ErrorSource, Result};
pub use native::{MemoryFunctions, NativeRuntime};
pub use sdl3_bridge_membrane::Token;
pub use string_abi::{NativeOwnedString, OptionalCStr, ScopedCStr};
