//! Host-side state for the SDL3 interop bridge.
//!
//! Native code can only carry machine words and raw addresses across a call.
//! This crate holds the process-wide tables that give those words meaning on
//! the Rust side, independent of any `extern "C"` surface:
//!
//! - **Tokens** (`token`): generation-tagged, pointer-sized handles
//! - **User-data store** (`user_data`): token -> callback object registry
//! - **Allocation table** (`alloc_table`): address -> block bookkeeping for the
//!   allocator bridge, owning the blocks it hands out
//! - **Configuration** (`config`): environment-driven bridge settings
//! - **Metrics** (`metrics`): atomic counters for observability
//!
//! The `extern "C"` entry points that native code actually calls live in
//! `sdl3-bridge-abi`.

#![deny(unsafe_code)]

pub mod alloc_table;
pub mod config;
pub mod metrics;
pub mod token;
pub mod user_data;

pub use alloc_table::{AllocationTable, BlockRecord, FreeResult, GRANULARITY, TableStats};
pub use config::{BridgeConfig, LogLevel};
pub use metrics::BridgeMetrics;
pub use token::Token;
pub use user_data::{UserDataStore, global_store};
