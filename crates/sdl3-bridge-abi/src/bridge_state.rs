//! Process-wide bridge state shared by the allocator hooks.

use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;

use sdl3_bridge_membrane::AllocationTable;
use sdl3_bridge_membrane::config::bridge_config;

/// Set between a successful `install` and the matching `uninstall`.
pub(crate) static INSTALLED: AtomicBool = AtomicBool::new(false);

/// The table behind `bridge_malloc` and friends.
pub(crate) fn global_table() -> &'static AllocationTable {
    static TABLE: OnceLock<AllocationTable> = OnceLock::new();
    TABLE.get_or_init(|| AllocationTable::with_poison(bridge_config().poison_freed))
}
