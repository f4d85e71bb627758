//! Atomic counters for bridge observability.
//!
//! All counters use relaxed ordering. They are advisory/diagnostic,
//! not synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global bridge operation counters.
pub struct BridgeMetrics {
    /// Registrations added to a user-data store.
    pub tokens_added: AtomicU64,
    /// Registrations removed (explicitly or by one-shot dispatch).
    pub tokens_removed: AtomicU64,
    /// Lookups or removals with an unknown or stale token.
    pub stale_lookups: AtomicU64,
    /// Lookups whose token was live but held a different type.
    pub type_mismatches: AtomicU64,
    /// Blocks handed out by the allocation table.
    pub allocations: AtomicU64,
    /// Of those, blocks requested zeroed.
    pub zeroed_allocations: AtomicU64,
    /// Blocks released.
    pub frees: AtomicU64,
    /// Frees of addresses the table never issued.
    pub foreign_frees: AtomicU64,
    /// Reallocations served from the existing block.
    pub reallocs_in_place: AtomicU64,
    /// Reallocations that moved to a new block.
    pub reallocs_moved: AtomicU64,
    /// Trampoline invocations that reached a host callback.
    pub dispatches: AtomicU64,
    /// Host callbacks that panicked inside a trampoline.
    pub callback_panics: AtomicU64,
    /// Native calls that returned a failure sentinel.
    pub native_failures: AtomicU64,
}

impl BridgeMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tokens_added: AtomicU64::new(0),
            tokens_removed: AtomicU64::new(0),
            stale_lookups: AtomicU64::new(0),
            type_mismatches: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            zeroed_allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            foreign_frees: AtomicU64::new(0),
            reallocs_in_place: AtomicU64::new(0),
            reallocs_moved: AtomicU64::new(0),
            dispatches: AtomicU64::new(0),
            callback_panics: AtomicU64::new(0),
            native_failures: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tokens_added: Self::get(&self.tokens_added),
            tokens_removed: Self::get(&self.tokens_removed),
            stale_lookups: Self::get(&self.stale_lookups),
            type_mismatches: Self::get(&self.type_mismatches),
            allocations: Self::get(&self.allocations),
            zeroed_allocations: Self::get(&self.zeroed_allocations),
            frees: Self::get(&self.frees),
            foreign_frees: Self::get(&self.foreign_frees),
            reallocs_in_place: Self::get(&self.reallocs_in_place),
            reallocs_moved: Self::get(&self.reallocs_moved),
            dispatches: Self::get(&self.dispatches),
            callback_panics: Self::get(&self.callback_panics),
            native_failures: Self::get(&self.native_failures),
        }
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of all bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tokens_added: u64,
    pub tokens_removed: u64,
    pub stale_lookups: u64,
    pub type_mismatches: u64,
    pub allocations: u64,
    pub zeroed_allocations: u64,
    pub frees: u64,
    pub foreign_frees: u64,
    pub reallocs_in_place: u64,
    pub reallocs_moved: u64,
    pub dispatches: u64,
    pub callback_panics: u64,
    pub native_failures: u64,
}

static GLOBAL_METRICS: BridgeMetrics = BridgeMetrics::new();

/// Access the global metrics singleton.
#[must_use]
pub fn global_metrics() -> &'static BridgeMetrics {
    &GLOBAL_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = BridgeMetrics::new();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn increment_works() {
        let m = BridgeMetrics::new();
        BridgeMetrics::inc(&m.tokens_added);
        BridgeMetrics::inc(&m.tokens_added);
        BridgeMetrics::inc(&m.reallocs_in_place);
        let snap = m.snapshot();
        assert_eq!(snap.tokens_added, 2);
        assert_eq!(snap.reallocs_in_place, 1);
        assert_eq!(snap.frees, 0);
    }
}
