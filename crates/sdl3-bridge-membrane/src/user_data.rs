//! Token -> host object registry.
//!
//! Native callback APIs carry exactly one pointer-sized context value. The
//! store is the fixed anchor that turns that value back into a host object:
//! `add` hands out a [`Token`], trampolines resolve it with `get`, and the
//! registering code releases it with `remove` or `take`.
//!
//! Entries never expire on their own. Resolution failure (unknown token,
//! stale generation, different type) is an ordinary outcome reported as
//! `None`, because native code may race a callback against a removal.
//!
//! Thread-safe via sharded `parking_lot::Mutex`. New registrations are spread
//! round-robin over the shards; the shard is recoverable from the token's
//! index, so lookups touch exactly one lock.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::metrics::{BridgeMetrics, global_metrics};
use crate::token::{MAX_INDEX, Token, mask_generation};

/// Number of shards (power of 2).
const NUM_SHARDS: usize = 16;

type Entry = Arc<dyn Any + Send + Sync>;

struct Slot {
    generation: u32,
    value: Option<Entry>,
}

struct StoreShard {
    slots: Vec<Slot>,
    /// Vacant slot indices for reuse.
    free_list: Vec<usize>,
}

impl StoreShard {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Live slot addressed by `local` whose generation matches `token`.
    fn live_slot(&mut self, local: usize, token: Token) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(local)?;
        if slot.value.is_none() || mask_generation(slot.generation) != token.generation() {
            return None;
        }
        Some(slot)
    }

    fn vacate(&mut self, local: usize) -> Option<Entry> {
        let slot = &mut self.slots[local];
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(local);
        value
    }
}

/// Process-wide registry mapping tokens to host objects.
pub struct UserDataStore {
    shards: Box<[Mutex<StoreShard>]>,
    next_shard: AtomicUsize,
    live: AtomicUsize,
}

impl UserDataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let shards: Vec<Mutex<StoreShard>> = (0..NUM_SHARDS)
            .map(|_| Mutex::new(StoreShard::new()))
            .collect();
        Self {
            shards: shards.into_boxed_slice(),
            next_shard: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }

    /// Register `value` and return a fresh token for it.
    ///
    /// The token stays valid until `remove`/`take` is called with it.
    pub fn add<T: Any + Send + Sync>(&self, value: T) -> Token {
        self.add_arc(Arc::new(value))
    }

    /// Register an already shared value.
    pub fn add_arc<T: Any + Send + Sync>(&self, value: Arc<T>) -> Token {
        let shard_idx = self.next_shard.fetch_add(1, Ordering::Relaxed) % NUM_SHARDS;
        let mut shard = self.shards[shard_idx].lock();

        let local = if let Some(local) = shard.free_list.pop() {
            local
        } else {
            let local = shard.slots.len();
            shard.slots.push(Slot {
                generation: 0,
                value: None,
            });
            local
        };

        let index = local * NUM_SHARDS + shard_idx;
        assert!(
            index <= MAX_INDEX,
            "user-data store exhausted: {index} live slots exceed the token index space"
        );

        let entry: Entry = value;
        let slot = &mut shard.slots[local];
        slot.value = Some(entry);
        let token = Token::new(index, slot.generation);
        drop(shard);

        self.live.fetch_add(1, Ordering::Relaxed);
        BridgeMetrics::inc(&global_metrics().tokens_added);
        token
    }

    /// Resolve `token` to its registered value.
    ///
    /// Returns `None` when the token is unknown, was removed, or holds a value
    /// of a different type.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, token: Token) -> Option<Arc<T>> {
        let entry = self.entry(token)?;
        match entry.downcast::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                BridgeMetrics::inc(&global_metrics().type_mismatches);
                None
            }
        }
    }

    /// True when `token` is currently registered (any type).
    #[must_use]
    pub fn contains(&self, token: Token) -> bool {
        let (shard_idx, local) = Self::locate(token);
        self.shards[shard_idx]
            .lock()
            .live_slot(local, token)
            .is_some()
    }

    /// True when `token` is registered and holds a `T`.
    #[must_use]
    pub fn is<T: Any + Send + Sync>(&self, token: Token) -> bool {
        let (shard_idx, local) = Self::locate(token);
        let mut shard = self.shards[shard_idx].lock();
        shard
            .live_slot(local, token)
            .and_then(|slot| slot.value.as_ref())
            .is_some_and(|value| (**value).is::<T>())
    }

    /// Deregister `token`.
    ///
    /// Returns `false` for unknown or already removed tokens. Never fails.
    pub fn remove(&self, token: Token) -> bool {
        self.release(token).is_some()
    }

    /// Deregister `token` and hand back its value if it holds a `T`.
    ///
    /// The token is released whatever its registered type; a mismatch only
    /// means no value comes back.
    pub fn take<T: Any + Send + Sync>(&self, token: Token) -> Option<Arc<T>> {
        let value = self.release(token)?.downcast::<T>().ok();
        if value.is_none() {
            BridgeMetrics::inc(&global_metrics().type_mismatches);
        }
        value
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, token: Token) -> Option<Entry> {
        let (shard_idx, local) = Self::locate(token);
        let mut shard = self.shards[shard_idx].lock();
        let entry = shard
            .live_slot(local, token)
            .and_then(|slot| slot.value.clone());
        drop(shard);
        if entry.is_none() {
            BridgeMetrics::inc(&global_metrics().stale_lookups);
        }
        entry
    }

    /// Vacate the slot behind `token`. The returned value is dropped by the
    /// caller after the shard lock is released: its Drop may call back into
    /// the store.
    fn release(&self, token: Token) -> Option<Entry> {
        let (shard_idx, local) = Self::locate(token);
        let removed = {
            let mut shard = self.shards[shard_idx].lock();
            if shard.live_slot(local, token).is_some() {
                shard.vacate(local)
            } else {
                None
            }
        };
        if removed.is_some() {
            self.note_removed();
        } else {
            BridgeMetrics::inc(&global_metrics().stale_lookups);
        }
        removed
    }

    fn note_removed(&self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
        BridgeMetrics::inc(&global_metrics().tokens_removed);
    }

    fn locate(token: Token) -> (usize, usize) {
        let index = token.index();
        (index % NUM_SHARDS, index / NUM_SHARDS)
    }
}

impl Default for UserDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UserDataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDataStore")
            .field("live", &self.len())
            .finish_non_exhaustive()
    }
}

static GLOBAL_STORE: OnceLock<UserDataStore> = OnceLock::new();

/// The process-wide store used by every trampoline.
#[must_use]
pub fn global_store() -> &'static UserDataStore {
    GLOBAL_STORE.get_or_init(UserDataStore::new)
}
