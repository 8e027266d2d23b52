//! Keyed arena of cancellable one-shot timers.
//!
//! Each entry owns exactly one live timer task. Entries are stored as
//! `key -> { value, started_at, ttl, generation, abort handle }`:
//!
//! - [`TimerArena::insert`] aborts the previous timer for the same key before
//!   installing the new one, so a key never has two live timers.
//! - [`TimerArena::remove`] aborts the timer and hands the value back.
//! - When a timer fires it removes its entry only if the stored generation is
//!   still its own. A timer that was superseded while already waking up finds
//!   a newer generation and does nothing.
//!
//! Timers are tokio tasks, so every mutating call must happen inside a tokio
//! runtime. Time is read from [`tokio::time::Instant`], which lets tests run
//! under paused virtual time.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// One arena entry.
struct Slot<V> {
    value: V,
    started_at: Instant,
    ttl: Duration,
    generation: u64,
    handle: AbortHandle,
}

struct ArenaInner<K, V> {
    slots: HashMap<K, Slot<V>>,
    next_generation: u64,
}

impl<K, V> Drop for ArenaInner<K, V> {
    fn drop(&mut self) {
        for slot in self.slots.values() {
            slot.handle.abort();
        }
    }
}

/// Arena of values that expire after a per-entry time-to-live.
pub struct TimerArena<K, V> {
    inner: Arc<Mutex<ArenaInner<K, V>>>,
}

impl<K, V> Default for TimerArena<K, V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ArenaInner {
                slots: HashMap::new(),
                next_generation: 0,
            })),
        }
    }
}

impl<K, V> TimerArena<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key` with a timer of `ttl`.
    ///
    /// When the timer fires the entry is removed and `on_expire` runs with
    /// the key and value. If `key` already had an entry, its timer is
    /// aborted first and its value returned; the old `on_expire` never runs.
    pub fn insert<F, Fut>(&self, key: K, value: V, ttl: Duration, on_expire: F) -> Option<V>
    where
        F: FnOnce(K, V) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let weak = Arc::downgrade(&self.inner);
        let timer_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(value) = take_if_current(&weak, &timer_key, generation) {
                on_expire(timer_key, value).await;
            }
        });

        let previous = inner.slots.insert(
            key,
            Slot {
                value,
                started_at: Instant::now(),
                ttl,
                generation,
                handle: task.abort_handle(),
            },
        );
        drop(inner);

        previous.map(|old| {
            old.handle.abort();
            old.value
        })
    }

    /// Removes the entry for `key`, aborting its timer.
    pub fn remove(&self, key: &K) -> Option<V> {
        let slot = self.inner.lock().slots.remove(key)?;
        slot.handle.abort();
        Some(slot.value)
    }

    /// Returns `true` if `key` has a live entry.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().slots.contains_key(key)
    }

    /// Time left before `key` expires, `max(0, ttl - elapsed)`.
    #[must_use]
    pub fn remaining(&self, key: &K) -> Option<Duration> {
        let inner = self.inner.lock();
        let slot = inner.slots.get(key)?;
        Some(slot.ttl.saturating_sub(slot.started_at.elapsed()))
    }

    /// Returns every live key with its remaining time, longest first.
    #[must_use]
    pub fn entries_by_remaining(&self) -> Vec<(K, Duration)> {
        let inner = self.inner.lock();
        let mut entries: Vec<(K, Duration)> = inner
            .slots
            .iter()
            .map(|(k, slot)| (k.clone(), slot.ttl.saturating_sub(slot.started_at.elapsed())))
            .collect();
        drop(inner);
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Returns `true` if there are no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }

    /// Aborts every timer and returns the values that were pending.
    pub fn clear(&self) -> Vec<(K, V)> {
        let mut inner = self.inner.lock();
        let drained: Vec<(K, V)> = inner
            .slots
            .drain()
            .map(|(k, slot)| {
                slot.handle.abort();
                (k, slot.value)
            })
            .collect();
        drop(inner);
        drained
    }
}

/// Removes the slot for `key` if it still belongs to `generation`.
fn take_if_current<K: Eq + Hash, V>(
    weak: &Weak<Mutex<ArenaInner<K, V>>>,
    key: &K,
    generation: u64,
) -> Option<V> {
    let inner = weak.upgrade()?;
    let mut guard = inner.lock();
    if guard.slots.get(key)?.generation != generation {
        return None;
    }
    guard.slots.remove(key).map(|slot| slot.value)
}
