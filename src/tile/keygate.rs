//! Per-key single-flight gate.
//!
//! When several tasks want the same key at once, only the first runs
//! the underlying operation; the rest subscribe to its result. This
//! bounds concurrent network traffic to at most one in-flight request
//! per tile key.
//!
//! ```text
//! request A ─┐
//! request B ─┼──► Keygate ──► one fetch ──► broadcast to A, B, C
//! request C ─┘
//! ```
//!
//! Buckets live in a `DashMap` for lock-free registration and are
//! reaped as soon as their operation completes or aborts.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Broadcast capacity per bucket; concurrent interest in one key is
/// typically small.
const BUCKET_CAPACITY: usize = 16;

/// Snapshot of gate effectiveness counters.
#[derive(Debug, Default, Clone)]
pub struct KeygateStats {
    pub total_requests: u64,
    pub coalesced_requests: u64,
    pub new_requests: u64,
}

impl KeygateStats {
    /// Fraction of requests that piggybacked on in-flight work.
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

/// Outcome of registering interest in a key.
pub enum GateEntry<V> {
    /// First arrival: the caller runs the operation and must call
    /// [`Keygate::complete`] (or [`Keygate::abort`]) when done.
    Runner,
    /// Another task is already running this key; wait for its result.
    Waiter(broadcast::Receiver<V>),
}

impl<V: Clone> GateEntry<V> {
    pub fn is_runner(&self) -> bool {
        matches!(self, GateEntry::Runner)
    }

    /// Waits for the runner's result. Returns `None` for a runner
    /// entry, or when the runner aborted without producing a result
    /// (the caller should re-register and run the operation itself).
    pub async fn wait(self) -> Option<V> {
        match self {
            GateEntry::Runner => None,
            GateEntry::Waiter(mut rx) => rx.recv().await.ok(),
        }
    }
}

/// Single-flight map from key to in-flight result channel.
pub struct Keygate<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    in_flight: DashMap<K, broadcast::Sender<V>>,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
    new_requests: AtomicU64,
}

impl<K, V> Keygate<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            total_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
            new_requests: AtomicU64::new(0),
        }
    }

    /// Registers interest in `key`. The entry API makes the
    /// check-and-insert atomic, so exactly one concurrent caller
    /// becomes the runner.
    pub fn register(&self, key: K) -> GateEntry<V> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        match self.in_flight.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let rx = entry.get().subscribe();
                self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                debug!(key = ?entry.key(), "Coalescing request onto in-flight fetch");
                GateEntry::Waiter(rx)
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(BUCKET_CAPACITY);
                entry.insert(tx);
                self.new_requests.fetch_add(1, Ordering::Relaxed);
                GateEntry::Runner
            }
        }
    }

    /// Publishes the runner's result to every waiter and reaps the
    /// bucket.
    pub fn complete(&self, key: &K, value: V) {
        if let Some((_, tx)) = self.in_flight.remove(key) {
            let waiters = tx.receiver_count();
            let _ = tx.send(value);
            if waiters > 0 {
                debug!(key = ?key, waiters, "Broadcast result to coalesced waiters");
            }
        }
    }

    /// Reaps the bucket without a result. Waiters observe a closed
    /// channel and re-register.
    pub fn abort(&self, key: &K) {
        if self.in_flight.remove(key).is_some() {
            debug!(key = ?key, "Aborted in-flight fetch; waiters will re-register");
        }
    }

    /// Number of keys currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> KeygateStats {
        KeygateStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            new_requests: self.new_requests.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Default for Keygate<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
