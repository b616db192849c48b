// crates/survey-sync-core/src/runtime/single_flight.rs
// ============================================================================
// Module: Survey Sync Single Flight
// Description: Per-key coalescing of concurrent work.
// Purpose: Ensure one form install runs per form id at a time.
// Dependencies: std::sync
// ============================================================================

//! ## Overview
//! [`SingleFlight`] runs at most one closure per key at a time. The first
//! caller for a key becomes the leader and runs the work; callers arriving
//! while it runs block and receive a clone of the leader's outcome instead of
//! running the work again.
//!
//! A leader that unwinds abandons its flight: the key is released and the
//! waiting followers race to lead a fresh run.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

// ============================================================================
// SECTION: Flights
// ============================================================================

/// Progress of one flight.
enum Slot<V> {
    /// The leader is still running.
    Running,
    /// The leader published its outcome.
    Done(V),
    /// The leader unwound without an outcome.
    Abandoned,
}

/// Outcome slot shared between a leader and its followers.
struct Flight<V> {
    /// Leader progress.
    slot: Mutex<Slot<V>>,
    /// Signalled when the slot leaves `Running`.
    ready: Condvar,
    /// Callers that joined instead of leading.
    followers: AtomicUsize,
}

impl<V: Clone> Flight<V> {
    /// Creates a running flight.
    const fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Running),
            ready: Condvar::new(),
            followers: AtomicUsize::new(0),
        }
    }

    /// Publishes the leader outcome and wakes every follower.
    fn publish(&self, value: &V) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Slot::Done(value.clone());
        drop(slot);
        self.ready.notify_all();
    }

    /// Marks a still-running flight abandoned and wakes every follower.
    fn abandon(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*slot, Slot::Running) {
            *slot = Slot::Abandoned;
        }
        drop(slot);
        self.ready.notify_all();
    }

    /// Blocks until the leader finishes. Returns `None` when it unwound.
    fn wait(&self) -> Option<V> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match &*slot {
                Slot::Done(value) => return Some(value.clone()),
                Slot::Abandoned => return None,
                Slot::Running => {
                    slot = self.ready.wait(slot).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

/// Releases the leader's key on every exit path, unwinding included.
struct LeaderGuard<'a, K: Eq + Hash, V: Clone> {
    /// Owning coalescer.
    flights: &'a SingleFlight<K, V>,
    /// Key being led.
    key: &'a K,
    /// Flight being led.
    flight: Arc<Flight<V>>,
}

impl<K: Eq + Hash, V: Clone> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        self.flights.inflight.lock().unwrap_or_else(PoisonError::into_inner).remove(self.key);
        self.flight.abandon();
    }
}

/// Role of a caller for one attempt.
enum Role<V> {
    /// The caller runs the work.
    Leader(Arc<Flight<V>>),
    /// The caller waits for the running leader.
    Follower(Arc<Flight<V>>),
}

// ============================================================================
// SECTION: Single Flight
// ============================================================================

/// Per-key work coalescer.
pub struct SingleFlight<K, V> {
    /// Flights currently running, by key.
    inflight: Mutex<HashMap<K, Arc<Flight<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> SingleFlight<K, V> {
    /// Creates an empty coalescer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` for `key`, or joins the run already in progress.
    ///
    /// When the leader unwinds, its followers retry and one of them leads.
    pub fn run<F: FnOnce() -> V>(&self, key: &K, work: F) -> V {
        loop {
            match self.join(key) {
                Role::Leader(flight) => {
                    let guard = LeaderGuard {
                        flights: self,
                        key,
                        flight,
                    };
                    let value = work();
                    guard.flight.publish(&value);
                    drop(guard);
                    return value;
                }
                Role::Follower(flight) => {
                    if let Some(value) = flight.wait() {
                        return value;
                    }
                }
            }
        }
    }

    /// Returns true while work for `key` is running.
    #[must_use]
    pub fn is_running(&self, key: &K) -> bool {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }

    /// Registers the caller as leader or follower of the flight for `key`.
    fn join(&self, key: &K) -> Role<V> {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = inflight.get(key) {
            existing.followers.fetch_add(1, Ordering::SeqCst);
            return Role::Follower(Arc::clone(existing));
        }
        let flight = Arc::new(Flight::new());
        inflight.insert(key.clone(), Arc::clone(&flight));
        drop(inflight);
        Role::Leader(flight)
    }

    /// Returns how many callers joined the running flight for `key`.
    #[cfg(test)]
    fn followers(&self, key: &K) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |flight| flight.followers.load(Ordering::SeqCst))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
