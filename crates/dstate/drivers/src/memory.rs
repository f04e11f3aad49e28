//! In-process lock and persister.
//!
//! Both are keyed by the full [`Reference`], so two kinds sharing an id
//! never collide. State lives only as long as the creator that owns it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dstate_core::{Lock, LockCreator, Persister, PersisterCreator};
use dstate_types::{LockError, PersistenceError, Reference, StateSnapshot};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// `now + span`, saturating far in the future instead of overflowing.
fn instant_after(now: Instant, span: Duration) -> Instant {
    now.checked_add(span)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lease {
    generation: u64,
    expires_at: Instant,
}

impl Lease {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct SlotState {
    current: Option<Lease>,
    next_generation: u64,
}

/// Exclusion domain shared by every handle to one reference.
#[derive(Debug, Default)]
struct LeaseSlot {
    state: Mutex<SlotState>,
    released: Condvar,
}

type Slots = Arc<DashMap<Reference, Arc<LeaseSlot>>>;

/// Exclusive in-process lease on one reference.
///
/// `lock_time` is the lease length: once it lapses a waiter may take the
/// lease over, and the previous holder can no longer write or release it.
#[derive(Debug)]
pub struct InMemoryLock {
    reference: Reference,
    slots: Slots,
    held: Mutex<Option<(Lease, Arc<LeaseSlot>)>>,
}

impl InMemoryLock {
    fn held(&self) -> Option<(Lease, Arc<LeaseSlot>)> {
        self.held.lock().clone()
    }

    fn slot(&self) -> Arc<LeaseSlot> {
        Arc::clone(self.slots.entry(self.reference.clone()).or_default().value())
    }
}

fn is_current(slot: &LeaseSlot, lease: Lease) -> bool {
    slot.state.lock().current.map(|l| l.generation) == Some(lease.generation)
}

impl Lock for InMemoryLock {
    fn lock(&self, lock_time: Duration, timeout: Duration) -> Result<(), LockError> {
        let deadline = instant_after(Instant::now(), timeout);
        let shared = self.slot();
        let mut slot = shared.state.lock();

        let lease = loop {
            let now = Instant::now();
            let current = slot.current;
            match current {
                Some(current) if current.is_live(now) => {
                    if now >= deadline {
                        debug!(reference = %self.reference, "Timed out waiting for lease");
                        return Err(LockError::Timeout {
                            reference: self.reference.clone(),
                            timeout,
                        });
                    }
                    let wake = deadline.min(current.expires_at);
                    shared.released.wait_until(&mut slot, wake);
                }
                previous => {
                    if previous.is_some() {
                        debug!(reference = %self.reference, "Taking over expired lease");
                    }
                    slot.next_generation += 1;
                    let lease = Lease {
                        generation: slot.next_generation,
                        expires_at: instant_after(now, lock_time),
                    };
                    slot.current = Some(lease);
                    break lease;
                }
            }
        };
        drop(slot);

        *self.held.lock() = Some((lease, shared));
        debug!(reference = %self.reference, generation = lease.generation, "Lease granted");
        Ok(())
    }

    fn unlock(&self) -> Result<(), LockError> {
        let (lease, shared) = self.held.lock().take().ok_or_else(|| LockError::NotHeld {
            reference: self.reference.clone(),
        })?;

        let mut slot = shared.state.lock();
        if slot.current.map(|l| l.generation) == Some(lease.generation) {
            slot.current = None;
            shared.released.notify_all();
            debug!(reference = %self.reference, generation = lease.generation, "Lease released");
        } else {
            // Someone took the lease over after it expired; it is theirs now.
            debug!(reference = %self.reference, generation = lease.generation, "Stale unlock ignored");
        }
        drop(slot);

        // Drop the slot once only the map and this handle still know it.
        self.slots.remove_if(&self.reference, |_, slot| {
            Arc::ptr_eq(slot, &shared)
                && Arc::strong_count(slot) == 2
                && slot.state.lock().current.is_none()
        });
        Ok(())
    }

    fn allow_change(&self, _: &StateSnapshot) -> bool {
        match self.held() {
            Some((lease, slot)) => lease.is_live(Instant::now()) && is_current(&slot, lease),
            None => false,
        }
    }

    fn is_expired(&self) -> bool {
        match self.held() {
            Some((lease, slot)) => !lease.is_live(Instant::now()) || !is_current(&slot, lease),
            None => false,
        }
    }
}

/// Hands out [`InMemoryLock`]s; equal references share one lease slot.
///
/// A slot exists while some handle is waiting on or holding it, and is
/// removed when the last holder unlocks.
#[derive(Debug, Default)]
pub struct InMemoryLockCreator {
    slots: Slots,
}

impl InMemoryLockCreator {
    pub fn new() -> Self {
        Self::default()
    }

    /// References with a live or contended slot.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

impl LockCreator for InMemoryLockCreator {
    fn get_or_create(&self, reference: &Reference) -> Result<Arc<dyn Lock>, LockError> {
        Ok(Arc::new(InMemoryLock {
            reference: reference.clone(),
            slots: Arc::clone(&self.slots),
            held: Mutex::new(None),
        }))
    }
}

/// Snapshot of one reference inside a shared map.
#[derive(Debug)]
pub struct InMemoryPersister {
    reference: Reference,
    records: Arc<DashMap<Reference, StateSnapshot>>,
}

impl Persister for InMemoryPersister {
    fn load(&self, default_state: &str) -> Result<StateSnapshot, PersistenceError> {
        Ok(self
            .records
            .get(&self.reference)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| StateSnapshot::seeded(default_state)))
    }

    fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistenceError> {
        self.records.insert(self.reference.clone(), snapshot.clone());
        Ok(())
    }
}

/// Persisters over one map owned by the creator.
#[derive(Debug, Default)]
pub struct InMemoryPersisterCreator {
    records: Arc<DashMap<Reference, StateSnapshot>>,
}

impl InMemoryPersisterCreator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved snapshot of `reference`, if any.
    pub fn snapshot(&self, reference: &Reference) -> Option<StateSnapshot> {
        self.records.get(reference).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl PersisterCreator for InMemoryPersisterCreator {
    fn get_or_create(&self, reference: &Reference) -> Result<Arc<dyn Persister>, PersistenceError> {
        Ok(Arc::new(InMemoryPersister {
            reference: reference.clone(),
            records: Arc::clone(&self.records),
        }))
    }
}
