//! Counting test doubles for locks and persisters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dstate_types::{LockError, PersistenceError, Reference, StateSnapshot};
use parking_lot::Mutex;

use crate::lock::{Lock, LockCreator};
use crate::persister::{Persister, PersisterCreator};

/// Route `tracing` output to the test harness; `RUST_LOG` filters it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
pub struct MockLock {
    pub allow: bool,
    pub time_out: bool,
    pub expired: AtomicBool,
    pub fail_unlock: bool,
    pub locks: AtomicUsize,
    pub unlocks: AtomicUsize,
    pub last_timing: Mutex<Option<(Duration, Duration)>>,
}

impl MockLock {
    pub fn locks(&self) -> usize {
        self.locks.load(Ordering::SeqCst)
    }

    pub fn unlocks(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }
}

impl Lock for MockLock {
    fn lock(&self, lock_time: Duration, timeout: Duration) -> Result<(), LockError> {
        *self.last_timing.lock() = Some((lock_time, timeout));
        if self.time_out {
            return Err(LockError::Timeout {
                reference: Reference::new("mock", [("id", 0)]),
                timeout,
            });
        }
        self.locks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unlock(&self) -> Result<(), LockError> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        if self.fail_unlock {
            return Err(LockError::Backend("unlock failed".into()));
        }
        Ok(())
    }

    fn allow_change(&self, _: &StateSnapshot) -> bool {
        self.allow && !self.is_expired()
    }

    fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}

/// Hands the same [`MockLock`] out for every reference.
pub struct MockLockCreator {
    lock: Arc<MockLock>,
    pub created: AtomicUsize,
}

impl MockLockCreator {
    pub fn with_lock(lock: MockLock) -> Self {
        Self {
            lock: Arc::new(lock),
            created: AtomicUsize::new(0),
        }
    }

    pub fn allowing() -> Self {
        Self::with_lock(MockLock {
            allow: true,
            ..Default::default()
        })
    }

    pub fn refusing() -> Self {
        Self::with_lock(MockLock::default())
    }

    pub fn timing_out() -> Self {
        Self::with_lock(MockLock {
            allow: true,
            time_out: true,
            ..Default::default()
        })
    }

    pub fn lock(&self) -> &Arc<MockLock> {
        &self.lock
    }
}

impl LockCreator for MockLockCreator {
    fn get_or_create(&self, _: &Reference) -> Result<Arc<dyn Lock>, LockError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock.clone())
    }
}

#[derive(Default)]
pub struct MockPersister {
    pub stored: Mutex<Option<StateSnapshot>>,
    pub fail_saves: bool,
    pub saves: AtomicUsize,
}

impl MockPersister {
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<StateSnapshot> {
        self.stored.lock().clone()
    }
}

impl Persister for MockPersister {
    fn load(&self, default_state: &str) -> Result<StateSnapshot, PersistenceError> {
        Ok(self
            .stored()
            .unwrap_or_else(|| StateSnapshot::seeded(default_state)))
    }

    fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistenceError> {
        if self.fail_saves {
            return Err(PersistenceError::Backend("disk full".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.stored.lock() = Some(snapshot.clone());
        Ok(())
    }
}

/// One [`MockPersister`] per reference.
#[derive(Default)]
pub struct MockPersisterCreator {
    fail_saves: bool,
    persisters: Mutex<HashMap<Reference, Arc<MockPersister>>>,
    pub created: AtomicUsize,
}

impl MockPersisterCreator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_saves() -> Self {
        Self {
            fail_saves: true,
            ..Default::default()
        }
    }

    pub fn persister(&self, reference: &Reference) -> Option<Arc<MockPersister>> {
        self.persisters.lock().get(reference).cloned()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl PersisterCreator for MockPersisterCreator {
    fn get_or_create(&self, reference: &Reference) -> Result<Arc<dyn Persister>, PersistenceError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let persister = self
            .persisters
            .lock()
            .entry(reference.clone())
            .or_insert_with(|| {
                Arc::new(MockPersister {
                    fail_saves: self.fail_saves,
                    ..Default::default()
                })
            })
            .clone();
        Ok(persister)
    }
}
