//! Read-only access.

use std::sync::Arc;
use std::time::Duration;

use dstate_core::{Lock, LockCreator};
use dstate_types::{LockError, Reference, StateSnapshot};

/// Grants access immediately and refuses every change.
///
/// Acquire through this lock to read a machine's state without excluding
/// writers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLock;

impl Lock for NoLock {
    fn lock(&self, _lock_time: Duration, _timeout: Duration) -> Result<(), LockError> {
        Ok(())
    }

    fn unlock(&self) -> Result<(), LockError> {
        Ok(())
    }

    fn allow_change(&self, _: &StateSnapshot) -> bool {
        false
    }
}

/// Hands the same [`NoLock`] out for every reference.
#[derive(Debug)]
pub struct NoLockCreator {
    lock: Arc<NoLock>,
}

impl NoLockCreator {
    pub fn new() -> Self {
        Self {
            lock: Arc::new(NoLock),
        }
    }
}

impl Default for NoLockCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl LockCreator for NoLockCreator {
    fn get_or_create(&self, _: &Reference) -> Result<Arc<dyn Lock>, LockError> {
        Ok(self.lock.clone())
    }
}
