//! Lock contract.
//!
//! A [`Lock`] grants exclusive (or read-only) access to one [`Reference`]
//! and vetoes state changes once granted access no longer permits them.
//! [`LockCreator`]s hand out locks per reference; equal references must
//! coordinate through the same exclusion domain.

use std::sync::Arc;
use std::time::Duration;

use dstate_types::{LockError, Reference, StateSnapshot};

/// Exclusivity and write-permission provider for one reference.
///
/// Implementations may be shared between concurrent acquisitions of the
/// same reference, so every method takes `&self`.
pub trait Lock: Send + Sync {
    /// Block up to `timeout` trying to obtain exclusivity held for up to
    /// `lock_time`.
    fn lock(&self, lock_time: Duration, timeout: Duration) -> Result<(), LockError>;

    /// Release a previously obtained lock.
    ///
    /// The broker calls this exactly once per successful [`Lock::lock`].
    fn unlock(&self) -> Result<(), LockError>;

    /// Whether the proposed snapshot may be written. Must not block.
    fn allow_change(&self, candidate: &StateSnapshot) -> bool;

    /// Whether a previously granted lock has lapsed.
    ///
    /// Consulted only after [`Lock::allow_change`] refused, to tell an
    /// expired lease apart from a lock that never permitted writes.
    fn is_expired(&self) -> bool {
        false
    }
}

/// Factory handing out the lock for a reference.
pub trait LockCreator: Send + Sync {
    fn get_or_create(&self, reference: &Reference) -> Result<Arc<dyn Lock>, LockError>;
}
