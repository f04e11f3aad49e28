//! Persister contract.
//!
//! Persisters never synchronise on their own: the broker only calls
//! [`Persister::save`] while the reference's lock is held.

use std::sync::Arc;

use dstate_types::{PersistenceError, Reference, StateSnapshot};

/// Durable storage of one reference's snapshot.
pub trait Persister: Send + Sync {
    /// Last saved snapshot, or one seeded with `default_state` if nothing
    /// was saved yet. Read-only.
    fn load(&self, default_state: &str) -> Result<StateSnapshot, PersistenceError>;

    /// Replace the stored snapshot. Idempotent for identical input.
    fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistenceError>;
}

/// Factory handing out the persister for a reference.
pub trait PersisterCreator: Send + Sync {
    fn get_or_create(&self, reference: &Reference) -> Result<Arc<dyn Persister>, PersistenceError>;
}
