//! Error taxonomy shared by every dstate crate.

use std::time::Duration;

use thiserror::Error;

use crate::reference::Reference;
use crate::snapshot::StateChange;

/// Configuration could not be resolved through the context chain.
///
/// Always raised before any lock is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no lock creator {name:?} resolvable from context '{context}'")]
    LockCreatorNotFound {
        context: String,
        name: Option<String>,
    },

    #[error("no persister creator {name:?} resolvable from context '{context}'")]
    PersisterCreatorNotFound {
        context: String,
        name: Option<String>,
    },

    #[error("lock_time is not configured from context '{context}' up to the root")]
    LockTimeMissing { context: String },

    #[error("lock_timeout is not configured from context '{context}' up to the root")]
    LockTimeoutMissing { context: String },

    #[error("context '{parent}' already has a child named '{name}'")]
    DuplicateChild { parent: String, name: String },
}

/// Lock back-end errors.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {timeout:?} waiting for lock on {reference}")]
    Timeout {
        reference: Reference,
        timeout: Duration,
    },

    #[error("lock on {reference} is not held")]
    NotHeld { reference: Reference },

    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Persister back-end errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid persisted record: {0}")]
    InvalidRecord(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialization(e.to_string())
    }
}

/// Errors surfaced by acquisitions and state mutations.
#[derive(Debug, Error)]
pub enum DStateError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// The lock refused the change; the in-memory state is unchanged.
    #[error("change `{change}` to {reference} not allowed by its lock")]
    NotAllowedChange {
        change: StateChange,
        reference: Reference,
    },

    /// The lock did permit writes once but its lease has lapsed.
    #[error("lock on {reference} expired before change `{change}`")]
    LockExpired {
        change: StateChange,
        reference: Reference,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("invalid change: {0}")]
    InvalidChange(String),

    #[error("state machine error: {0}")]
    Machine(String),
}

impl DStateError {
    /// True for both rejection variants; an expired lease is a rejection.
    pub fn is_rejected_change(&self) -> bool {
        self.rejected_change().is_some()
    }

    /// The refused change and the reference it targeted.
    pub fn rejected_change(&self) -> Option<(&StateChange, &Reference)> {
        match self {
            DStateError::NotAllowedChange { change, reference }
            | DStateError::LockExpired { change, reference } => Some((change, reference)),
            _ => None,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, DStateError::Config(_))
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, DStateError::Lock(LockError::Timeout { .. }))
    }
}

/// Result type for dstate operations.
pub type Result<T> = std::result::Result<T, DStateError>;
