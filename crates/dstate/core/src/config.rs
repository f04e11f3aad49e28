//! Context defaults and per-call acquisition options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lock::LockCreator;
use crate::persister::PersisterCreator;

/// Conventional lease length for in-process locks.
pub const DEFAULT_LOCK_TIME: Duration = Duration::from_secs(3);

/// Conventional wait for a lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// Defaults held by one context.
///
/// Every field is optional; anything left unset is looked up on the
/// parent context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Name of the lock creator used when a call names none.
    pub lock_name: Option<String>,

    /// Name of the persister creator used when a call names none.
    pub persister_name: Option<String>,

    /// How long an acquired lock is held for.
    pub lock_time: Option<Duration>,

    /// How long to wait for a lock.
    pub lock_timeout: Option<Duration>,
}

impl ContextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply [`DEFAULT_LOCK_TIME`] and [`DEFAULT_LOCK_TIMEOUT`].
    pub fn with_standard_timing(self) -> Self {
        self.with_lock_time(DEFAULT_LOCK_TIME)
            .with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = Some(name.into());
        self
    }

    pub fn with_persister_name(mut self, name: impl Into<String>) -> Self {
        self.persister_name = Some(name.into());
        self
    }

    pub fn with_lock_time(mut self, lock_time: Duration) -> Self {
        self.lock_time = Some(lock_time);
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = Some(lock_timeout);
        self
    }
}

/// Per-call overrides for one acquisition.
#[derive(Clone, Default)]
pub struct AcquireOptions {
    /// Lock creator name; honoured anywhere up the context chain.
    pub lock_name: Option<String>,

    /// Persister creator name; honoured anywhere up the context chain.
    pub persister_name: Option<String>,

    pub lock_time: Option<Duration>,

    pub lock_timeout: Option<Duration>,

    /// Label used when nothing has been persisted for the reference yet.
    pub initial: Option<String>,

    /// Lock creator used for this call instead of name resolution.
    pub lock_creator: Option<Arc<dyn LockCreator>>,

    /// Persister creator used for this call instead of name resolution.
    pub persister_creator: Option<Arc<dyn PersisterCreator>>,
}

impl AcquireOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = Some(name.into());
        self
    }

    pub fn persister_name(mut self, name: impl Into<String>) -> Self {
        self.persister_name = Some(name.into());
        self
    }

    pub fn lock_time(mut self, lock_time: Duration) -> Self {
        self.lock_time = Some(lock_time);
        self
    }

    pub fn lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = Some(lock_timeout);
        self
    }

    pub fn initial(mut self, state: impl Into<String>) -> Self {
        self.initial = Some(state.into());
        self
    }

    pub fn with_lock_creator(mut self, creator: Arc<dyn LockCreator>) -> Self {
        self.lock_creator = Some(creator);
        self
    }

    pub fn with_persister_creator(mut self, creator: Arc<dyn PersisterCreator>) -> Self {
        self.persister_creator = Some(creator);
        self
    }
}

impl fmt::Debug for AcquireOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireOptions")
            .field("lock_name", &self.lock_name)
            .field("persister_name", &self.persister_name)
            .field("lock_time", &self.lock_time)
            .field("lock_timeout", &self.lock_timeout)
            .field("initial", &self.initial)
            .field("lock_creator", &self.lock_creator.is_some())
            .field("persister_creator", &self.persister_creator.is_some())
            .finish()
    }
}
