//! The mutable state container handed to state-machine engines.
//!
//! A [`State`] lives in two phases. While [`Building`](Phase::Building),
//! writes are applied directly so an engine can set itself up. After
//! [`State::seal`] every write is first offered to the container's
//! [`ChangeApplier`]; it only lands in memory once the applier accepts it.

use std::fmt;
use std::sync::Arc;

use dstate_types::{DStateError, Result, StateChange, StateSnapshot};
use serde_json::{Map, Value};
use tracing::debug;

/// Checked-mutation path invoked for every write to a sealed [`State`].
pub trait ChangeApplier: Send + Sync {
    /// Accept or refuse `change`. `candidate` is the snapshot the state
    /// would hold afterwards.
    fn apply(&self, change: &StateChange, candidate: &StateSnapshot) -> Result<()>;
}

/// Write phase of a [`State`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Construction: writes are raw.
    Building,
    /// In use: writes go through the change applier.
    Sealed,
}

/// Runtime state container of one acquired state machine.
pub struct State {
    snapshot: StateSnapshot,
    applier: Arc<dyn ChangeApplier>,
    phase: Phase,
}

impl State {
    pub fn new(snapshot: StateSnapshot, applier: Arc<dyn ChangeApplier>) -> Self {
        Self {
            snapshot,
            applier,
            phase: Phase::Building,
        }
    }

    /// Current state label.
    pub fn state(&self) -> &str {
        &self.snapshot.state
    }

    pub fn attrs(&self) -> &Map<String, Value> {
        &self.snapshot.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.snapshot.attrs.get(name)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_sealed(&self) -> bool {
        self.phase == Phase::Sealed
    }

    /// End construction; from now on every write is checked.
    pub fn seal(&mut self) {
        self.phase = Phase::Sealed;
    }

    /// Copy of the current durable form.
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot.clone()
    }

    pub fn set_state(&mut self, state: impl Into<String>) -> Result<()> {
        self.apply(StateChange::set_state(state))
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.apply(StateChange::set_attr(name, value))
    }

    pub fn remove_attr(&mut self, name: impl Into<String>) -> Result<()> {
        self.apply(StateChange::remove_attr(name))
    }

    /// Generic field write: `"state"` sets the label, anything else an
    /// attribute.
    pub fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        let change = StateChange::from_field(name, value).map_err(|value| {
            DStateError::InvalidChange(format!("field '{name}' must be a string, got {value}"))
        })?;
        self.apply(change)
    }

    /// Apply one change according to the current phase.
    ///
    /// On error the container is left exactly as it was.
    pub fn apply(&mut self, change: StateChange) -> Result<()> {
        if self.phase == Phase::Building {
            change.apply_to(&mut self.snapshot);
            return Ok(());
        }

        debug!(change = %change, "State machine wants change");

        let mut candidate = self.snapshot.clone();
        change.apply_to(&mut candidate);

        self.applier.apply(&change, &candidate)?;

        self.snapshot = candidate;
        debug!(change = %change, state = %self.snapshot.state, "State machine made change");
        Ok(())
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("snapshot", &self.snapshot)
            .field("phase", &self.phase)
            .finish()
    }
}
