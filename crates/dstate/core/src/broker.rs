//! Acquisition of locked, persisted state machines.
//!
//! An acquisition runs, in order:
//!
//! 1. build the [`Reference`] from the machine kind and key
//! 2. resolve creators and timings through the context chain
//! 3. obtain the lock for the reference and call `lock()`
//! 4. obtain the persister and `load()` the snapshot
//! 5. build the engine in the building phase, then seal its state
//!
//! Any failure after step 3 releases the lock before returning. A granted
//! acquisition is released exactly once, by [`MachineGuard::release`] or by
//! dropping the guard (also during unwinding).

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use dstate_types::{
    DStateError, MachineKind, Reference, ReferenceKey, Result, StateChange, StateSnapshot,
};
use tracing::{debug, info, instrument, warn};

use crate::config::AcquireOptions;
use crate::context::Context;
use crate::lock::Lock;
use crate::persister::Persister;
use crate::state::{ChangeApplier, State};

/// A user-defined engine driven over a [`State`].
///
/// ```
/// use dstate_core::{Result, State, StateMachine};
///
/// struct Door {
///     state: State,
/// }
///
/// impl StateMachine for Door {
///     const KIND: &'static str = "door";
///     const INITIAL: &'static str = "closed";
///
///     fn from_state(state: State) -> Result<Self> {
///         Ok(Self { state })
///     }
///
///     fn state(&self) -> &State {
///         &self.state
///     }
///
///     fn state_mut(&mut self) -> &mut State {
///         &mut self.state
///     }
/// }
/// ```
pub trait StateMachine: Sized {
    /// Kind used in every [`Reference`] to this machine type.
    const KIND: &'static str;

    /// Label used when nothing is persisted for a reference yet.
    const INITIAL: &'static str;

    /// Build the engine over a state still in its building phase.
    ///
    /// Writes made here are not checked against the lock and not saved.
    fn from_state(state: State) -> Result<Self>;

    fn state(&self) -> &State;

    fn state_mut(&mut self) -> &mut State;

    fn kind() -> MachineKind {
        MachineKind::new(Self::KIND)
    }
}

/// Write-ahead applier bound to one acquisition.
///
/// A change is checked against the lock, then saved; only then does the
/// [`State`] adopt it.
pub struct GuardedChangeApplier {
    reference: Reference,
    lock: Arc<dyn Lock>,
    persister: Arc<dyn Persister>,
}

impl GuardedChangeApplier {
    pub fn new(reference: Reference, lock: Arc<dyn Lock>, persister: Arc<dyn Persister>) -> Self {
        Self {
            reference,
            lock,
            persister,
        }
    }
}

impl ChangeApplier for GuardedChangeApplier {
    fn apply(&self, change: &StateChange, candidate: &StateSnapshot) -> Result<()> {
        if !self.lock.allow_change(candidate) {
            let change = change.clone();
            let reference = self.reference.clone();
            if self.lock.is_expired() {
                warn!(reference = %reference, change = %change, "Lock expired, change refused");
                return Err(DStateError::LockExpired { change, reference });
            }
            warn!(reference = %reference, change = %change, "Change not allowed by lock");
            return Err(DStateError::NotAllowedChange { change, reference });
        }

        self.persister.save(candidate)?;
        Ok(())
    }
}

impl fmt::Debug for GuardedChangeApplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedChangeApplier")
            .field("reference", &self.reference)
            .finish()
    }
}

/// A granted lock; unlocks once, on release or drop.
struct LockHold {
    reference: Reference,
    lock: Arc<dyn Lock>,
    released: bool,
}

impl LockHold {
    fn new(reference: Reference, lock: Arc<dyn Lock>) -> Self {
        Self {
            reference,
            lock,
            released: false,
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.lock.unlock()?;
        info!(reference = %self.reference, "Lock released");
        Ok(())
    }
}

impl Drop for LockHold {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(reference = %self.reference, error = %e, "Failed to release lock");
        }
    }
}

/// Exclusive access to an acquired state machine.
///
/// Dereferences to the engine. The lock is released when the guard is
/// dropped, or explicitly through [`MachineGuard::release`].
pub struct MachineGuard<M> {
    // Declared before `hold`: the engine is dropped while still locked.
    machine: M,
    hold: LockHold,
}

impl<M> MachineGuard<M> {
    pub fn reference(&self) -> &Reference {
        &self.hold.reference
    }

    /// Release the lock now, surfacing an unlock failure.
    pub fn release(mut self) -> Result<()> {
        self.hold.release()
    }
}

impl<M> Deref for MachineGuard<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.machine
    }
}

impl<M> DerefMut for MachineGuard<M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.machine
    }
}

impl<M: fmt::Debug> fmt::Debug for MachineGuard<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineGuard")
            .field("reference", &self.hold.reference)
            .field("machine", &self.machine)
            .finish()
    }
}

/// Exclusive access to a bare [`State`], without an engine.
pub struct StateGuard {
    state: State,
    hold: LockHold,
}

impl StateGuard {
    pub fn reference(&self) -> &Reference {
        &self.hold.reference
    }

    pub fn release(mut self) -> Result<()> {
        self.hold.release()
    }
}

impl Deref for StateGuard {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

impl DerefMut for StateGuard {
    fn deref_mut(&mut self) -> &mut State {
        &mut self.state
    }
}

impl fmt::Debug for StateGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateGuard")
            .field("reference", &self.hold.reference)
            .field("state", &self.state)
            .finish()
    }
}

impl Context {
    /// Acquire the machine of type `M` addressed by `key`.
    #[instrument(skip(self, key, options), fields(context = %self.name(), kind = M::KIND, key = ?key))]
    pub fn acquire_machine<M: StateMachine>(
        &self,
        key: ReferenceKey,
        options: AcquireOptions,
    ) -> Result<MachineGuard<M>> {
        let reference = Reference::from_parts(M::kind(), key);
        let default_state = options.initial.as_deref().unwrap_or(M::INITIAL);
        let (state, hold) = self.acquire_parts(reference, default_state, &options)?;

        // `hold` unlocks if the engine refuses to build.
        let mut machine = M::from_state(state)?;
        machine.state_mut().seal();

        debug!(
            reference = %hold.reference,
            state = %machine.state().state(),
            "State machine built"
        );
        Ok(MachineGuard { machine, hold })
    }

    /// Acquire the bare state of `kind`/`key`.
    ///
    /// `default_state` seeds a reference with nothing persisted;
    /// [`AcquireOptions::initial`] takes precedence when set.
    #[instrument(skip(self, kind, key, options), fields(context = %self.name(), key = ?key))]
    pub fn acquire_state(
        &self,
        kind: impl Into<MachineKind>,
        key: ReferenceKey,
        default_state: &str,
        options: AcquireOptions,
    ) -> Result<StateGuard> {
        let reference = Reference::from_parts(kind.into(), key);
        let default_state = options.initial.as_deref().unwrap_or(default_state);
        let (mut state, hold) = self.acquire_parts(reference, default_state, &options)?;
        state.seal();

        debug!(reference = %hold.reference, "State sealed");
        Ok(StateGuard { state, hold })
    }

    /// Acquire, run `f`, release.
    ///
    /// An error from `f` wins over an error from releasing the lock.
    #[instrument(skip(self, key, options, f), fields(context = %self.name(), kind = M::KIND))]
    pub fn with_machine<M, R, F>(&self, key: ReferenceKey, options: AcquireOptions, f: F) -> Result<R>
    where
        M: StateMachine,
        F: FnOnce(&mut M) -> Result<R>,
    {
        let mut guard = self.acquire_machine::<M>(key, options)?;
        let outcome = f(&mut guard.machine);
        let released = guard.release();
        let value = outcome?;
        released?;
        Ok(value)
    }

    fn acquire_parts(
        &self,
        reference: Reference,
        default_state: &str,
        options: &AcquireOptions,
    ) -> Result<(State, LockHold)> {
        let resolution = self.resolve(options)?;
        debug!(
            reference = %reference,
            lock = %resolution.lock.name,
            persister = %resolution.persister.name,
            lock_time = ?resolution.lock_time,
            lock_timeout = ?resolution.lock_timeout,
            "Resolved acquisition"
        );

        let lock = resolution.lock.creator.get_or_create(&reference)?;
        lock.lock(resolution.lock_time, resolution.lock_timeout)?;
        debug!(reference = %reference, "Lock granted");

        // From here on, every early return drops `hold` and unlocks.
        let hold = LockHold::new(reference.clone(), Arc::clone(&lock));

        let persister = resolution.persister.creator.get_or_create(&reference)?;
        let snapshot = persister.load(default_state)?;
        info!(
            reference = %reference,
            lock = %resolution.lock.name,
            persister = %resolution.persister.name,
            state = %snapshot.state,
            "Acquisition granted"
        );

        let applier = GuardedChangeApplier::new(reference, lock, persister);
        Ok((State::new(snapshot, Arc::new(applier)), hold))
    }
}
