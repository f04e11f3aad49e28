//! # dstate Core - Locked, Persisted State-Machine Acquisition
//!
//! This crate brokers access to externally defined state machines whose
//! state must be durably persisted and mutated under mutual exclusion.
//!
//! ## Overview
//!
//! - **Contexts**: a tree of configuration scopes holding creator
//!   registries and timing defaults, resolved by walking up the tree
//! - **Locks**: pluggable exclusivity, checked before every write
//! - **Persisters**: pluggable storage, written before memory changes
//! - **State**: the container engines mutate; sealed after construction
//!
//! ## Key Components
//!
//! - [`Context`]: configuration scope and acquisition entry point
//! - [`StateMachine`]: what an engine implements to be acquired
//! - [`MachineGuard`] / [`StateGuard`]: scoped ownership, unlock on drop
//! - [`Lock`] / [`LockCreator`], [`Persister`] / [`PersisterCreator`]:
//!   the contracts back-ends implement
//!
//! ## Example
//!
//! ```rust,no_run
//! use dstate_core::{key, AcquireOptions, Context, ContextConfig, Result, State, StateMachine};
//!
//! struct TrafficLight {
//!     state: State,
//! }
//!
//! impl StateMachine for TrafficLight {
//!     const KIND: &'static str = "traffic_light";
//!     const INITIAL: &'static str = "green";
//!
//!     fn from_state(state: State) -> Result<Self> {
//!         Ok(Self { state })
//!     }
//!
//!     fn state(&self) -> &State {
//!         &self.state
//!     }
//!
//!     fn state_mut(&mut self) -> &mut State {
//!         &mut self.state
//!     }
//! }
//!
//! # fn example() -> Result<()> {
//! let ctx = Context::root("app", ContextConfig::new().with_standard_timing());
//! // Register lock and persister creators on `ctx` first.
//!
//! let mut light = ctx.acquire_machine::<TrafficLight>(key([("id", 1)]), AcquireOptions::new())?;
//! light.state_mut().set_state("yellow")?;
//! light.release()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod broker;
pub mod config;
pub mod context;
pub mod lock;
pub mod persister;
pub mod registry;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use broker::{GuardedChangeApplier, MachineGuard, StateGuard, StateMachine};
pub use config::{AcquireOptions, ContextConfig, DEFAULT_LOCK_TIME, DEFAULT_LOCK_TIMEOUT};
pub use context::{Context, Resolution, ResolvedCreator, PER_CALL_CREATOR};
pub use lock::{Lock, LockCreator};
pub use persister::{Persister, PersisterCreator};
pub use registry::{CreatorRegistry, LockCreators, PersisterCreators};
pub use state::{ChangeApplier, Phase, State};

pub use dstate_types::{
    key, ConfigError, DStateError, KeyValue, LockError, MachineKind, PersistenceError, Reference,
    ReferenceKey, Result, StateChange, StateSnapshot,
};
