//! dstate Types - value types shared by the dstate crates.
//!
//! - [`Reference`]: which state-machine instance is addressed
//! - [`StateSnapshot`]: the durable form of its state
//! - [`StateChange`]: one proposed mutation, carried by rejection errors
//! - [`DStateError`] and friends: the error taxonomy

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
mod reference;
mod snapshot;

pub use error::{ConfigError, DStateError, LockError, PersistenceError, Result};
pub use reference::{key, KeyValue, MachineKind, Reference, ReferenceKey};
pub use snapshot::{StateChange, StateSnapshot, ATTRS_FIELD, STATE_FIELD};
