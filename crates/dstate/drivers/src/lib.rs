//! dstate Drivers - lock and persister back-ends.
//!
//! - [`InMemoryLockCreator`]: exclusive per-reference leases in-process
//! - [`NoLockCreator`]: read-only access, every change refused
//! - [`InMemoryPersisterCreator`]: snapshots in a shared map
//! - [`DocumentPersisterCreator`]: one document per reference in a
//!   [`DocumentStore`] (in-memory, or PostgreSQL with the `postgres`
//!   feature)

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod document;
pub mod memory;
pub mod noop;

pub use document::{
    route_by_kind, Document, DocumentPersister, DocumentPersisterCreator, DocumentRoute,
    DocumentStore, InMemoryDocumentStore, RouteMapper,
};
#[cfg(feature = "postgres")]
pub use document::PostgresDocumentStore;
pub use memory::{InMemoryLock, InMemoryLockCreator, InMemoryPersister, InMemoryPersisterCreator};
pub use noop::{NoLock, NoLockCreator};
