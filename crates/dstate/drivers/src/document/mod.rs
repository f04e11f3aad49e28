//! Persistence into document stores.
//!
//! Each reference maps to one document, found by using the reference key
//! verbatim as the filter. Saves upsert the `state` and `attrs` fields and
//! leave any other fields of the document alone.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::InMemoryDocumentStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDocumentStore;

use std::fmt;
use std::sync::Arc;

use dstate_core::{Persister, PersisterCreator};
use dstate_types::{PersistenceError, Reference, StateSnapshot, ATTRS_FIELD, STATE_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// A JSON object stored in a document store.
pub type Document = Map<String, Value>;

/// Where the documents of a reference live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRoute {
    pub database: String,
    pub collection: String,
}

impl DocumentRoute {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for DocumentRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Chooses the route of a reference.
pub type RouteMapper = Arc<dyn Fn(&Reference) -> DocumentRoute + Send + Sync>;

/// One collection per machine kind inside `database`.
pub fn route_by_kind(database: impl Into<String>) -> RouteMapper {
    let database = database.into();
    Arc::new(move |reference: &Reference| {
        DocumentRoute::new(database.clone(), reference.kind().as_str())
    })
}

/// Minimal document database surface.
pub trait DocumentStore: Send + Sync {
    /// First document on `route` whose fields include every `filter` field.
    fn find_one(
        &self,
        route: &DocumentRoute,
        filter: &Document,
    ) -> Result<Option<Document>, PersistenceError>;

    /// Merge `fields` into the matching document, or insert `filter`
    /// merged with `fields` when none matches.
    fn upsert_one(
        &self,
        route: &DocumentRoute,
        filter: &Document,
        fields: &Document,
    ) -> Result<(), PersistenceError>;
}

/// Persister for one reference's document.
pub struct DocumentPersister {
    store: Arc<dyn DocumentStore>,
    route: DocumentRoute,
    filter: Document,
}

impl DocumentPersister {
    pub fn new(store: Arc<dyn DocumentStore>, route: DocumentRoute, reference: &Reference) -> Self {
        Self {
            store,
            route,
            filter: reference.key_document(),
        }
    }

    pub fn route(&self) -> &DocumentRoute {
        &self.route
    }
}

fn snapshot_from_document(document: &Document) -> Result<StateSnapshot, PersistenceError> {
    let state = match document.get(STATE_FIELD) {
        Some(Value::String(state)) => state.clone(),
        Some(other) => {
            return Err(PersistenceError::InvalidRecord(format!(
                "'{STATE_FIELD}' must be a string, got {other}"
            )))
        }
        None => {
            return Err(PersistenceError::InvalidRecord(format!(
                "document has no '{STATE_FIELD}' field"
            )))
        }
    };
    let attrs = match document.get(ATTRS_FIELD) {
        Some(Value::Object(attrs)) => attrs.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            return Err(PersistenceError::InvalidRecord(format!(
                "'{ATTRS_FIELD}' must be an object, got {other}"
            )))
        }
    };
    Ok(StateSnapshot::new(state, attrs))
}

fn document_from_snapshot(snapshot: &StateSnapshot) -> Document {
    let mut fields = Document::new();
    fields.insert(STATE_FIELD.to_string(), Value::String(snapshot.state.clone()));
    fields.insert(ATTRS_FIELD.to_string(), Value::Object(snapshot.attrs.clone()));
    fields
}

impl Persister for DocumentPersister {
    fn load(&self, default_state: &str) -> Result<StateSnapshot, PersistenceError> {
        match self.store.find_one(&self.route, &self.filter)? {
            Some(document) => snapshot_from_document(&document),
            None => Ok(StateSnapshot::seeded(default_state)),
        }
    }

    fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistenceError> {
        self.store
            .upsert_one(&self.route, &self.filter, &document_from_snapshot(snapshot))?;
        debug!(route = %self.route, state = %snapshot.state, "Document saved");
        Ok(())
    }
}

impl fmt::Debug for DocumentPersister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentPersister")
            .field("route", &self.route)
            .field("filter", &self.filter)
            .finish()
    }
}

/// Persisters over one shared store, routed per reference.
pub struct DocumentPersisterCreator {
    store: Arc<dyn DocumentStore>,
    routes: RouteMapper,
}

impl DocumentPersisterCreator {
    pub fn new(store: Arc<dyn DocumentStore>, routes: RouteMapper) -> Self {
        Self { store, routes }
    }
}

impl PersisterCreator for DocumentPersisterCreator {
    fn get_or_create(&self, reference: &Reference) -> Result<Arc<dyn Persister>, PersistenceError> {
        let route = (self.routes)(reference);
        Ok(Arc::new(DocumentPersister::new(
            Arc::clone(&self.store),
            route,
            reference,
        )))
    }
}

impl fmt::Debug for DocumentPersisterCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentPersisterCreator").finish_non_exhaustive()
    }
}
