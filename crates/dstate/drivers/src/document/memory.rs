//! In-memory document store.

use std::collections::HashMap;

use dstate_types::PersistenceError;
use parking_lot::RwLock;

use super::{Document, DocumentRoute, DocumentStore};

/// Documents grouped per route, kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<DocumentRoute, Vec<Document>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every document on `route`.
    pub fn documents(&self, route: &DocumentRoute) -> Vec<Document> {
        self.collections
            .read()
            .get(route)
            .cloned()
            .unwrap_or_default()
    }
}

fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(field, value)| document.get(field) == Some(value))
}

impl DocumentStore for InMemoryDocumentStore {
    fn find_one(
        &self,
        route: &DocumentRoute,
        filter: &Document,
    ) -> Result<Option<Document>, PersistenceError> {
        Ok(self
            .collections
            .read()
            .get(route)
            .and_then(|docs| docs.iter().find(|doc| matches(doc, filter)))
            .cloned())
    }

    fn upsert_one(
        &self,
        route: &DocumentRoute,
        filter: &Document,
        fields: &Document,
    ) -> Result<(), PersistenceError> {
        let mut collections = self.collections.write();
        let docs = collections.entry(route.clone()).or_default();

        match docs.iter_mut().find(|doc| matches(doc, filter)) {
            Some(doc) => {
                for (field, value) in fields {
                    doc.insert(field.clone(), value.clone());
                }
            }
            None => {
                let mut doc = filter.clone();
                for (field, value) in fields {
                    doc.insert(field.clone(), value.clone());
                }
                docs.push(doc);
            }
        }
        Ok(())
    }
}
