//! Name-keyed creator registries.
//!
//! Every [`Context`](crate::Context) owns one registry per creator kind.
//! There is no process-wide registry: register creators on the contexts
//! that need them before the first acquisition.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::lock::LockCreator;
use crate::persister::PersisterCreator;

/// Registry of creators keyed by name.
pub struct CreatorRegistry<C: ?Sized> {
    creators: DashMap<String, Arc<C>>,
}

/// Lock creators by name.
pub type LockCreators = CreatorRegistry<dyn LockCreator>;

/// Persister creators by name.
pub type PersisterCreators = CreatorRegistry<dyn PersisterCreator>;

impl<C: ?Sized> CreatorRegistry<C> {
    pub fn new() -> Self {
        Self {
            creators: DashMap::new(),
        }
    }

    /// Register a creator, returning the one previously registered under
    /// the same name.
    pub fn register(&self, name: impl Into<String>, creator: Arc<C>) -> Option<Arc<C>> {
        self.creators.insert(name.into(), creator)
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<C>> {
        self.creators.remove(name).map(|(_, creator)| creator)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.creators.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<C>> {
        self.creators.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.creators.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.creators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }
}

impl<C: ?Sized> Default for CreatorRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> fmt::Debug for CreatorRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatorRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::Lock;
    use dstate_types::{LockError, Reference, StateSnapshot};
    use std::time::Duration;

    struct Refusing;

    impl Lock for Refusing {
        fn lock(&self, _: Duration, _: Duration) -> Result<(), LockError> {
            Ok(())
        }

        fn unlock(&self) -> Result<(), LockError> {
            Ok(())
        }

        fn allow_change(&self, _: &StateSnapshot) -> bool {
            false
        }
    }

    struct RefusingCreator;

    impl LockCreator for RefusingCreator {
        fn get_or_create(&self, _: &Reference) -> Result<Arc<dyn Lock>, LockError> {
            Ok(Arc::new(Refusing))
        }
    }

    #[test]
    fn register_and_unregister() {
        let registry = LockCreators::new();
        assert!(registry.is_empty());

        assert!(registry.register("none", Arc::new(RefusingCreator)).is_none());
        assert!(registry.is_registered("none"));
        assert!(registry.get("none").is_some());

        assert!(registry.unregister("none").is_some());
        assert!(!registry.is_registered("none"));
        assert!(registry.unregister("none").is_none());
    }

    #[test]
    fn register_replaces_previous() {
        let registry = LockCreators::new();
        registry.register("lock", Arc::new(RefusingCreator));
        let previous = registry.register("lock", Arc::new(RefusingCreator));
        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn names_are_sorted() {
        let registry = LockCreators::new();
        registry.register("zeta", Arc::new(RefusingCreator));
        registry.register("alpha", Arc::new(RefusingCreator));
        assert_eq!(registry.names(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
