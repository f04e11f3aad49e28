//! Hierarchical configuration scopes.
//!
//! A [`Context`] holds its own creator registries and defaults and
//! delegates everything it lacks to its parent. Children are owned by the
//! parent (for enumeration) and point back through a `Weak` link, so a
//! child never keeps its parent alive.
//!
//! Resolution rules:
//!
//! - creator names: at each level try the call's explicit name, else that
//!   level's own default; use it if registered there, otherwise go up with
//!   the same explicit name. Explicit names are global to the call,
//!   defaults are local to their context.
//! - timings: explicit value, else the nearest context that sets one.
//! - nothing found up to the root is a [`ConfigError`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dstate_types::ConfigError;
use parking_lot::RwLock;

use crate::config::{AcquireOptions, ContextConfig};
use crate::lock::LockCreator;
use crate::persister::PersisterCreator;
use crate::registry::{LockCreators, PersisterCreators};

/// Name reported for creators supplied directly in [`AcquireOptions`].
pub const PER_CALL_CREATOR: &str = "(per-call)";

/// A creator found by resolution, with where it was found.
pub struct ResolvedCreator<C: ?Sized> {
    /// Name the creator is registered under.
    pub name: String,
    /// Path of the context that holds the registration.
    pub context: String,
    pub creator: Arc<C>,
}

impl<C: ?Sized> fmt::Debug for ResolvedCreator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCreator")
            .field("name", &self.name)
            .field("context", &self.context)
            .finish()
    }
}

/// Everything an acquisition needs before touching a lock.
#[derive(Debug)]
pub struct Resolution {
    pub lock: ResolvedCreator<dyn LockCreator>,
    pub persister: ResolvedCreator<dyn PersisterCreator>,
    pub lock_time: Duration,
    pub lock_timeout: Duration,
}

/// A node in the tree of configuration scopes.
pub struct Context {
    name: String,
    config: ContextConfig,
    lock_creators: LockCreators,
    persister_creators: PersisterCreators,
    parent: Option<Weak<Context>>,
    children: RwLock<BTreeMap<String, Arc<Context>>>,
}

impl Context {
    /// Create a root context.
    pub fn root(name: impl Into<String>, config: ContextConfig) -> Arc<Self> {
        Arc::new(Self::with_parent(name.into(), config, None))
    }

    fn with_parent(name: String, config: ContextConfig, parent: Option<Weak<Context>>) -> Self {
        Self {
            name,
            config,
            lock_creators: LockCreators::new(),
            persister_creators: PersisterCreators::new(),
            parent,
            children: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a named child that inherits everything it does not override.
    pub fn make_child_context(
        self: &Arc<Self>,
        name: impl Into<String>,
        config: ContextConfig,
    ) -> Result<Arc<Context>, ConfigError> {
        let name = name.into();
        let mut children = self.children.write();
        if children.contains_key(&name) {
            return Err(ConfigError::DuplicateChild {
                parent: self.path(),
                name,
            });
        }

        let child = Arc::new(Self::with_parent(
            name.clone(),
            config,
            Some(Arc::downgrade(self)),
        ));
        children.insert(name, Arc::clone(&child));
        Ok(child)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn lock_creators(&self) -> &LockCreators {
        &self.lock_creators
    }

    pub fn persister_creators(&self) -> &PersisterCreators {
        &self.persister_creators
    }

    /// The enclosing context, if it is still alive.
    pub fn parent(&self) -> Option<Arc<Context>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn child(&self, name: &str) -> Option<Arc<Context>> {
        self.children.read().get(name).cloned()
    }

    /// Names of the direct children, sorted.
    pub fn children(&self) -> Vec<String> {
        self.children.read().keys().cloned().collect()
    }

    pub fn remove_child(&self, name: &str) -> Option<Arc<Context>> {
        self.children.write().remove(name)
    }

    /// Slash-separated names from the root down to this context.
    pub fn path(&self) -> String {
        let mut names = vec![self.name.clone()];
        let mut next = self.parent();
        while let Some(ctx) = next {
            names.push(ctx.name.clone());
            next = ctx.parent();
        }
        names.reverse();
        names.join("/")
    }

    /// First answer from this context or its ancestors, nearest first.
    fn find_up<T>(&self, mut lookup: impl FnMut(&Context) -> Option<T>) -> Option<T> {
        if let Some(found) = lookup(self) {
            return Some(found);
        }
        let mut next = self.parent();
        while let Some(ctx) = next {
            if let Some(found) = lookup(ctx.as_ref()) {
                return Some(found);
            }
            next = ctx.parent();
        }
        None
    }

    pub fn resolve_lock_creator(
        &self,
        explicit: Option<&str>,
    ) -> Result<ResolvedCreator<dyn LockCreator>, ConfigError> {
        self.find_up(|ctx| {
            let name = explicit.or(ctx.config.lock_name.as_deref())?;
            ctx.lock_creators.get(name).map(|creator| ResolvedCreator {
                name: name.to_string(),
                context: ctx.path(),
                creator,
            })
        })
        .ok_or_else(|| ConfigError::LockCreatorNotFound {
            context: self.path(),
            name: explicit
                .map(str::to_string)
                .or_else(|| self.config.lock_name.clone()),
        })
    }

    pub fn resolve_persister_creator(
        &self,
        explicit: Option<&str>,
    ) -> Result<ResolvedCreator<dyn PersisterCreator>, ConfigError> {
        self.find_up(|ctx| {
            let name = explicit.or(ctx.config.persister_name.as_deref())?;
            ctx.persister_creators.get(name).map(|creator| ResolvedCreator {
                name: name.to_string(),
                context: ctx.path(),
                creator,
            })
        })
        .ok_or_else(|| ConfigError::PersisterCreatorNotFound {
            context: self.path(),
            name: explicit
                .map(str::to_string)
                .or_else(|| self.config.persister_name.clone()),
        })
    }

    pub fn resolve_lock_time(&self, explicit: Option<Duration>) -> Result<Duration, ConfigError> {
        explicit
            .or_else(|| self.find_up(|ctx| ctx.config.lock_time))
            .ok_or_else(|| ConfigError::LockTimeMissing {
                context: self.path(),
            })
    }

    pub fn resolve_lock_timeout(
        &self,
        explicit: Option<Duration>,
    ) -> Result<Duration, ConfigError> {
        explicit
            .or_else(|| self.find_up(|ctx| ctx.config.lock_timeout))
            .ok_or_else(|| ConfigError::LockTimeoutMissing {
                context: self.path(),
            })
    }

    /// Resolve creators and timings for one call.
    ///
    /// Creators passed directly in `options` win over name resolution.
    pub fn resolve(&self, options: &AcquireOptions) -> Result<Resolution, ConfigError> {
        let lock = match &options.lock_creator {
            Some(creator) => ResolvedCreator {
                name: PER_CALL_CREATOR.to_string(),
                context: self.path(),
                creator: Arc::clone(creator),
            },
            None => self.resolve_lock_creator(options.lock_name.as_deref())?,
        };
        let lock_time = self.resolve_lock_time(options.lock_time)?;
        let lock_timeout = self.resolve_lock_timeout(options.lock_timeout)?;
        let persister = match &options.persister_creator {
            Some(creator) => ResolvedCreator {
                name: PER_CALL_CREATOR.to_string(),
                context: self.path(),
                creator: Arc::clone(creator),
            },
            None => self.resolve_persister_creator(options.persister_name.as_deref())?,
        };

        Ok(Resolution {
            lock,
            persister,
            lock_time,
            lock_timeout,
        })
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("path", &self.path())
            .field("config", &self.config)
            .field("lock_creators", &self.lock_creators)
            .field("persister_creators", &self.persister_creators)
            .field("children", &self.children())
            .finish()
    }
}
