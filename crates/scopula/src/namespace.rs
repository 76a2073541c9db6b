//! Lazy, read-only views over a set of named resolvers.
//!
//! A [`Namespace`] is what a scope initializer receives as its dependencies
//! and what calling a scope returns as its exports. Its resolver set is
//! produced by a factory the first time anything asks for it.
//!
//! Reads come in two explicit flavors, [`Namespace::get`] for the resolver
//! and [`Namespace::resolve`] for its memoized value, plus [`Namespace::read`],
//! which picks one of the two from the namespace's mode at the time of the
//! read. Code written against `read` therefore gets deferred handles while
//! scopes are being declared and concrete values once dependencies are being
//! resolved, without knowing which phase it runs in.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::ScopeError;
use crate::resolver::{downcast, Resolver, Resolvers, Value};

/// Which meaning [`Namespace::read`] currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceMode {
    /// Reads hand back resolvers.
    Scopes,
    /// Reads hand back memoized resolved values.
    Dependencies,
}

/// Result of [`Namespace::read`].
#[derive(Debug, Clone)]
pub enum Entry {
    /// The raw resolver, read in [`NamespaceMode::Scopes`].
    Resolver(Resolver),
    /// The memoized value, read in [`NamespaceMode::Dependencies`].
    Value(Value),
}

impl Entry {
    /// The value, calling the resolver with no arguments if needed.
    pub fn into_value(self) -> Result<Value, ScopeError> {
        match self {
            Entry::Resolver(resolver) => resolver.call(),
            Entry::Value(value) => Ok(value),
        }
    }

    /// The resolver, if this entry is one.
    pub fn as_resolver(&self) -> Option<&Resolver> {
        match self {
            Entry::Resolver(resolver) => Some(resolver),
            Entry::Value(_) => None,
        }
    }

    /// The value, if this entry is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Entry::Resolver(_) => None,
            Entry::Value(value) => Some(value),
        }
    }
}

type ResolversFactory = dyn Fn() -> Result<Resolvers, ScopeError> + Send + Sync;
type ModeFn = dyn Fn() -> NamespaceMode + Send + Sync;

struct NamespaceInner {
    factory: Box<ResolversFactory>,
    mode: Box<ModeFn>,
    resolvers: Mutex<Option<Arc<Resolvers>>>,
    resolved: Mutex<HashMap<String, Value>>,
}

/// A lazy, read-only view over a resolver set.
///
/// Cheap to clone; clones share the resolver set and the value memo.
#[derive(Clone)]
pub struct Namespace {
    inner: Arc<NamespaceInner>,
}

impl Namespace {
    /// Create a namespace whose resolver set is built by `factory` on first
    /// use and whose [`read`](Namespace::read) behavior follows `mode`,
    /// consulted on every read.
    pub fn new<F, M>(factory: F, mode: M) -> Self
    where
        F: Fn() -> Result<Resolvers, ScopeError> + Send + Sync + 'static,
        M: Fn() -> NamespaceMode + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(NamespaceInner {
                factory: Box::new(factory),
                mode: Box::new(mode),
                resolvers: Mutex::new(None),
                resolved: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a namespace over an existing resolver set with a fixed mode.
    pub fn from_resolvers(resolvers: Resolvers, mode: NamespaceMode) -> Self {
        let resolvers = Arc::new(resolvers);
        let namespace = Self::new(|| Ok(Resolvers::new()), move || mode);
        *namespace.inner.resolvers.lock() = Some(resolvers);
        namespace
    }

    /// The resolver set, materializing it on first use.
    ///
    /// A failing factory is reported to the caller and tried again on the
    /// next access.
    pub fn resolvers(&self) -> Result<Arc<Resolvers>, ScopeError> {
        if let Some(resolvers) = self.inner.resolvers.lock().as_ref() {
            return Ok(Arc::clone(resolvers));
        }
        // Built without the lock held: the factory may run arbitrary user code.
        let built = Arc::new((self.inner.factory)()?);
        let mut slot = self.inner.resolvers.lock();
        Ok(Arc::clone(slot.get_or_insert(built)))
    }

    /// The current mode.
    pub fn mode(&self) -> NamespaceMode {
        (self.inner.mode)()
    }

    /// Returns true if the resolver set defines `name`.
    pub fn has(&self, name: &str) -> Result<bool, ScopeError> {
        Ok(self.resolvers()?.contains(name))
    }

    /// The raw resolver for `name`, regardless of mode.
    pub fn get(&self, name: &str) -> Result<Resolver, ScopeError> {
        self.resolvers()?
            .get(name)
            .cloned()
            .ok_or_else(|| ScopeError::UnresolvableName {
                name: name.to_string(),
            })
    }

    /// Alias of [`get`](Namespace::get), for callers that explicitly want the
    /// unresolved handle.
    pub fn call(&self, name: &str) -> Result<Resolver, ScopeError> {
        self.get(name)
    }

    /// The value of `name`.
    ///
    /// The first resolution calls the resolver with no arguments; later
    /// resolutions on this namespace (or any clone of it) return the same
    /// value, whatever the mode is by then.
    pub fn resolve(&self, name: &str) -> Result<Value, ScopeError> {
        if let Some(value) = self.inner.resolved.lock().get(name) {
            return Ok(Arc::clone(value));
        }
        let resolver = self.get(name)?;
        let value = resolver.call()?;
        let mut resolved = self.inner.resolved.lock();
        Ok(Arc::clone(
            resolved.entry(name.to_string()).or_insert(value),
        ))
    }

    /// The value of `name`, downcast to `T`.
    pub fn resolve_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ScopeError> {
        downcast(self.resolve(name)?, name)
    }

    /// Read `name` according to the current mode: the resolver in
    /// [`NamespaceMode::Scopes`], the memoized value in
    /// [`NamespaceMode::Dependencies`].
    pub fn read(&self, name: &str) -> Result<Entry, ScopeError> {
        let resolver = self.get(name)?;
        match self.mode() {
            NamespaceMode::Scopes => Ok(Entry::Resolver(resolver)),
            NamespaceMode::Dependencies => self.resolve(name).map(Entry::Value),
        }
    }

    /// Resolve every name, in declaration order, regardless of mode.
    pub fn resolve_all(&self) -> Result<IndexMap<String, Value>, ScopeError> {
        let resolvers = self.resolvers()?;
        resolvers
            .names()
            .map(|name| -> Result<(String, Value), ScopeError> {
                Ok((name.to_string(), self.resolve(name)?))
            })
            .collect()
    }

    /// Returns true if `name` has already been resolved on this namespace.
    pub fn is_resolved(&self, name: &str) -> bool {
        self.inner.resolved.lock().contains_key(name)
    }

    /// Namespaces are read-only; this always fails.
    pub fn set(&self, name: &str, _resolver: Resolver) -> Result<(), ScopeError> {
        Err(ScopeError::MutationForbidden {
            name: name.to_string(),
        })
    }

    /// The names of the resolver set, in declaration order.
    pub fn names(&self) -> Result<Vec<String>, ScopeError> {
        Ok(self.resolvers()?.names().map(str::to_string).collect())
    }

    /// Returns true if both handles are the same namespace.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self
            .inner
            .resolvers
            .lock()
            .as_ref()
            .map(|r| r.names().map(str::to_string).collect::<Vec<_>>());
        f.debug_struct("Namespace")
            .field("names", &names)
            .field("mode", &self.mode())
            .finish()
    }
}
