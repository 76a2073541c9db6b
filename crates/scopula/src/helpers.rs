//! Free-standing declaration helpers that use the ambient current container.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::container::{Deps, ScopeInit};
use crate::context::current_container;
use crate::error::ScopeError;
use crate::namespace::Namespace;
use crate::resolver::{Args, Resolver, Resolvers};

/// Defines a dependency that is instantiated only the first time it is
/// resolved, in the current container.
///
/// # Errors
///
/// `ScopeError::NoCurrentContainer` if no container is installed.
///
/// # Example
///
/// ```
/// use scopula::{singleton, Container};
///
/// let container = Container::new();
/// let client = container.enter(|| singleton(|_| Ok(String::from("http client")))).unwrap();
/// assert!(std::sync::Arc::ptr_eq(&client.call().unwrap(), &client.call().unwrap()));
/// ```
pub fn singleton<T, F>(initializer: F) -> Result<Resolver, ScopeError>
where
    T: Any + Send + Sync,
    F: Fn(&Args) -> Result<T, ScopeError> + Send + Sync + 'static,
{
    let container = current_container().ok_or(ScopeError::NoCurrentContainer {
        operation: "singleton",
    })?;
    Ok(container.singleton(initializer))
}

/// Defines a dependency that is instantiated each time it is resolved, in
/// the current container.
///
/// # Errors
///
/// `ScopeError::NoCurrentContainer` if no container is installed.
pub fn factory<T, F>(initializer: F) -> Result<Resolver, ScopeError>
where
    T: Any + Send + Sync,
    F: Fn(&Args) -> Result<T, ScopeError> + Send + Sync + 'static,
{
    let container = current_container().ok_or(ScopeError::NoCurrentContainer {
        operation: "factory",
    })?;
    Ok(container.factory(initializer))
}

/// Defines a scope that is not tied to any container yet.
///
/// The container is looked up when the scope is called, so a scope can be
/// declared once and used by whichever container is current at the time.
///
/// # Example
///
/// ```
/// use scopula::{scope, singleton, Container, Resolvers};
///
/// let api = scope(|deps| {
///     Ok(Resolvers::new().with(
///         "base_url",
///         singleton(move |_| Ok(format!("https://{}", deps.resolve_as::<String>("host")?)))?,
///     ))
/// });
///
/// let container = Container::new();
/// let exports = container
///     .enter(|| {
///         api.call(Resolvers::new().with("host", scopula::Resolver::constant("example.com".to_string())))
///     })
///     .unwrap();
/// let resolved = container.resolve(&exports).unwrap();
/// assert_eq!(
///     resolved["base_url"].downcast_ref::<String>().map(String::as_str),
///     Some("https://example.com")
/// );
/// ```
pub fn scope<F>(initializer: F) -> DetachedScope
where
    F: Fn(Namespace) -> Result<Resolvers, ScopeError> + Send + Sync + 'static,
{
    DetachedScope {
        initializer: Arc::new(initializer),
    }
}

/// A scope declared with [`scope`], resolved against the current container
/// at call time.
#[derive(Clone)]
pub struct DetachedScope {
    initializer: Arc<ScopeInit>,
}

impl DetachedScope {
    /// Call the scope in the current container. See [`crate::Scope::call`].
    ///
    /// # Errors
    ///
    /// `ScopeError::NoCurrentContainer` if no container is installed, or
    /// whatever the scope initializer returns.
    pub fn call(&self, deps: impl Into<Deps>) -> Result<Namespace, ScopeError> {
        let container = current_container().ok_or(ScopeError::NoCurrentContainer {
            operation: "scope",
        })?;
        container
            .scope_with(Arc::clone(&self.initializer))
            .call(deps)
    }
}

impl fmt::Debug for DetachedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachedScope").finish_non_exhaustive()
    }
}
