//! Resolution sessions.
//!
//! A [`Container`] owns two graphs. Calling a [`Scope`] adds a node to the
//! *scope graph*; calling a singleton or factory [`Resolver`] adds a node to
//! the *dependency graph*. While any of those builders runs, the container
//! is installed as the ambient current container and its status says which
//! phase is active, which in turn decides what [`Namespace::read`] returns for
//! namespaces the container created.

use std::any::Any;
use std::fmt;
#[cfg(feature = "async-traverse")]
use std::future::Future;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::context::ContextGuard;
use crate::error::ScopeError;
use crate::graph::{Graph, GraphNode, NodeHandle};
use crate::key::NodeKey;
use crate::namespace::{Namespace, NamespaceMode};
use crate::resolver::{value, Args, Resolver, Resolvers, Value};
use crate::tracer::{GraphKind, NoopTracer, Tracer};

/// What a container is doing right now.
///
/// The status is set for the extent of a bound callback and restored when the
/// callback returns, so it always reflects the innermost active operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContainerStatus {
    /// No bound callback is running.
    #[default]
    Idle,
    /// A scope initializer is running.
    ResolvingScopes,
    /// A singleton or factory initializer (or [`Container::resolve`]) is running.
    ResolvingDependencies,
}

pub(crate) type ScopeInit = dyn Fn(Namespace) -> Result<Resolvers, ScopeError> + Send + Sync;
type DepsFactory = dyn Fn() -> Result<Resolvers, ScopeError> + Send + Sync;

/// The dependencies a scope is called with.
#[derive(Clone, Default)]
pub enum Deps {
    /// No dependencies: the scope sees an empty namespace.
    #[default]
    None,
    /// An existing namespace, typically the one a parent scope returned.
    Namespace(Namespace),
    /// A function producing the resolver set, run lazily under
    /// [`ContainerStatus::ResolvingScopes`] the first time it is needed.
    Factory(Arc<DepsFactory>),
    /// A literal resolver set.
    Resolvers(Resolvers),
}

impl Deps {
    /// The lazy factory form.
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn() -> Result<Resolvers, ScopeError> + Send + Sync + 'static,
    {
        Deps::Factory(Arc::new(f))
    }
}

impl From<()> for Deps {
    fn from(_: ()) -> Self {
        Deps::None
    }
}

impl From<Namespace> for Deps {
    fn from(namespace: Namespace) -> Self {
        Deps::Namespace(namespace)
    }
}

impl From<&Namespace> for Deps {
    fn from(namespace: &Namespace) -> Self {
        Deps::Namespace(namespace.clone())
    }
}

impl From<Resolvers> for Deps {
    fn from(resolvers: Resolvers) -> Self {
        Deps::Resolvers(resolvers)
    }
}

impl fmt::Debug for Deps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deps::None => f.write_str("Deps::None"),
            Deps::Namespace(ns) => f.debug_tuple("Deps::Namespace").field(ns).finish(),
            Deps::Factory(_) => f.write_str("Deps::Factory(..)"),
            Deps::Resolvers(r) => f.debug_tuple("Deps::Resolvers").field(r).finish(),
        }
    }
}

struct ContainerInner {
    label: Option<String>,
    scope_graph: Graph<Resolvers>,
    dependency_graph: Graph<Value>,
    status: Mutex<ContainerStatus>,
    tracer: Box<dyn Tracer>,
}

/// A resolution session: one scope graph, one dependency graph and a status.
///
/// This is cheap to clone; clones share all state. Resolvers, scopes and
/// namespaces handed out by a container only hold a weak reference to it, so
/// a graph lives exactly as long as the last `Container` handle.
///
/// A container can be moved to or shared with other threads, but it holds
/// one status and one cursor per graph, so only one thread may be inside its
/// operations at a time. Overlapping resolutions from two threads see each
/// other's status and attach nodes under each other's cursor. Run parallel
/// resolution flows on separate containers.
///
/// # Example
///
/// ```
/// use scopula::{Container, Resolvers};
///
/// let container = Container::new();
/// let config = container.scope(|_| {
///     Ok(Resolvers::new().with("port", scopula::singleton(|_| Ok(8080u16))?))
/// });
///
/// let exports = config.call(()).unwrap();
/// let resolved = container.resolve(&exports).unwrap();
/// assert_eq!(resolved["port"].downcast_ref::<u16>(), Some(&8080));
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Container`].
#[derive(Default)]
pub struct ContainerBuilder {
    label: Option<String>,
    tracer: Option<Box<dyn Tracer>>,
}

impl ContainerBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the container in log records and `Debug` output.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Observe the container with `tracer`.
    pub fn tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Some(Box::new(tracer));
        self
    }

    /// Build the container.
    pub fn build(self) -> Container {
        Container {
            inner: Arc::new(ContainerInner {
                label: self.label,
                scope_graph: Graph::new(),
                dependency_graph: Graph::new(),
                status: Mutex::new(ContainerStatus::Idle),
                tracer: self.tracer.unwrap_or_else(|| Box::new(NoopTracer)),
            }),
        }
    }
}

#[derive(Clone)]
struct WeakContainer(Weak<ContainerInner>);

impl WeakContainer {
    fn upgrade(&self) -> Result<Container, ScopeError> {
        self.0
            .upgrade()
            .map(|inner| Container { inner })
            .ok_or(ScopeError::ContainerDropped)
    }
}

/// Installs a container and status for the extent of a callback.
struct BindGuard<'a> {
    container: &'a Container,
    previous: Option<ContainerStatus>,
    _context: ContextGuard,
}

impl<'a> BindGuard<'a> {
    fn enter(container: &'a Container, status: Option<ContainerStatus>) -> Self {
        let context = ContextGuard::enter(container.clone());
        let previous = status.map(|status| container.swap_status(status));
        Self {
            container,
            previous,
            _context: context,
        }
    }
}

impl Drop for BindGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous {
            self.container.swap_status(previous);
        }
    }
}

impl Container {
    /// Create a container with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for customizing the container.
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// The label given to the builder.
    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    /// The current status.
    pub fn status(&self) -> ContainerStatus {
        *self.inner.status.lock()
    }

    /// The graph of scope calls. Node values are the scopes' exports.
    pub fn scope_graph(&self) -> &Graph<Resolvers> {
        &self.inner.scope_graph
    }

    /// The graph of singleton and factory calls.
    pub fn dependency_graph(&self) -> &Graph<Value> {
        &self.inner.dependency_graph
    }

    /// Returns true if both handles are the same container.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn downgrade(&self) -> WeakContainer {
        WeakContainer(Arc::downgrade(&self.inner))
    }

    fn swap_status(&self, status: ContainerStatus) -> ContainerStatus {
        let previous = std::mem::replace(&mut *self.inner.status.lock(), status);
        if previous != status {
            tracing::debug!(
                container = self.label().unwrap_or_default(),
                from = ?previous,
                to = ?status,
                "container status changed"
            );
            self.inner.tracer.on_status_changed(previous, status);
        }
        previous
    }

    fn namespace_mode(&self) -> NamespaceMode {
        match self.status() {
            ContainerStatus::ResolvingDependencies => NamespaceMode::Dependencies,
            ContainerStatus::Idle | ContainerStatus::ResolvingScopes => NamespaceMode::Scopes,
        }
    }

    /// Run `f` with this container current and, if given, `status` set.
    /// Both are restored afterwards, whether `f` succeeds, fails or panics.
    fn bind<R>(&self, status: Option<ContainerStatus>, f: impl FnOnce() -> R) -> R {
        let _guard = BindGuard::enter(self, status);
        f()
    }

    /// Run `f` with this container installed as the current container,
    /// leaving the status unchanged.
    ///
    /// Use this to call the free helpers ([`crate::singleton`],
    /// [`crate::scope`], ...) against a specific container.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        self.bind(None, f)
    }

    /// Create a namespace over the resolver set produced by `factory`, whose
    /// [`read`](Namespace::read) follows this container's status.
    pub fn namespace<F>(&self, factory: F) -> Namespace
    where
        F: Fn() -> Result<Resolvers, ScopeError> + Send + Sync + 'static,
    {
        let container = self.downgrade();
        Namespace::new(factory, move || {
            container
                .upgrade()
                .map(|c| c.namespace_mode())
                .unwrap_or(NamespaceMode::Scopes)
        })
    }

    /// Declare a dependency that is built the first time it is resolved and
    /// shared by every later resolution.
    ///
    /// The returned resolver may be called from any number of places; the
    /// initializer runs once per container. Arguments are only seen by that
    /// first, node-creating call: later calls return the memoized value and
    /// ignore whatever arguments they pass.
    pub fn singleton<T, F>(&self, initializer: F) -> Resolver
    where
        T: Any + Send + Sync,
        F: Fn(&Args) -> Result<T, ScopeError> + Send + Sync + 'static,
    {
        let container = self.downgrade();
        let key = NodeKey::unique();
        Resolver::new(move |args| {
            container
                .upgrade()?
                .add_dependency(key, || initializer(&args).map(value))
        })
    }

    /// Declare a dependency that is built again on every resolution.
    pub fn factory<T, F>(&self, initializer: F) -> Resolver
    where
        T: Any + Send + Sync,
        F: Fn(&Args) -> Result<T, ScopeError> + Send + Sync + 'static,
    {
        let container = self.downgrade();
        Resolver::new(move |args| {
            container
                .upgrade()?
                .add_dependency(NodeKey::unique(), || initializer(&args).map(value))
        })
    }

    /// Declare a scope.
    ///
    /// `initializer` receives the scope's dependencies as a [`Namespace`] and
    /// returns the scope's exports. Every call of the returned [`Scope`] runs
    /// the initializer again and adds a new node to the scope graph.
    pub fn scope<F>(&self, initializer: F) -> Scope
    where
        F: Fn(Namespace) -> Result<Resolvers, ScopeError> + Send + Sync + 'static,
    {
        self.scope_with(Arc::new(initializer))
    }

    pub(crate) fn scope_with(&self, initializer: Arc<ScopeInit>) -> Scope {
        Scope {
            container: self.downgrade(),
            initializer,
        }
    }

    /// Resolve every export of `namespace` with the container in
    /// [`ContainerStatus::ResolvingDependencies`].
    pub fn resolve(&self, namespace: &Namespace) -> Result<IndexMap<String, Value>, ScopeError> {
        self.bind(Some(ContainerStatus::ResolvingDependencies), || {
            namespace.resolve_all()
        })
    }

    /// Visit every scope node, children before parents. See
    /// [`Graph::traverse_from_leaves`].
    pub fn traverse_scopes_from_leaves<F>(&self, mut visitor: F) -> Result<(), ScopeError>
    where
        F: FnMut(&GraphNode<Resolvers>) -> Result<(), ScopeError>,
    {
        self.inner.scope_graph.traverse_from_leaves(|node| {
            self.inner.tracer.on_node_visited(GraphKind::Scopes, node.id);
            visitor(node)
        })
    }

    /// Visit every dependency node, children before parents. See
    /// [`Graph::traverse_from_leaves`].
    pub fn traverse_dependencies_from_leaves<F>(&self, mut visitor: F) -> Result<(), ScopeError>
    where
        F: FnMut(&GraphNode<Value>) -> Result<(), ScopeError>,
    {
        self.inner.dependency_graph.traverse_from_leaves(|node| {
            self.inner
                .tracer
                .on_node_visited(GraphKind::Dependencies, node.id);
            visitor(node)
        })
    }

    /// Asynchronous form of [`Container::traverse_scopes_from_leaves`].
    #[cfg(feature = "async-traverse")]
    pub async fn traverse_scopes_from_leaves_async<F, Fut>(&self, visitor: F) -> Result<(), ScopeError>
    where
        F: Fn(GraphNode<Resolvers>) -> Fut,
        Fut: Future<Output = Result<(), ScopeError>>,
    {
        self.inner
            .scope_graph
            .traverse_from_leaves_async(|node| {
                self.inner.tracer.on_node_visited(GraphKind::Scopes, node.id);
                visitor(node)
            })
            .await
    }

    /// Asynchronous form of [`Container::traverse_dependencies_from_leaves`].
    #[cfg(feature = "async-traverse")]
    pub async fn traverse_dependencies_from_leaves_async<F, Fut>(
        &self,
        visitor: F,
    ) -> Result<(), ScopeError>
    where
        F: Fn(GraphNode<Value>) -> Fut,
        Fut: Future<Output = Result<(), ScopeError>>,
    {
        self.inner
            .dependency_graph
            .traverse_from_leaves_async(|node| {
                self.inner
                    .tracer
                    .on_node_visited(GraphKind::Dependencies, node.id);
                visitor(node)
            })
            .await
    }

    fn add_dependency<F>(&self, key: NodeKey, build: F) -> Result<Value, ScopeError>
    where
        F: FnOnce() -> Result<Value, ScopeError>,
    {
        let added = self.inner.dependency_graph.add_node(Some(key), || {
            self.bind(Some(ContainerStatus::ResolvingDependencies), build)
        });
        self.record(GraphKind::Dependencies, key, added)
    }

    fn build_scope(&self, initializer: &ScopeInit, deps: Deps) -> Result<Namespace, ScopeError> {
        let key = NodeKey::unique();
        let added = self.inner.scope_graph.add_node(Some(key), || {
            self.bind(Some(ContainerStatus::ResolvingScopes), || {
                initializer(self.dependencies_namespace(deps))
            })
        });
        let exports = self.record(GraphKind::Scopes, key, added)?;
        Ok(self.namespace(move || Ok(exports.clone())))
    }

    fn dependencies_namespace(&self, deps: Deps) -> Namespace {
        match deps {
            Deps::Namespace(namespace) => namespace,
            Deps::Resolvers(resolvers) => self.namespace(move || Ok(resolvers.clone())),
            Deps::None => self.namespace(|| Ok(Resolvers::new())),
            Deps::Factory(factory) => {
                let container = self.downgrade();
                self.namespace(move || {
                    container
                        .upgrade()?
                        .bind(Some(ContainerStatus::ResolvingScopes), || (*factory)())
                })
            }
        }
    }

    fn record<T>(
        &self,
        graph: GraphKind,
        key: NodeKey,
        added: Result<NodeHandle<T>, ScopeError>,
    ) -> Result<T, ScopeError> {
        match added {
            Ok(handle) if handle.reused => {
                tracing::trace!(%graph, node = handle.id.index(), %key, "reused node");
                self.inner.tracer.on_node_reused(graph, handle.id);
                Ok(handle.value)
            }
            Ok(handle) => {
                tracing::debug!(%graph, node = handle.id.index(), %key, "built node");
                self.inner.tracer.on_node_built(graph, handle.id, key);
                Ok(handle.value)
            }
            Err(err) => {
                tracing::debug!(%graph, %key, error = %err, "node builder failed");
                self.inner.tracer.on_node_failed(graph, &err);
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("label", &self.inner.label)
            .field("status", &self.status())
            .field("scopes", &self.inner.scope_graph.len())
            .field("dependencies", &self.inner.dependency_graph.len())
            .finish()
    }
}

/// A declared scope, bound to the container that declared it.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct Scope {
    container: WeakContainer,
    initializer: Arc<ScopeInit>,
}

impl Scope {
    /// Run the scope initializer against `deps` and return a namespace over
    /// its exports.
    ///
    /// `deps` may be a [`Namespace`] (usually a parent scope's exports), a
    /// [`Resolvers`] set, [`Deps::factory`], or `()` for none.
    pub fn call(&self, deps: impl Into<Deps>) -> Result<Namespace, ScopeError> {
        self.container
            .upgrade()?
            .build_scope(&*self.initializer, deps.into())
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").finish_non_exhaustive()
    }
}
