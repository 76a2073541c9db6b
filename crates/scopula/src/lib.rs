//! Scopula: lazy dependency resolution with nested scopes.
//!
//! Programs declare named computations ("dependencies") with memoization
//! semantics, group them into scopes that build on each other, and resolve
//! the whole graph on demand, without threading constructor arguments through
//! every layer of initialization.
//!
//! # Key Features
//!
//! - **Singletons and factories**: [`Container::singleton`] builds once per
//!   container, [`Container::factory`] builds on every call
//! - **Composable scopes**: a scope receives its dependencies as a lazy
//!   [`Namespace`] and returns its exports as another one
//! - **Two graphs**: every scope call and every dependency build is recorded,
//!   parent to child, and can be walked leaves-first with
//!   [`Container::traverse_dependencies_from_leaves`]
//! - **Ambient container**: [`singleton`], [`factory`] and [`scope`] find the
//!   current container on their own, so declarations need no explicit wiring
//!
//! # Example
//!
//! ```
//! use scopula::{scope, singleton, Container, Resolvers};
//!
//! let root = scope(|_| Ok(Resolvers::new().with("value", singleton(|_| Ok(42))?)));
//! let child = scope(|deps| {
//!     Ok(Resolvers::new().with(
//!         "doubled",
//!         singleton(move |_| Ok(*deps.resolve_as::<i32>("value")? * 2))?,
//!     ))
//! });
//!
//! let container = Container::new();
//! let exports = container
//!     .enter(|| child.call(root.call(())?))
//!     .unwrap();
//!
//! let resolved = container.resolve(&exports).unwrap();
//! assert_eq!(resolved["doubled"].downcast_ref::<i32>(), Some(&84));
//! ```
//!
//! # Phases
//!
//! Scope initializers run while the container is in
//! [`ContainerStatus::ResolvingScopes`]; singleton and factory initializers,
//! and [`Container::resolve`], run in [`ContainerStatus::ResolvingDependencies`].
//! [`Namespace::read`] follows that status, returning resolvers in the first
//! phase and memoized values in the second.

mod container;
mod context;
mod error;
mod graph;
mod helpers;
mod key;
mod namespace;
mod resolver;
pub mod tracer;

pub use container::{Container, ContainerBuilder, ContainerStatus, Deps, Scope};
pub use context::{
    current_container, ensure_current_container, set_current_container, ContextGuard,
};
pub use error::{ScopeError, ScopeResultExt, TypedErr};
pub use graph::{Graph, GraphNode, NodeHandle};
pub use helpers::{factory, scope, singleton, DetachedScope};
pub use key::{NodeId, NodeKey};
pub use namespace::{Entry, Namespace, NamespaceMode};
pub use resolver::{downcast, value, Args, Resolver, Resolvers, Value};
pub use tracer::{GraphKind, NoopTracer, Tracer};
