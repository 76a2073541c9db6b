//! Tracer trait for observing graph construction.
//!
//! This module defines the [`Tracer`] trait, which a [`Container`] notifies as
//! it builds, reuses and visits nodes. The default [`NoopTracer`] discards
//! everything. Independently of the tracer, the container emits `tracing`
//! events, so a `tracing` subscriber sees the same activity as log records.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use scopula::{Container, GraphKind, NodeId, NodeKey, Tracer};
//!
//! #[derive(Default)]
//! struct BuildCounter(AtomicUsize);
//!
//! impl Tracer for BuildCounter {
//!     fn on_node_built(&self, _graph: GraphKind, _node: NodeId, _key: NodeKey) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//!
//! let counter = Arc::new(BuildCounter::default());
//! let container = Container::builder().tracer(Arc::clone(&counter)).build();
//! let answer = container.singleton(|_| Ok(42));
//! answer.call().unwrap();
//! answer.call().unwrap();
//! assert_eq!(counter.0.load(Ordering::Relaxed), 1);
//! ```
//!
//! [`Container`]: crate::Container

use std::fmt;
use std::sync::Arc;

use crate::container::ContainerStatus;
use crate::error::ScopeError;
use crate::key::{NodeId, NodeKey};

/// Which of a container's two graphs an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphKind {
    /// The graph of scope declarations.
    Scopes,
    /// The graph of singleton and factory resolutions.
    Dependencies,
}

impl fmt::Display for GraphKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphKind::Scopes => f.write_str("scopes"),
            GraphKind::Dependencies => f.write_str("dependencies"),
        }
    }
}

/// Observer of container activity.
///
/// All methods have empty default implementations, so implementors only
/// override the events they care about.
///
/// Implementations must be `Send + Sync` because a container may be moved
/// between threads.
pub trait Tracer: Send + Sync + 'static {
    /// A node's builder ran and succeeded.
    #[inline]
    fn on_node_built(&self, _graph: GraphKind, _node: NodeId, _key: NodeKey) {}

    /// An existing node was returned without running a builder.
    #[inline]
    fn on_node_reused(&self, _graph: GraphKind, _node: NodeId) {}

    /// A node's builder failed; no node was kept.
    #[inline]
    fn on_node_failed(&self, _graph: GraphKind, _error: &ScopeError) {}

    /// A traversal visited a node.
    #[inline]
    fn on_node_visited(&self, _graph: GraphKind, _node: NodeId) {}

    /// The container status changed on entering or leaving a bound callback.
    #[inline]
    fn on_status_changed(&self, _from: ContainerStatus, _to: ContainerStatus) {}
}

impl<T: Tracer> Tracer for Arc<T> {
    fn on_node_built(&self, graph: GraphKind, node: NodeId, key: NodeKey) {
        (**self).on_node_built(graph, node, key)
    }

    fn on_node_reused(&self, graph: GraphKind, node: NodeId) {
        (**self).on_node_reused(graph, node)
    }

    fn on_node_failed(&self, graph: GraphKind, error: &ScopeError) {
        (**self).on_node_failed(graph, error)
    }

    fn on_node_visited(&self, graph: GraphKind, node: NodeId) {
        (**self).on_node_visited(graph, node)
    }

    fn on_status_changed(&self, from: ContainerStatus, to: ContainerStatus) {
        (**self).on_status_changed(from, to)
    }
}

/// Tracer that discards all events.
///
/// This is the default tracer for [`Container`](crate::Container).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}
