//! Append-only, key-memoized node graph.
//!
//! A [`Graph`] records which computations were built while which other
//! computation was being built. Nodes are created by [`Graph::add_node`]; the
//! node whose builder is currently running is the *cursor*, and every node
//! added while it runs becomes one of its children. Adding a key the graph has
//! already seen reuses the existing node (its builder is not run again) but
//! still records an edge from the current cursor, so a shared node can have
//! several parents.
//!
//! [`Graph::traverse_from_leaves`] then walks the graph children-first, visiting
//! each node exactly once.

use std::collections::HashMap;

use parking_lot::Mutex;
use slab::Slab;

use crate::error::ScopeError;
use crate::key::{NodeId, NodeKey};

/// A snapshot of one node of a [`Graph`].
#[derive(Debug, Clone)]
pub struct GraphNode<T> {
    /// Arena position of this node.
    pub id: NodeId,
    /// Memoization key. `None` only for the root.
    pub key: Option<NodeKey>,
    /// Result of the node's builder. `None` for the root and while the builder runs.
    pub value: Option<T>,
    /// Nodes added while this node was the cursor, in insertion order.
    /// A reused node appears once per time it was added.
    pub children: Vec<NodeId>,
    /// The cursor at the time this node was created.
    pub parent: Option<NodeId>,
}

impl<T> GraphNode<T> {
    /// Returns true for the synthetic root.
    pub fn is_root(&self) -> bool {
        self.key.is_none()
    }
}

/// Result of [`Graph::add_node`].
#[derive(Debug, Clone)]
pub struct NodeHandle<T> {
    /// The created or reused node.
    pub id: NodeId,
    /// The node's value.
    pub value: T,
    /// True if the key was already present and the builder was skipped.
    pub reused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InProgress,
    Done,
}

struct GraphState<T> {
    nodes: Slab<GraphNode<T>>,
    keys: HashMap<NodeKey, NodeId>,
    root: NodeId,
    cursor: NodeId,
}

impl<T> GraphState<T> {
    /// Forget a node whose builder did not produce a value.
    fn discard(&mut self, key: NodeKey, id: NodeId) {
        self.keys.remove(&key);
        let failed = self.nodes.remove(id.0);
        for child in failed.children {
            if let Some(node) = self.nodes.get_mut(child.0) {
                if node.parent == Some(id) {
                    node.parent = None;
                }
            }
        }
    }
}

/// A node whose builder is running. Restores the cursor when dropped and,
/// unless [`commit`](PendingNode::commit) was called, discards the node, so
/// a builder that fails or unwinds leaves the graph as it was.
struct PendingNode<'a, T> {
    graph: &'a Graph<T>,
    key: NodeKey,
    id: NodeId,
    parent: NodeId,
    settled: bool,
}

impl<T: Clone> PendingNode<'_, T> {
    fn commit(mut self, value: T) -> NodeHandle<T> {
        self.settled = true;
        let mut state = self.graph.state.lock();
        state.cursor = self.parent;
        state.nodes[self.id.0].value = Some(value.clone());
        state.nodes[self.parent.0].children.push(self.id);
        tracing::trace!(key = %self.key, node = self.id.0, parent = self.parent.0, "built node");
        NodeHandle {
            id: self.id,
            value,
            reused: false,
        }
    }
}

impl<T> Drop for PendingNode<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.graph.state.lock();
        state.cursor = self.parent;
        state.discard(self.key, self.id);
        tracing::trace!(key = %self.key, parent = self.parent.0, "discarded failed node");
    }
}

/// Key-memoized tree of nodes with a "currently building" cursor.
///
/// The graph uses interior mutability and never holds its lock while a
/// builder or visitor runs, so builders may add further nodes.
pub struct Graph<T> {
    state: Mutex<GraphState<T>>,
}

impl<T: Clone> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Graph<T> {
    /// Create a graph containing only the root, with the cursor on the root.
    pub fn new() -> Self {
        let mut nodes = Slab::new();
        let root = NodeId(nodes.vacant_key());
        nodes.insert(GraphNode {
            id: root,
            key: None,
            value: None,
            children: Vec::new(),
            parent: None,
        });
        Self {
            state: Mutex::new(GraphState {
                nodes,
                keys: HashMap::new(),
                root,
                cursor: root,
            }),
        }
    }

    /// Add a node as a child of the current cursor.
    ///
    /// With `key = None` a fresh key is minted, so the node can never be reused.
    ///
    /// If the key is unseen, a node is created, made the cursor, and `builder`
    /// runs to produce its value; the previous cursor is restored afterwards.
    /// If the key was seen before, `builder` is not called and the existing
    /// node is returned. Either way an edge from the previous cursor to the
    /// node is appended.
    ///
    /// # Errors
    ///
    /// - Whatever `builder` returns. The half-built node is discarded, its
    ///   key is forgotten and no edge is recorded. A panicking builder gets
    ///   the same cleanup before the panic continues.
    /// - `ScopeError::Cycle` if `key` belongs to a node whose builder is
    ///   still running.
    pub fn add_node<F>(&self, key: Option<NodeKey>, builder: F) -> Result<NodeHandle<T>, ScopeError>
    where
        F: FnOnce() -> Result<T, ScopeError>,
    {
        let key = key.unwrap_or_else(NodeKey::unique);

        let (id, parent) = {
            let mut state = self.state.lock();
            let parent = state.cursor;

            if let Some(&id) = state.keys.get(&key) {
                let value = match &state.nodes[id.0].value {
                    Some(value) => value.clone(),
                    None => return Err(ScopeError::Cycle { key }),
                };
                state.nodes[parent.0].children.push(id);
                tracing::trace!(%key, node = id.0, parent = parent.0, "reusing node");
                return Ok(NodeHandle {
                    id,
                    value,
                    reused: true,
                });
            }

            let id = NodeId(state.nodes.vacant_key());
            state.nodes.insert(GraphNode {
                id,
                key: Some(key),
                value: None,
                children: Vec::new(),
                parent: Some(parent),
            });
            state.keys.insert(key, id);
            state.cursor = id;
            (id, parent)
        };

        let pending = PendingNode {
            graph: self,
            key,
            id,
            parent,
            settled: false,
        };
        match builder() {
            Ok(value) => Ok(pending.commit(value)),
            Err(err) => {
                drop(pending);
                Err(err)
            }
        }
    }

    /// Visit every node reachable from the root exactly once, children before
    /// parents, finishing with the root.
    ///
    /// A node's children are read when the walk first reaches the node. The
    /// visitor runs without the graph locked, so it may add nodes; nodes added
    /// under an already-expanded node are not visited by this walk.
    ///
    /// The first visitor error stops the walk and is returned.
    pub fn traverse_from_leaves<E, F>(&self, mut visitor: F) -> Result<(), E>
    where
        F: FnMut(&GraphNode<T>) -> Result<(), E>,
    {
        let mut states: HashMap<NodeId, VisitState> = HashMap::new();
        let mut stack = vec![(self.root(), false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                if let Some(node) = self.node(id) {
                    visitor(&node)?;
                }
                states.insert(id, VisitState::Done);
                continue;
            }

            if states.contains_key(&id) {
                continue;
            }
            states.insert(id, VisitState::InProgress);
            stack.push((id, true));
            for child in self.children(id).into_iter().rev() {
                if !states.contains_key(&child) {
                    stack.push((child, false));
                }
            }
        }

        debug_assert!(states.values().all(|s| *s == VisitState::Done));
        Ok(())
    }

    /// The synthetic root node's id.
    pub fn root(&self) -> NodeId {
        self.state.lock().root
    }

    /// The node whose builder is currently running, or the root.
    pub fn cursor(&self) -> NodeId {
        self.state.lock().cursor
    }

    /// Snapshot of a node.
    pub fn node(&self, id: NodeId) -> Option<GraphNode<T>> {
        self.state.lock().nodes.get(id.0).cloned()
    }

    /// Children of a node, or an empty list if it does not exist.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.state
            .lock()
            .nodes
            .get(id.0)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    /// Id of the node recorded under `key`, if any.
    pub fn find(&self, key: NodeKey) -> Option<NodeId> {
        self.state.lock().keys.get(&key).copied()
    }

    /// Returns true if a node is recorded under `key`.
    pub fn contains_key(&self, key: NodeKey) -> bool {
        self.find(key).is_some()
    }

    /// Number of nodes, not counting the root.
    pub fn len(&self) -> usize {
        self.state.lock().nodes.len() - 1
    }

    /// Returns true if only the root exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(feature = "async-traverse")]
mod traverse_async {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::future::Future;
    use std::rc::Rc;

    use futures_util::future::{join_all, FutureExt, LocalBoxFuture, Shared};

    use super::{Graph, GraphNode};
    use crate::error::ScopeError;
    use crate::key::NodeId;

    type Visit<'a> = Shared<LocalBoxFuture<'a, Result<(), ScopeError>>>;
    type Visits<'a> = Rc<RefCell<HashMap<NodeId, Visit<'a>>>>;

    impl<T: Clone> Graph<T> {
        /// Asynchronous form of [`Graph::traverse_from_leaves`].
        ///
        /// Each node's visit is memoized as a shared future. Sibling subtrees
        /// are visited concurrently; a node's visitor starts only after every
        /// child visit has settled, and is skipped if any of them failed.
        /// A failure does not abort visits already in flight: independent
        /// subtrees still run their own visitors, and the traversal returns
        /// once everything reachable has settled, with the first error in
        /// child order.
        pub async fn traverse_from_leaves_async<F, Fut>(&self, visitor: F) -> Result<(), ScopeError>
        where
            F: Fn(GraphNode<T>) -> Fut,
            Fut: Future<Output = Result<(), ScopeError>>,
        {
            let visits: Visits<'_> = Rc::new(RefCell::new(HashMap::new()));
            let result = self.visit(self.root(), &visitor, &visits).await;

            // Every visit holds the table, so break the cycle before returning.
            let table = std::mem::take(&mut *visits.borrow_mut());
            drop(table);
            result
        }

        fn visit<'a, F, Fut>(&'a self, id: NodeId, visitor: &'a F, visits: &Visits<'a>) -> Visit<'a>
        where
            F: Fn(GraphNode<T>) -> Fut,
            Fut: Future<Output = Result<(), ScopeError>> + 'a,
        {
            if let Some(visit) = visits.borrow().get(&id) {
                return visit.clone();
            }

            let table = Rc::clone(visits);
            let visit = async move {
                let children: Vec<_> = self
                    .children(id)
                    .into_iter()
                    .map(|child| self.visit(child, visitor, &table))
                    .collect();
                drop(table);
                // Every child visit runs to completion, even after a sibling
                // has failed; only then does the first error surface.
                for settled in join_all(children).await {
                    settled?;
                }
                match self.node(id) {
                    Some(node) => visitor(node).await,
                    None => Ok(()),
                }
            }
            .boxed_local()
            .shared();

            visits.borrow_mut().insert(id, visit.clone());
            visit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::panic::AssertUnwindSafe;

    #[test]
    fn test_add_node_builds_under_cursor() {
        let graph: Graph<i32> = Graph::new();
        let outer = graph
            .add_node(None, || {
                let inner = graph.add_node(None, || Ok(1))?;
                Ok(inner.value + 1)
            })
            .unwrap();

        assert_eq!(outer.value, 2);
        assert!(!outer.reused);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.cursor(), graph.root());
        assert_eq!(graph.children(graph.root()), vec![outer.id]);

        let node = graph.node(outer.id).unwrap();
        assert_eq!(node.parent, Some(graph.root()));
        assert_eq!(node.children.len(), 1);
        let inner = graph.node(node.children[0]).unwrap();
        assert_eq!(inner.value, Some(1));
        assert_eq!(inner.parent, Some(outer.id));
    }

    #[test]
    fn test_same_key_reused_under_two_parents() {
        let graph: Graph<&'static str> = Graph::new();
        let shared = NodeKey::unique();
        let runs = Cell::new(0);
        let build_shared = || {
            graph.add_node(Some(shared), || {
                runs.set(runs.get() + 1);
                Ok("shared")
            })
        };

        let a = graph
            .add_node(None, || build_shared().map(|_| "a"))
            .unwrap();
        let b = graph
            .add_node(None, || {
                let node = build_shared()?;
                assert!(node.reused);
                Ok("b")
            })
            .unwrap();

        assert_eq!(runs.get(), 1);
        assert_eq!(graph.len(), 3);

        let shared_id = graph.find(shared).unwrap();
        assert_eq!(graph.children(a.id), vec![shared_id]);
        assert_eq!(graph.children(b.id), vec![shared_id]);
        // The parent is where it was first built.
        assert_eq!(graph.node(shared_id).unwrap().parent, Some(a.id));
    }

    #[test]
    fn test_reuse_at_same_cursor_appends_edge_each_time() {
        let graph: Graph<i32> = Graph::new();
        let key = NodeKey::unique();
        graph.add_node(Some(key), || Ok(1)).unwrap();
        graph.add_node(Some(key), || Ok(2)).unwrap();

        let id = graph.find(key).unwrap();
        assert_eq!(graph.children(graph.root()), vec![id, id]);
        assert_eq!(graph.node(id).unwrap().value, Some(1));
    }

    #[test]
    fn test_failed_builder_leaves_no_node() {
        let graph: Graph<i32> = Graph::new();
        let key = NodeKey::unique();
        let mut nested = None;

        let result = graph.add_node(Some(key), || {
            nested = Some(graph.add_node(None, || Ok(7))?.id);
            Err(anyhow::anyhow!("boom").into())
        });

        assert!(matches!(result, Err(ScopeError::Initializer(_))));
        assert!(!graph.contains_key(key));
        assert_eq!(graph.cursor(), graph.root());
        assert!(graph.children(graph.root()).is_empty());

        // The nested node built successfully and survives, detached.
        let nested = graph.node(nested.unwrap()).unwrap();
        assert_eq!(nested.value, Some(7));
        assert_eq!(nested.parent, None);

        // The key can be built again afterwards.
        let retry = graph.add_node(Some(key), || Ok(3)).unwrap();
        assert!(!retry.reused);
        assert_eq!(retry.value, 3);
    }

    #[test]
    fn test_panicking_builder_leaves_no_node() {
        let graph: Graph<i32> = Graph::new();
        let key = NodeKey::unique();

        let unwound = std::panic::catch_unwind(AssertUnwindSafe(|| {
            graph.add_node(Some(key), || -> Result<i32, ScopeError> {
                panic!("builder blew up")
            })
        }));

        assert!(unwound.is_err());
        assert_eq!(graph.cursor(), graph.root());
        assert!(!graph.contains_key(key));
        assert!(graph.is_empty());

        // Later nodes attach to the root again, and the key is buildable.
        let retry = graph.add_node(Some(key), || Ok(5)).unwrap();
        assert_eq!(retry.value, 5);
        assert_eq!(graph.children(graph.root()), vec![retry.id]);
    }

    #[test]
    fn test_reentrant_key_is_a_cycle() {
        let graph: Graph<i32> = Graph::new();
        let key = NodeKey::unique();

        let result = graph.add_node(Some(key), || {
            graph.add_node(Some(key), || Ok(1))?;
            Ok(0)
        });

        assert!(matches!(result, Err(ScopeError::Cycle { key: k }) if k == key));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_traverse_children_before_parents() {
        let graph: Graph<&'static str> = Graph::new();
        let shared = NodeKey::unique();
        graph
            .add_node(None, || {
                graph.add_node(Some(shared), || Ok("leaf"))?;
                graph.add_node(None, || {
                    graph.add_node(Some(shared), || Ok("unused"))?;
                    Ok("middle")
                })?;
                Ok("top")
            })
            .unwrap();
        graph.add_node(None, || Ok("sibling")).unwrap();

        let mut log = Vec::new();
        graph
            .traverse_from_leaves(|node| {
                log.push(node.value.unwrap_or("root"));
                Ok::<_, ScopeError>(())
            })
            .unwrap();

        assert_eq!(log, vec!["leaf", "middle", "top", "sibling", "root"]);
    }

    #[test]
    fn test_traverse_visits_each_node_once() {
        let graph: Graph<u32> = Graph::new();
        let key = NodeKey::unique();
        for i in 0..3 {
            graph
                .add_node(None, || {
                    graph.add_node(Some(key), || Ok(100))?;
                    Ok(i)
                })
                .unwrap();
        }

        let mut visits: HashMap<NodeId, usize> = HashMap::new();
        graph
            .traverse_from_leaves(|node| {
                *visits.entry(node.id).or_default() += 1;
                Ok::<_, ScopeError>(())
            })
            .unwrap();

        assert_eq!(visits.len(), graph.len() + 1);
        assert!(visits.values().all(|count| *count == 1));
    }

    #[test]
    fn test_traverse_stops_at_first_error() {
        let graph: Graph<i32> = Graph::new();
        graph
            .add_node(None, || {
                graph.add_node(None, || Ok(1))?;
                Ok(2)
            })
            .unwrap();

        let mut seen = Vec::new();
        let result = graph.traverse_from_leaves(|node| {
            seen.push(node.value);
            if node.value == Some(1) {
                return Err("leaf failed");
            }
            Ok(())
        });

        assert_eq!(result, Err("leaf failed"));
        assert_eq!(seen, vec![Some(1)]);
    }

    #[test]
    fn test_traverse_empty_graph_visits_root() {
        let graph: Graph<()> = Graph::new();
        let mut roots = 0;
        graph
            .traverse_from_leaves(|node| {
                assert!(node.is_root());
                roots += 1;
                Ok::<_, ScopeError>(())
            })
            .unwrap();
        assert_eq!(roots, 1);
    }
}
