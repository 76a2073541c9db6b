//! Identifiers for graph nodes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter for minting node keys.
static NEXT_NODE_KEY: AtomicU64 = AtomicU64::new(1);

/// Memoization identity of a graph node.
///
/// Adding a node under a key that the graph has already seen reuses the
/// existing node instead of running the builder again. A singleton mints its
/// key once, when it is declared, so every call shares one node. Factories
/// and scopes mint a fresh key per call, so their nodes are never shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(u64);

impl NodeKey {
    /// Mint a key that no other call has returned.
    pub fn unique() -> Self {
        NodeKey(NEXT_NODE_KEY.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw integer behind this key.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Position of a node in a graph's arena.
///
/// Only meaningful for the graph that returned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The raw arena index.
    pub fn index(self) -> usize {
        self.0
    }
}
