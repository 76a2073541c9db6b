//! Tests for the asynchronous leaves-first traversals.
#![cfg(feature = "async-traverse")]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use scopula::{Container, GraphKind, NodeId, Resolver, Resolvers, ScopeError, Tracer};

fn label(node: &scopula::GraphNode<scopula::Value>) -> &'static str {
    node.value
        .as_ref()
        .and_then(|v| v.downcast_ref::<&'static str>().copied())
        .unwrap_or("root")
}

/// config <- db, config <- cache, app -> {db, cache}
fn diamond(container: &Container) {
    let config = container.singleton(|_| Ok("config"));
    let db = {
        let config = config.clone();
        container.singleton(move |_| {
            config.call()?;
            Ok("db")
        })
    };
    let cache = container.singleton(move |_| {
        config.call()?;
        Ok("cache")
    });
    let app = container.singleton(move |_| {
        db.call()?;
        cache.call()?;
        Ok("app")
    });
    app.call().unwrap();
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_children_complete_before_parent() {
    let container = Container::new();
    diamond(&container);

    let log = Rc::new(RefCell::new(Vec::new()));
    container
        .traverse_dependencies_from_leaves_async(|node| {
            let log = Rc::clone(&log);
            async move {
                log.borrow_mut().push(label(&node));
                Ok(())
            }
        })
        .await
        .unwrap();

    let log = log.borrow();
    let position = |name: &str| log.iter().position(|n| *n == name).unwrap();
    assert_eq!(log.len(), 5);
    assert!(position("config") < position("db"));
    assert!(position("config") < position("cache"));
    assert!(position("db") < position("app"));
    assert!(position("cache") < position("app"));
    assert_eq!(log.last(), Some(&"root"));
}

#[tokio::test]
async fn test_shared_node_visited_once() {
    let container = Container::new();
    diamond(&container);

    let visits = Rc::new(RefCell::new(Vec::new()));
    container
        .traverse_dependencies_from_leaves_async(|node| {
            let visits = Rc::clone(&visits);
            async move {
                visits.borrow_mut().push(node.id);
                Ok(())
            }
        })
        .await
        .unwrap();

    let mut ids = visits.borrow().clone();
    ids.sort_by_key(|id| id.index());
    ids.dedup();
    assert_eq!(ids.len(), visits.borrow().len());
}

#[tokio::test]
async fn test_sibling_subtrees_interleave() {
    let container = Container::new();
    let left = container.singleton(|_| Ok("left"));
    let right = container.singleton(|_| Ok("right"));
    left.call().unwrap();
    right.call().unwrap();

    let log = Rc::new(RefCell::new(Vec::new()));
    container
        .traverse_dependencies_from_leaves_async(|node| {
            let log = Rc::clone(&log);
            async move {
                let name = label(&node);
                log.borrow_mut().push(format!("start {}", name));
                tokio::task::yield_now().await;
                log.borrow_mut().push(format!("end {}", name));
                Ok(())
            }
        })
        .await
        .unwrap();

    let log = log.borrow();
    let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();
    assert!(position("start right") < position("end left"));
    assert!(position("end left") < position("start root"));
    assert!(position("end right") < position("start root"));
}

#[tokio::test]
async fn test_scope_traversal_sees_exports() {
    let container = Container::new();
    let leaf = container.scope(|_| Ok(Resolvers::new().with("leaf", Resolver::constant(1))));
    let top = container.scope(move |_| {
        leaf.call(())?;
        Ok(Resolvers::new().with("top", Resolver::constant(2)))
    });
    top.call(()).unwrap();

    let names = Rc::new(RefCell::new(Vec::new()));
    container
        .traverse_scopes_from_leaves_async(|node| {
            let names = Rc::clone(&names);
            async move {
                if let Some(exports) = node.value {
                    names.borrow_mut().extend(exports.names().map(str::to_string));
                }
                Ok(())
            }
        })
        .await
        .unwrap();

    assert_eq!(*names.borrow(), vec!["leaf".to_string(), "top".to_string()]);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failure_settles_traversal_and_skips_ancestors() {
    let container = Container::new();
    diamond(&container);

    let log = Rc::new(RefCell::new(Vec::new()));
    let result = container
        .traverse_dependencies_from_leaves_async(|node| {
            let log = Rc::clone(&log);
            async move {
                let name = label(&node);
                if name == "db" {
                    return Err(ScopeError::from(anyhow::anyhow!("db offline")));
                }
                log.borrow_mut().push(name);
                Ok(())
            }
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("db offline"));
    let log = log.borrow();
    assert!(!log.contains(&"app"));
    assert!(!log.contains(&"root"));
    // The sibling subtree is not affected by the failure.
    assert!(log.contains(&"cache"));
}

#[tokio::test]
async fn test_failure_does_not_abort_suspended_siblings() {
    // root -> {outer -> slow, bad}
    let container = Container::new();
    let slow = container.singleton(|_| Ok("slow"));
    let outer = container.singleton(move |_| {
        slow.call()?;
        Ok("outer")
    });
    let bad = container.singleton(|_| Ok("bad"));
    outer.call().unwrap();
    bad.call().unwrap();

    let log = Rc::new(RefCell::new(Vec::new()));
    let result = container
        .traverse_dependencies_from_leaves_async(|node| {
            let log = Rc::clone(&log);
            async move {
                let name = label(&node);
                log.borrow_mut().push(format!("start {}", name));
                if name == "bad" {
                    return Err(ScopeError::from(anyhow::anyhow!("bad node")));
                }
                tokio::task::yield_now().await;
                log.borrow_mut().push(format!("end {}", name));
                Ok(())
            }
        })
        .await;

    assert!(result.unwrap_err().to_string().contains("bad node"));
    let log = log.borrow();
    let position = |entry: &str| log.iter().position(|e| e == entry);
    assert!(position("start bad").is_some());
    assert!(position("end slow").is_some());
    assert!(position("end slow") < position("start outer"));
    assert!(position("end outer").is_some());
    assert_eq!(position("start root"), None);
}

#[tokio::test]
async fn test_empty_graph_visits_only_root() {
    let container = Container::new();
    let count = Rc::new(RefCell::new(0));
    container
        .traverse_scopes_from_leaves_async(|node| {
            let count = Rc::clone(&count);
            async move {
                assert!(node.is_root());
                *count.borrow_mut() += 1;
                Ok(())
            }
        })
        .await
        .unwrap();
    assert_eq!(*count.borrow(), 1);
}

// =============================================================================
// Tracing
// =============================================================================

#[derive(Default)]
struct VisitCounter(AtomicUsize);

impl Tracer for VisitCounter {
    fn on_node_visited(&self, graph: GraphKind, _node: NodeId) {
        if graph == GraphKind::Dependencies {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn test_tracer_sees_each_visit() {
    let counter = Arc::new(VisitCounter::default());
    let container = Container::builder().tracer(Arc::clone(&counter)).build();
    diamond(&container);

    container
        .traverse_dependencies_from_leaves_async(|_| async { Ok(()) })
        .await
        .unwrap();

    // Four dependencies plus the root.
    assert_eq!(counter.0.load(Ordering::SeqCst), 5);
}
