//! Ambient "current container".
//!
//! Free-standing helpers such as [`crate::singleton`] and [`crate::scope`]
//! find their container here instead of taking it as an argument. The slot is
//! thread-local: one thread is one logical resolution flow. Installing a
//! container with [`ContextGuard::enter`] (or through any container operation,
//! which binds itself for the duration of the call) restores the previous one
//! when the guard drops, so nesting is strictly last-in first-out.

use std::cell::RefCell;

use crate::container::Container;

thread_local! {
    static CURRENT_CONTAINER: RefCell<Option<Container>> = const { RefCell::new(None) };
}

/// The container installed on this thread, if any.
pub fn current_container() -> Option<Container> {
    CURRENT_CONTAINER.with(|slot| slot.borrow().clone())
}

/// Install `container` (or clear the slot with `None`), returning the
/// previously installed container.
pub fn set_current_container(container: Option<Container>) -> Option<Container> {
    CURRENT_CONTAINER.with(|slot| slot.replace(container))
}

/// The current container, installing a new default one if the slot is empty.
///
/// This is the usual entry point for a program's outermost module: the first
/// call creates the container every later declaration shares.
pub fn ensure_current_container() -> Container {
    if let Some(container) = current_container() {
        return container;
    }
    let container = Container::new();
    tracing::debug!("installing a new current container");
    set_current_container(Some(container.clone()));
    container
}

/// Guard that restores the previously current container when dropped.
///
/// This keeps the ambient slot correct even when the guarded code returns
/// early or panics.
#[must_use = "the previous container is restored as soon as the guard drops"]
pub struct ContextGuard {
    previous: Option<Container>,
}

impl ContextGuard {
    /// Make `container` current until the guard drops.
    pub fn enter(container: Container) -> Self {
        Self {
            previous: set_current_container(Some(container)),
        }
    }

    /// Clear the slot until the guard drops.
    pub fn empty() -> Self {
        Self {
            previous: set_current_container(None),
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        set_current_container(self.previous.take());
    }
}
