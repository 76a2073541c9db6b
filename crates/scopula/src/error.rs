//! Error types for scope and dependency resolution.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use crate::key::NodeKey;

/// Errors raised while declaring or resolving scopes and dependencies.
///
/// Initializer errors can be propagated using the `?` operator, which
/// automatically converts any `Into<anyhow::Error>` type into
/// `ScopeError::Initializer`. A `ScopeError` returned from a nested
/// resolution passes through `?` unchanged.
#[derive(Debug, Clone)]
pub enum ScopeError {
    /// A namespace was asked for a name its resolver set does not define.
    UnresolvableName {
        /// The name that was looked up.
        name: String,
    },

    /// A free-standing helper was used while no container was installed
    /// in the ambient context.
    NoCurrentContainer {
        /// The helper that was invoked (`"singleton"`, `"factory"`, `"scope"`).
        operation: &'static str,
    },

    /// Something tried to write into a namespace.
    MutationForbidden {
        /// The name that was written.
        name: String,
    },

    /// A resolved value or argument was not of the requested type.
    TypeMismatch {
        /// The name or argument position that was read.
        name: String,
        /// The requested type.
        expected: &'static str,
    },

    /// A node's builder re-entered the graph with its own key before it finished.
    Cycle {
        /// The key being built.
        key: NodeKey,
    },

    /// A resolver or namespace outlived the container that produced it.
    ContainerDropped,

    /// An initializer failed.
    ///
    /// The error is not retried; it propagates to whoever triggered the
    /// resolution and no graph node is kept for the failed build.
    Initializer(Arc<anyhow::Error>),
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeError::UnresolvableName { name } => {
                write!(f, "unable to resolve \"{}\"", name)
            }
            ScopeError::NoCurrentContainer { operation } => write!(
                f,
                "attempting to create a {} in an undefined container",
                operation
            ),
            ScopeError::MutationForbidden { name } => write!(
                f,
                "adding dependencies to a namespace is forbidden (\"{}\")",
                name
            ),
            ScopeError::TypeMismatch { name, expected } => {
                write!(f, "\"{}\" is not a value of type {}", name, expected)
            }
            ScopeError::Cycle { key } => {
                write!(f, "node {} was requested while it was being built", key)
            }
            ScopeError::ContainerDropped => write!(f, "container has been dropped"),
            ScopeError::Initializer(e) => write!(f, "initializer failed: {}", e),
        }
    }
}

impl<T: Into<anyhow::Error>> From<T> for ScopeError {
    fn from(err: T) -> Self {
        ScopeError::Initializer(Arc::new(err.into()))
    }
}

impl ScopeError {
    /// Returns a reference to the inner error if this is an `Initializer` variant.
    pub fn initializer_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            ScopeError::Initializer(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to downcast the initializer error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.initializer_error().and_then(|e| e.downcast_ref::<E>())
    }

    /// Returns `true` if this is an `Initializer` error containing an `E`.
    pub fn is<E: std::error::Error + Send + Sync + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }
}

/// An initializer error known to hold an `E`.
///
/// Produced by [`ScopeResultExt::downcast_err`]. Dereferences to the `E`.
#[derive(Clone)]
pub struct TypedErr<E> {
    source: Arc<anyhow::Error>,
    kind: PhantomData<fn() -> E>,
}

impl<E: std::error::Error + Send + Sync + 'static> TypedErr<E> {
    /// The shared error this view was taken from.
    pub fn source_error(&self) -> &Arc<anyhow::Error> {
        &self.source
    }

    /// Give back the [`ScopeError`] the view was taken from.
    pub fn into_scope_error(self) -> ScopeError {
        ScopeError::Initializer(self.source)
    }

    fn get(&self) -> &E {
        match self.source.downcast_ref::<E>() {
            Some(e) => e,
            None => unreachable!("TypedErr is only built around an error of type E"),
        }
    }
}

impl<E: std::error::Error + Send + Sync + 'static> Deref for TypedErr<E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.get()
    }
}

impl<E: std::error::Error + Send + Sync + 'static> fmt::Debug for TypedErr<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedErr").field(self.get()).finish()
    }
}

impl<E: std::error::Error + Send + Sync + 'static> fmt::Display for TypedErr<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Splits one initializer error type out of a resolution result.
///
/// ```
/// use scopula::{Container, ScopeResultExt};
///
/// let container = Container::new();
/// let port = container.singleton(|_| Ok("80x".parse::<u16>()?));
///
/// let outcome = port.call_as::<u16>().downcast_err::<std::num::ParseIntError>();
/// assert!(matches!(outcome, Ok(Err(_))));
/// ```
pub trait ScopeResultExt<T> {
    /// `Ok(Err(typed))` when an initializer failed with an `E`; any other
    /// error stays in the outer `Err`.
    fn downcast_err<E: std::error::Error + Send + Sync + 'static>(
        self,
    ) -> Result<Result<T, TypedErr<E>>, ScopeError>;
}

impl<T> ScopeResultExt<T> for Result<T, ScopeError> {
    fn downcast_err<E: std::error::Error + Send + Sync + 'static>(
        self,
    ) -> Result<Result<T, TypedErr<E>>, ScopeError> {
        let err = match self {
            Ok(value) => return Ok(Ok(value)),
            Err(err) => err,
        };
        match err {
            ScopeError::Initializer(source) if source.is::<E>() => Ok(Err(TypedErr {
                source,
                kind: PhantomData,
            })),
            other => Err(other),
        }
    }
}
