//! Resolvers and the values they produce.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::ScopeError;

/// A resolved dependency.
///
/// Values are shared, so two callers that observe the same singleton hold
/// pointer-equal `Value`s (see [`Arc::ptr_eq`]).
pub type Value = Arc<dyn Any + Send + Sync>;

/// Wrap a plain value as a [`Value`].
pub fn value<T: Any + Send + Sync>(v: T) -> Value {
    Arc::new(v)
}

/// Downcast a [`Value`] to a concrete type, naming `what` in the error.
pub fn downcast<T: Any + Send + Sync>(value: Value, what: &str) -> Result<Arc<T>, ScopeError> {
    value.downcast::<T>().map_err(|_| ScopeError::TypeMismatch {
        name: what.to_string(),
        expected: type_name::<T>(),
    })
}

/// Positional arguments passed to a resolver call.
#[derive(Clone, Default)]
pub struct Args(Vec<Value>);

impl Args {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument.
    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, arg: T) -> Self {
        self.0.push(Arc::new(arg));
        self
    }

    /// Append an already shared argument.
    #[must_use]
    pub fn with_value(mut self, arg: Value) -> Self {
        self.0.push(arg);
        self
    }

    /// The argument at `index`, if present and of type `T`.
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.0.get(index).and_then(|v| v.downcast_ref::<T>())
    }

    /// The argument at `index` as a raw value.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Args({})", self.0.len())
    }
}

type ResolveFn = dyn Fn(Args) -> Result<Value, ScopeError> + Send + Sync;

/// A callable producing a dependency's value.
///
/// Cheap to clone; clones call the same function.
#[derive(Clone)]
pub struct Resolver {
    f: Arc<ResolveFn>,
}

impl Resolver {
    /// Wrap a function as a resolver.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Args) -> Result<Value, ScopeError> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// A resolver taking no arguments that returns what `f` builds.
    pub fn from_fn<T, F>(f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> Result<T, ScopeError> + Send + Sync + 'static,
    {
        Self::new(move |_| f().map(value))
    }

    /// A resolver that always returns the same shared value.
    pub fn constant<T: Any + Send + Sync>(v: T) -> Self {
        let v = value(v);
        Self::new(move |_| Ok(Arc::clone(&v)))
    }

    /// Call with no arguments.
    pub fn call(&self) -> Result<Value, ScopeError> {
        (*self.f)(Args::new())
    }

    /// Call with arguments.
    pub fn call_with(&self, args: Args) -> Result<Value, ScopeError> {
        (*self.f)(args)
    }

    /// Call with no arguments and downcast the result.
    pub fn call_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ScopeError> {
        downcast(self.call()?, "resolver result")
    }

    /// Returns true if both resolvers call the same function.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resolver({:p})", Arc::as_ptr(&self.f))
    }
}

/// An insertion-ordered set of named resolvers: a scope's exports, or the
/// dependencies a namespace exposes.
#[derive(Clone, Default, Debug)]
pub struct Resolvers(IndexMap<String, Resolver>);

impl Resolvers {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resolver, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, resolver: Resolver) -> Self {
        self.insert(name, resolver);
        self
    }

    /// Add a resolver, replacing any previous one with the same name.
    pub fn insert(&mut self, name: impl Into<String>, resolver: Resolver) -> Option<Resolver> {
        self.0.insert(name.into(), resolver)
    }

    /// Look up a resolver.
    pub fn get(&self, name: &str) -> Option<&Resolver> {
        self.0.get(name)
    }

    /// Returns true if `name` is defined.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.keys().map(String::as_str)
    }

    /// Name and resolver pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Resolver)> + '_ {
        self.0.iter().map(|(name, resolver)| (name.as_str(), resolver))
    }

    /// Number of resolvers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no resolvers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Resolver)> for Resolvers {
    fn from_iter<I: IntoIterator<Item = (S, Resolver)>>(iter: I) -> Self {
        Resolvers(
            iter.into_iter()
                .map(|(name, resolver)| (name.into(), resolver))
                .collect(),
        )
    }
}

impl IntoIterator for Resolvers {
    type Item = (String, Resolver);
    type IntoIter = indexmap::map::IntoIter<String, Resolver>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_typed_access() {
        let args = Args::new().with(3u8).with("three".to_string());
        assert_eq!(args.len(), 2);
        assert_eq!(args.get::<u8>(0), Some(&3));
        assert_eq!(args.get::<String>(1).map(String::as_str), Some("three"));
        assert_eq!(args.get::<u8>(1), None);
        assert_eq!(args.get::<u8>(2), None);
    }

    #[test]
    fn test_resolver_call_with_args() {
        let add = Resolver::new(|args| {
            let a = args.get::<i32>(0).copied().unwrap_or(0);
            let b = args.get::<i32>(1).copied().unwrap_or(0);
            Ok(value(a + b))
        });

        assert_eq!(*add.call_as::<i32>().unwrap(), 0);
        let sum = downcast::<i32>(add.call_with(Args::new().with(2).with(5)).unwrap(), "sum");
        assert_eq!(*sum.unwrap(), 7);
    }

    #[test]
    fn test_call_as_wrong_type() {
        let r = Resolver::constant(1u64);
        assert!(matches!(
            r.call_as::<String>(),
            Err(ScopeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_constant_is_shared() {
        let r = Resolver::constant(vec![1, 2, 3]);
        assert!(Arc::ptr_eq(&r.call().unwrap(), &r.call().unwrap()));
    }

    #[test]
    fn test_resolvers_keep_insertion_order() {
        let set = Resolvers::new()
            .with("zeta", Resolver::constant(1))
            .with("alpha", Resolver::constant(2))
            .with("mid", Resolver::constant(3));
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
        assert!(set.contains("alpha"));
        assert!(!set.contains("beta"));
    }
}
