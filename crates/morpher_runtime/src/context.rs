//! Request-scoped context handed to every resolver.
//!
//! Holds handles keyed by their Rust type (the database, the resolved
//! user), JSON values keyed by name (what context creators return) and the
//! request headers.

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

type AnyBox = Box<dyn Any + Send + Sync>;

/// Mutable context under construction. Freeze it into a [`Context`] with
/// `into()`.
///
/// ```
/// use morpher_runtime::context::{ContextExt, TypedContext};
///
/// struct Tenant(&'static str);
///
/// let ctx = TypedContext::new()
///     .with(Tenant("acme"))
///     .with_value("locale", "en");
///
/// assert_eq!(ctx.get::<Tenant>().unwrap().0, "acme");
/// assert_eq!(ctx.value("locale").and_then(|v| v.as_str()), Some("en"));
/// ```
#[derive(Default)]
pub struct TypedContext {
    handles: FxHashMap<TypeId, AnyBox>,
    values: Map<String, Value>,
    headers: FxHashMap<String, String>,
}

impl TypedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under its type, handing back the one it replaced.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        let previous = self.handles.insert(TypeId::of::<T>(), Box::new(value))?;
        previous.downcast::<T>().ok().map(|boxed| *boxed)
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.handles.get(&TypeId::of::<T>())?.downcast_ref()
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Merges named values. On a shared key the incoming value is kept.
    pub fn extend_values(&mut self, values: Map<String, Value>) {
        self.values.extend(values);
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Header names are matched case-insensitively.
    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl fmt::Debug for TypedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedContext")
            .field("handles", &self.handles.len())
            .field("values", &self.values)
            .field("headers", &self.headers.len())
            .finish()
    }
}

/// Builder-style setters for [`TypedContext`].
pub trait ContextExt {
    #[must_use]
    fn with<T: Send + Sync + 'static>(self, value: T) -> Self;

    #[must_use]
    fn with_value(self, key: impl Into<String>, value: impl Into<Value>) -> Self;

    #[must_use]
    fn with_header(self, name: impl AsRef<str>, value: impl Into<String>) -> Self;
}

impl ContextExt for TypedContext {
    fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_value(key, value);
        self
    }

    fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }
}

/// A frozen [`TypedContext`] shared by every resolver of one request.
#[derive(Clone, Default)]
pub struct Context(Arc<TypedContext>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<TypedContext> for Context {
    fn from(ctx: TypedContext) -> Self {
        Self(Arc::new(ctx))
    }
}

impl Deref for Context {
    type Target = TypedContext;

    fn deref(&self) -> &TypedContext {
        &self.0
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}
