//! Field resolvers.
//!
//! A [`ResolverMap`] holds one resolver per `Type.field`. Any field without
//! an entry is answered by [`DefaultResolver`], which reads the property of
//! the same name (or its `snake_case` spelling) from the parent value.

use crate::context::Context;
use crate::executor::PathSegment;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Coerced field arguments.
#[derive(Debug, Clone, Default)]
pub struct ResolverArgs(Map<String, Value>);

impl ResolverArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Deserializes a required argument.
    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        let value = self
            .0
            .get(name)
            .ok_or_else(|| ResolverError::MissingArgument(name.to_string()))?;
        T::deserialize(value)
            .map_err(|err| ResolverError::ArgumentParse(name.to_string(), err.to_string()))
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Where in the query the resolver is running.
#[derive(Debug, Clone)]
pub struct ResolverInfo {
    pub field_name: String,
    pub parent_type: String,
    /// Declared type in SDL notation, e.g. `[Task!]`.
    pub return_type: String,
    pub path: Vec<PathSegment>,
}

impl ResolverInfo {
    pub fn new(field_name: impl Into<String>, parent_type: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            parent_type: parent_type.into(),
            return_type: String::new(),
            path: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_return_type(mut self, ty: impl Into<String>) -> Self {
        self.return_type = ty.into();
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }
}

pub type ResolverResult = Result<Value, ResolverError>;

pub type ResolverFuture<'a> = Pin<Box<dyn Future<Output = ResolverResult> + Send + 'a>>;

/// A failed resolver. The executor nulls the field and reports the error
/// with [`code`](Self::code) in its extensions.
#[derive(Debug, Clone, Error)]
pub enum ResolverError {
    #[error("Cannot read \"{0}\" from a non-object value")]
    NotAnObject(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Invalid value for argument \"{0}\": {1}")]
    ArgumentParse(String, String),

    #[error("Not authorized: {0}")]
    Forbidden(String),

    #[error("{0}")]
    Custom(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolverError {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingArgument(_) | Self::ArgumentParse(..) => "BAD_USER_INPUT",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Custom(_) => "RESOLVER_ERROR",
            Self::NotAnObject(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Produces the value of one field.
pub trait Resolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a>;
}

pub type SharedResolver = Arc<dyn Resolver>;

/// Adapts a synchronous closure.
pub struct FnResolver<F>(F);

impl<F> FnResolver<F>
where
    F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Resolver for FnResolver<F>
where
    F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult + Send + Sync,
{
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let result = (self.0)(parent, args, ctx, info);
        Box::pin(std::future::ready(result))
    }
}

/// Adapts a closure returning an owned future. Inputs are cloned so the
/// future can be `'static`.
pub struct AsyncFnResolver<F>(F);

impl<F, Fut> AsyncFnResolver<F>
where
    F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync,
    Fut: Future<Output = ResolverResult> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> Resolver for AsyncFnResolver<F>
where
    F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync,
    Fut: Future<Output = ResolverResult> + Send + 'static,
{
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        Box::pin((self.0)(
            parent.clone(),
            args.clone(),
            ctx.clone(),
            info.clone(),
        ))
    }
}

/// Reads `parent[field]`, then `parent[field_in_snake_case]`.
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        _args: &'a ResolverArgs,
        _ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let result = match parent {
            Value::Object(map) => Ok(map
                .get(&info.field_name)
                .or_else(|| map.get(&snake_case(&info.field_name)))
                .cloned()
                .unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            _ => Err(ResolverError::NotAnObject(info.field_name.clone())),
        };
        Box::pin(std::future::ready(result))
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Resolvers grouped by parent type, then field.
#[derive(Clone)]
pub struct ResolverMap {
    types: FxHashMap<String, FxHashMap<String, SharedResolver>>,
    fallback: SharedResolver,
}

impl Default for ResolverMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverMap {
    pub fn new() -> Self {
        Self {
            types: FxHashMap::default(),
            fallback: Arc::new(DefaultResolver),
        }
    }

    /// Installs `resolver` for `type_name.field_name`, replacing any earlier one.
    pub fn register<R: Resolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        self.types
            .entry(type_name.into())
            .or_default()
            .insert(field_name.into(), Arc::new(resolver));
    }

    pub fn register_fn<F>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.register(type_name, field_name, FnResolver::new(f));
    }

    pub fn register_async<F, Fut>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        self.register(type_name, field_name, AsyncFnResolver::new(f));
    }

    #[must_use]
    pub fn with_fn<F>(mut self, type_name: &str, field_name: &str, f: F) -> Self
    where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.register_fn(type_name, field_name, f);
        self
    }

    /// The resolver for a field; [`DefaultResolver`] when none is registered.
    pub fn get(&self, type_name: &str, field_name: &str) -> &dyn Resolver {
        self.types
            .get(type_name)
            .and_then(|fields| fields.get(field_name))
            .unwrap_or(&self.fallback)
            .as_ref()
    }

    pub fn contains(&self, type_name: &str, field_name: &str) -> bool {
        self.types
            .get(type_name)
            .is_some_and(|fields| fields.contains_key(field_name))
    }

    /// `(type, field)` pairs with an explicit resolver, in no particular order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.types.iter().flat_map(|(type_name, fields)| {
            fields
                .keys()
                .map(move |field| (type_name.as_str(), field.as_str()))
        })
    }

    /// Takes over every entry of `other`; its entries win on collision.
    pub fn merge(&mut self, other: ResolverMap) {
        for (type_name, fields) in other.types {
            self.types.entry(type_name).or_default().extend(fields);
        }
    }

    pub fn len(&self) -> usize {
        self.types.values().map(FxHashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ResolverMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverMap")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextExt, TypedContext};
    use serde_json::json;

    #[test]
    fn test_require() {
        let mut args = ResolverArgs::new();
        args.set("limit", json!(10));
        args.set("name", json!("tasks"));

        assert_eq!(args.require::<u32>("limit").unwrap(), 10);
        assert_eq!(args.require::<String>("name").unwrap(), "tasks");
        assert!(matches!(
            args.require::<String>("missing"),
            Err(ResolverError::MissingArgument(_))
        ));

        let err = args.require::<String>("limit").unwrap_err();
        assert!(matches!(err, ResolverError::ArgumentParse(ref name, _) if name == "limit"));
        assert_eq!(err.code(), "BAD_USER_INPUT");
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("createdAt"), "created_at");
        assert_eq!(snake_case("_id"), "_id");
        assert_eq!(snake_case("Owner"), "owner");
    }

    #[tokio::test]
    async fn test_default_resolver() {
        let parent = json!({"title": "Ship it", "created_at": 1});
        let args = ResolverArgs::new();
        let ctx = Context::new();

        for (field, expected) in [
            ("title", json!("Ship it")),
            ("createdAt", json!(1)),
            ("missing", Value::Null),
        ] {
            let info = ResolverInfo::new(field, "Task");
            let value = DefaultResolver
                .resolve(&parent, &args, &ctx, &info)
                .await
                .unwrap();
            assert_eq!(value, expected, "{field}");
        }

        let info = ResolverInfo::new("title", "Task");
        let err = DefaultResolver
            .resolve(&json!(3), &args, &ctx, &info)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::NotAnObject(_)));
    }

    #[tokio::test]
    async fn test_async_resolver_reads_context() {
        let mut map = ResolverMap::new();
        map.register_async("Query", "secret", |_parent, _args, ctx: Context, _info| async move {
            ctx.value("secret")
                .cloned()
                .ok_or_else(|| ResolverError::custom("no secret"))
        });

        let ctx: Context = TypedContext::new()
            .with_value("secret", json!("s3"))
            .into();
        let info = ResolverInfo::new("secret", "Query");
        let value = map
            .get("Query", "secret")
            .resolve(&Value::Null, &ResolverArgs::new(), &ctx, &info)
            .await
            .unwrap();
        assert_eq!(value, json!("s3"));
    }

    #[test]
    fn test_merge_and_fields() {
        let mut a = ResolverMap::new().with_fn("Query", "a", |_, _, _, _| Ok(json!(1)));
        let b = ResolverMap::new()
            .with_fn("Query", "b", |_, _, _, _| Ok(json!(2)))
            .with_fn("Mutation", "c", |_, _, _, _| Ok(json!(3)));
        a.merge(b);

        let mut fields: Vec<_> = a.fields().collect();
        fields.sort_unstable();
        assert_eq!(
            fields,
            vec![("Mutation", "c"), ("Query", "a"), ("Query", "b")]
        );
        assert_eq!(a.len(), 3);
        assert!(a.contains("Query", "b"));
        assert!(!a.contains("Query", "c"));
        assert!(!ResolverMap::new().contains("Nope", "x"));
    }
}
