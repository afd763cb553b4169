//! Runtime layer for Morpher.
//!
//! This crate provides:
//! - `schema`: Building a schema from SDL documents and extensions
//! - `resolver`: Field resolvers keyed by `Type.field`
//! - `scalars`: Scalar serialization and input parsing
//! - `context`: Request-scoped context
//! - `validation`: Static checks run before execution
//! - `executor`: Query execution

mod coerce;
pub mod context;
pub mod executor;
pub mod resolver;
pub mod scalars;
pub mod schema;
pub mod validation;

pub use context::{Context, ContextExt, TypedContext};
pub use executor::{
    ErrorLocation, Executor, ExecutorConfig, FieldError, PathSegment, Request, Response,
};
pub use resolver::{
    AsyncFnResolver, DefaultResolver, FnResolver, Resolver, ResolverArgs, ResolverError,
    ResolverFuture, ResolverInfo, ResolverMap, ResolverResult, SharedResolver,
};
pub use scalars::{ScalarRegistry, ScalarType};
pub use schema::{FieldDef, InputValueDef, Schema, SchemaBuilder, SchemaError, TypeDef, TypeKind};
