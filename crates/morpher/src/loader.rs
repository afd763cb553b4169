//! Modular schema loading.
//!
//! Applications contribute [`Module`]s (SDL plus resolvers and scalars).
//! The loader accumulates them and builds one executable schema; later
//! modules may `extend` types declared by earlier ones.

use crate::error::{SdkError, SdkResult};
use crate::types::base_module;
use morpher_runtime::{
    Context, ResolverArgs, ResolverInfo, ResolverMap, ResolverResult, ScalarRegistry,
    ScalarType, Schema, SchemaError,
};
use morpher_syntax::{parse_document, Definition, Document};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::debug;

/// A unit of schema: type definitions, resolvers and scalar implementations.
#[derive(Clone, Default)]
pub struct Module {
    pub type_defs: Vec<String>,
    pub resolvers: ResolverMap,
    pub scalars: Vec<(String, Arc<dyn ScalarType>)>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an SDL fragment.
    #[must_use]
    pub fn type_defs(mut self, sdl: impl Into<String>) -> Self {
        self.type_defs.push(sdl.into());
        self
    }

    /// Merges a resolver map.
    #[must_use]
    pub fn resolvers(mut self, resolvers: ResolverMap) -> Self {
        self.resolvers.merge(resolvers);
        self
    }

    /// Adds a sync resolver.
    #[must_use]
    pub fn resolver_fn<F>(mut self, type_name: &str, field: &str, f: F) -> Self
    where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.resolvers.register_fn(type_name, field, f);
        self
    }

    /// Adds an async resolver.
    #[must_use]
    pub fn resolver_async<F, Fut>(mut self, type_name: &str, field: &str, f: F) -> Self
    where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        self.resolvers.register_async(type_name, field, f);
        self
    }

    /// Adds a scalar implementation.
    #[must_use]
    pub fn scalar(mut self, name: &str, scalar: impl ScalarType + 'static) -> Self {
        self.scalars.push((name.to_string(), Arc::new(scalar)));
        self
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("type_defs", &self.type_defs.len())
            .field("resolvers", &self.resolvers.len())
            .field(
                "scalars",
                &self.scalars.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// A built schema with everything needed to execute against it.
#[derive(Debug, Clone)]
pub struct ExecutableSchema {
    pub schema: Schema,
    pub resolvers: ResolverMap,
    pub scalars: ScalarRegistry,
}

/// Accumulates modules.
#[derive(Debug, Clone, Default)]
pub struct Loader {
    documents: Vec<Document>,
    resolvers: ResolverMap,
    scalars: ScalarRegistry,
}

impl Loader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a loader seeded with the base module.
    pub fn with_base() -> SdkResult<Self> {
        let mut loader = Self::new();
        loader.load(base_module())?;
        Ok(loader)
    }

    /// Adds a module. SDL is parsed immediately and nothing is added on
    /// error.
    ///
    /// A module that clashes with what is already loaded (a second
    /// definition of a type or field, an extension of the wrong kind) is
    /// rejected. References to types or fields a later module may still
    /// declare are accepted and only fail in [`schema`](Self::schema).
    pub fn load(&mut self, module: Module) -> SdkResult<()> {
        let documents = module
            .type_defs
            .iter()
            .map(|sdl| parse_document(sdl).map_err(SchemaError::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(SdkError::from)?;

        if !documents.is_empty() {
            let trial = self
                .documents
                .iter()
                .chain(&documents)
                .cloned()
                .fold(Schema::builder(), morpher_runtime::SchemaBuilder::add_document)
                .build();
            if let Err(err) = trial {
                if err.is_conflict() {
                    return Err(err.into());
                }
            }
        }

        debug!(
            documents = documents.len(),
            resolvers = module.resolvers.len(),
            scalars = module.scalars.len(),
            "loaded module"
        );

        self.documents.extend(documents);
        self.resolvers.merge(module.resolvers);
        for (name, scalar) in module.scalars {
            self.scalars.register_shared(name, scalar);
        }
        Ok(())
    }

    /// Returns true if a loaded document defines (not extends) type `name`.
    pub fn declares_type(&self, name: &str) -> bool {
        self.documents.iter().any(|doc| {
            doc.definitions
                .iter()
                .any(|def| matches!(def, Definition::Type(t) if t.name().as_str() == name))
        })
    }

    /// Builds the executable schema from everything loaded so far.
    pub fn schema(&self) -> SdkResult<ExecutableSchema> {
        let schema = self
            .documents
            .iter()
            .cloned()
            .fold(Schema::builder(), morpher_runtime::SchemaBuilder::add_document)
            .build()?;

        if let Some((type_name, field)) = self
            .resolvers
            .fields()
            .find(|(type_name, field)| schema.field(type_name, field).is_none())
        {
            return Err(SchemaError::UndeclaredResolver {
                type_name: type_name.to_string(),
                field: field.to_string(),
            }
            .into());
        }

        Ok(ExecutableSchema {
            schema,
            resolvers: self.resolvers.clone(),
            scalars: self.scalars.clone(),
        })
    }
}

fn global() -> &'static RwLock<Loader> {
    static LOADER: OnceLock<RwLock<Loader>> = OnceLock::new();
    LOADER.get_or_init(|| {
        let mut loader = Loader::new();
        // Static SDL, covered by the loader tests.
        if let Err(err) = loader.load(base_module()) {
            tracing::error!("failed to load base module: {err}");
        }
        RwLock::new(loader)
    })
}

/// Adds a module to the process-wide loader.
pub fn load(module: Module) -> SdkResult<()> {
    global()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .load(module)
}

/// Builds the executable schema from the process-wide loader.
pub fn schema() -> SdkResult<ExecutableSchema> {
    global()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .schema()
}

/// Returns true if the process-wide loader declares type `name`.
pub fn declares_type(name: &str) -> bool {
    global()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .declares_type(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use morpher_runtime::{Executor, Request};
    use serde_json::json;

    #[test]
    fn test_base_module() {
        let loader = Loader::with_base().unwrap();
        let exec = loader.schema().unwrap();
        assert!(exec.schema.get_type("JSON").is_some());
        assert!(exec.schema.get_type("Date").is_some());
        assert_eq!(exec.schema.mutation_type(), Some("Mutation"));
        assert!(loader.declares_type("Query"));
        assert!(!loader.declares_type("Post"));
    }

    #[tokio::test]
    async fn test_modules_extend_roots() {
        let mut loader = Loader::with_base().unwrap();
        loader
            .load(
                Module::new()
                    .type_defs("extend type Query { echo(value: JSON): JSON, now: Date }")
                    .resolver_fn("Query", "echo", |_, args, _, _| {
                        Ok(args.get("value").cloned().unwrap_or_default())
                    })
                    .resolver_fn("Query", "now", |_, _, _, _| Ok(json!("2000-01-01T00:00:00Z"))),
            )
            .unwrap();

        let exec = loader.schema().unwrap();
        let executor = Executor::new(exec.schema, exec.resolvers, exec.scalars);
        let response = executor
            .execute(
                &Request::new(r#"{ framework echo(value: {a: [1, B]}) now }"#),
                &Context::new(),
            )
            .await;

        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data.unwrap(),
            json!({"framework": "morpher", "echo": {"a": [1, "B"]}, "now": 946_684_800_000_i64})
        );
    }

    #[test]
    fn test_parse_error_leaves_loader_untouched() {
        let mut loader = Loader::with_base().unwrap();
        let err = loader
            .load(Module::new().type_defs("type Ok { a: Int }").type_defs("type {"))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
        assert!(!loader.declares_type("Ok"));
    }

    #[test]
    fn test_conflicting_module_is_rejected() {
        let mut loader = Loader::with_base().unwrap();
        loader
            .load(Module::new().type_defs("extend type Query { things: [JSON] }"))
            .unwrap();

        let err = loader
            .load(Module::new().type_defs("extend type Query { things: Int }"))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SchemaError);
        assert!(err.message.contains("Query.things"), "{}", err.message);

        let err = loader
            .load(Module::new().type_defs("type Query { other: Int }"))
            .unwrap_err();
        assert!(err.message.contains("only one type named \"Query\""));

        loader.schema().unwrap();
    }

    #[test]
    fn test_forward_references_wait_for_later_modules() {
        let mut loader = Loader::with_base().unwrap();
        loader
            .load(Module::new().type_defs("extend type Query { latest: Post }"))
            .unwrap();
        assert!(loader.schema().is_err());

        loader
            .load(Module::new().type_defs("type Post { _id: ID! }"))
            .unwrap();
        loader.schema().unwrap();
    }

    #[test]
    fn test_undeclared_resolver() {
        let mut loader = Loader::with_base().unwrap();
        loader
            .load(Module::new().resolver_fn("Query", "ghost", |_, _, _, _| Ok(Value::Null)))
            .unwrap();
        let err = loader.schema().unwrap_err();
        assert_eq!(err.code, ErrorCode::SchemaError);
        assert!(err.message.contains("Query.ghost"));
    }
}
