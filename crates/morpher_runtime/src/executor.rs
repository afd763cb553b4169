//! Query execution.
//!
//! The executor parses a request, picks the operation, validates it,
//! coerces variables and walks the selection set. Sibling fields of a query
//! are resolved concurrently; the top-level fields of a mutation run one
//! after another. A resolver error nulls its field and is reported with the
//! field's path; a null in a non-null position propagates to the nearest
//! nullable parent.

use crate::coerce::InputCoercer;
use crate::context::Context;
use crate::resolver::{ResolverError, ResolverInfo, ResolverMap};
use crate::scalars::ScalarRegistry;
use crate::schema::{FieldDef, Schema, TypeKind};
use crate::validation;
use futures_util::future::{join_all, BoxFuture, FutureExt};
use indexmap::IndexMap;
use morpher_core::{Location, SourceError, Span};
use morpher_syntax::{
    parse_document, Directive, Document, Field, FragmentDefinition, OperationDefinition,
    OperationType, Selection, SelectionSet, Type, Value as Literal,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Executor configuration.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Maximum selection depth; `None` disables the check.
    pub max_depth: Option<usize>,
}

impl ExecutorConfig {
    /// Sets the maximum selection depth.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }
}

/// A segment of a response path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A line/column position reported in errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub line: usize,
    pub column: usize,
}

impl From<Location> for ErrorLocation {
    fn from(location: Location) -> Self {
        Self {
            line: location.line,
            column: location.column,
        }
    }
}

/// A GraphQL error as it appears in the `errors` list of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<ErrorLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl FieldError {
    /// Creates a new error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: None,
        }
    }

    /// Sets the response path.
    #[must_use]
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }

    /// Adds a source location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<ErrorLocation>) -> Self {
        self.locations.push(location.into());
        self
    }

    /// Sets `extensions.code`.
    #[must_use]
    pub fn with_code(mut self, code: &str) -> Self {
        self.extensions
            .get_or_insert_with(Map::new)
            .insert("code".to_string(), Value::String(code.to_string()));
        self
    }

    /// Returns `extensions.code`, if set.
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }
}

impl From<&SourceError> for FieldError {
    fn from(err: &SourceError) -> Self {
        Self::new(err.to_string())
            .with_location(err.location())
            .with_code("GRAPHQL_PARSE_FAILED")
    }
}

/// A GraphQL request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl Request {
    /// Creates a request for a query string.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Sets the variables.
    #[must_use]
    pub fn variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Sets the operation name.
    #[must_use]
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// A GraphQL response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl Response {
    /// A response that failed before execution started.
    pub fn from_errors(errors: Vec<FieldError>) -> Self {
        Self { data: None, errors }
    }

    /// Returns true if any error was reported.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// The query executor.
#[derive(Debug, Clone)]
pub struct Executor {
    schema: Arc<Schema>,
    resolvers: Arc<ResolverMap>,
    scalars: Arc<ScalarRegistry>,
    config: ExecutorConfig,
}

impl Executor {
    /// Creates an executor.
    pub fn new(schema: Schema, resolvers: ResolverMap, scalars: ScalarRegistry) -> Self {
        Self {
            schema: Arc::new(schema),
            resolvers: Arc::new(resolvers),
            scalars: Arc::new(scalars),
            config: ExecutorConfig::default(),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the resolvers.
    pub fn resolvers(&self) -> &ResolverMap {
        &self.resolvers
    }

    /// Executes a request.
    pub async fn execute(&self, request: &Request, ctx: &Context) -> Response {
        let source = request.query.as_str();
        let document = match parse_document(source) {
            Ok(document) => document,
            Err(err) => return Response::from_errors(vec![FieldError::from(&err)]),
        };

        let operation = match select_operation(&document, request.operation_name.as_deref()) {
            Ok(op) => op,
            Err(message) => return Response::from_errors(vec![FieldError::new(message)]),
        };

        let errors = validation::validate(
            &self.schema,
            &document,
            operation,
            self.config.max_depth,
            source,
        );
        if !errors.is_empty() {
            return Response::from_errors(
                errors
                    .into_iter()
                    .map(|e| e.with_code("GRAPHQL_VALIDATION_FAILED"))
                    .collect(),
            );
        }

        let coercer = InputCoercer::new(&self.schema, &self.scalars);
        let variables =
            match coercer.coerce_variables(&operation.variables, request.variables.as_ref()) {
                Ok(vars) => vars,
                Err(messages) => {
                    return Response::from_errors(
                        messages
                            .into_iter()
                            .map(|m| FieldError::new(m).with_code("BAD_USER_INPUT"))
                            .collect(),
                    )
                }
            };

        let Some(root_type) = self.schema.root_type(operation.operation) else {
            return Response::from_errors(vec![FieldError::new(format!(
                "Schema is not configured to execute {} operation.",
                operation.operation.as_str()
            ))]);
        };
        if operation.operation == OperationType::Subscription {
            return Response::from_errors(vec![FieldError::new(
                "Subscriptions are not supported over this transport.",
            )]);
        }

        debug!(
            operation = operation.name.as_ref().map_or("<anonymous>", |n| n.as_str()),
            kind = operation.operation.as_str(),
            "executing operation"
        );

        let exec = ExecutionContext {
            schema: &self.schema,
            resolvers: &self.resolvers,
            scalars: &self.scalars,
            coercer,
            ctx,
            fragments: document.fragments().map(|f| (f.name.as_str(), f)).collect(),
            variables,
            source,
            errors: Mutex::new(Vec::new()),
        };

        let root = Value::Object(Map::new());
        let serial = operation.operation == OperationType::Mutation;
        let data = exec
            .execute_selection_set(root_type, vec![&operation.selection_set], &root, Vec::new(), serial)
            .await;

        Response {
            data: Some(data.unwrap_or(Value::Null)),
            errors: exec.errors.into_inner().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Picks the operation to run from a document.
fn select_operation<'d>(
    document: &'d Document,
    name: Option<&str>,
) -> Result<&'d OperationDefinition, String> {
    let mut operations = document.operations();
    match name {
        Some(name) => document
            .operations()
            .find(|op| op.name.as_ref().is_some_and(|n| n.as_str() == name))
            .ok_or_else(|| format!("Unknown operation named \"{name}\".")),
        None => match (operations.next(), operations.next()) {
            (Some(op), None) => Ok(op),
            (None, _) => Err("Must provide an operation.".to_string()),
            (Some(_), Some(_)) => {
                Err("Must provide operation name if query contains multiple operations.".to_string())
            }
        },
    }
}

/// A field being executed: its parent type, definition and merged selections.
struct FieldPlan<'a> {
    parent_type: &'a str,
    def: &'a FieldDef,
    fields: Vec<&'a Field>,
}

impl FieldPlan<'_> {
    fn label(&self) -> String {
        format!("{}.{}", self.parent_type, self.def.name)
    }
}

struct ExecutionContext<'a> {
    schema: &'a Schema,
    resolvers: &'a ResolverMap,
    scalars: &'a ScalarRegistry,
    coercer: InputCoercer<'a>,
    ctx: &'a Context,
    fragments: HashMap<&'a str, &'a FragmentDefinition>,
    variables: Map<String, Value>,
    source: &'a str,
    errors: Mutex<Vec<FieldError>>,
}

impl<'a> ExecutionContext<'a> {
    fn record(&self, error: FieldError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    fn location(&self, span: Span) -> ErrorLocation {
        span.line_column(self.source).into()
    }

    fn execute_selection_set<'f>(
        &'f self,
        type_name: &'a str,
        sets: Vec<&'a SelectionSet>,
        parent: &'f Value,
        path: Vec<PathSegment>,
        serial: bool,
    ) -> BoxFuture<'f, Option<Value>> {
        async move {
            let grouped = self.collect_fields(type_name, &sets);
            let mut result = Map::with_capacity(grouped.len());

            if serial {
                for (key, fields) in grouped {
                    let mut field_path = path.clone();
                    field_path.push(PathSegment::Field(key.to_string()));
                    let value = self.execute_field(type_name, parent, fields, field_path).await?;
                    result.insert(key.to_string(), value);
                }
            } else {
                let pending = grouped.into_iter().map(|(key, fields)| {
                    let mut field_path = path.clone();
                    field_path.push(PathSegment::Field(key.to_string()));
                    self.execute_field(type_name, parent, fields, field_path)
                        .map(move |value| (key, value))
                });
                for (key, value) in join_all(pending).await {
                    result.insert(key.to_string(), value?);
                }
            }

            Some(Value::Object(result))
        }
        .boxed()
    }

    fn execute_field<'f>(
        &'f self,
        parent_type: &'a str,
        parent: &'f Value,
        fields: Vec<&'a Field>,
        path: Vec<PathSegment>,
    ) -> BoxFuture<'f, Option<Value>> {
        async move {
            let field = *fields.first()?;
            let name = field.name.as_str();
            if name == "__typename" {
                return Some(Value::String(parent_type.to_string()));
            }

            let Some(def) = self.schema.field(parent_type, name) else {
                self.record(
                    FieldError::new(format!("Cannot query field \"{name}\" on type \"{parent_type}\"."))
                        .with_location(self.location(field.span))
                        .with_path(path),
                );
                return Some(Value::Null);
            };
            let plan = FieldPlan {
                parent_type,
                def,
                fields,
            };

            let args = match self.coercer.coerce_arguments(
                &def.arguments,
                &field.arguments,
                &self.variables,
            ) {
                Ok(args) => args,
                Err(message) => {
                    self.record(
                        FieldError::new(message)
                            .with_location(self.location(field.span))
                            .with_path(path)
                            .with_code("BAD_USER_INPUT"),
                    );
                    return null_unless_required(&def.ty);
                }
            };

            let info = ResolverInfo::new(def.name.clone(), parent_type)
                .with_return_type(def.ty.to_string())
                .with_path(path.clone());
            let resolved = self
                .resolvers
                .get(parent_type, &def.name)
                .resolve(parent, &args, self.ctx, &info)
                .await;

            match resolved {
                Ok(value) => self.complete_value(&def.ty, &plan, value, path).await,
                Err(err) => {
                    self.record_resolver_error(&err, field, path);
                    null_unless_required(&def.ty)
                }
            }
        }
        .boxed()
    }

    fn record_resolver_error(&self, err: &ResolverError, field: &Field, path: Vec<PathSegment>) {
        self.record(
            FieldError::new(err.to_string())
                .with_location(self.location(field.span))
                .with_path(path)
                .with_code(err.code()),
        );
    }

    /// Completes a resolved value; `None` means a null must propagate upward.
    fn complete_value<'f>(
        &'f self,
        ty: &'a Type,
        plan: &'f FieldPlan<'a>,
        value: Value,
        path: Vec<PathSegment>,
    ) -> BoxFuture<'f, Option<Value>> {
        async move {
            match ty {
                Type::NonNull(inner, _) => {
                    if value.is_null() {
                        self.record(
                            FieldError::new(format!(
                                "Cannot return null for non-nullable field {}.",
                                plan.label()
                            ))
                            .with_location(self.location(plan.fields[0].span))
                            .with_path(path),
                        );
                        return None;
                    }
                    self.complete_inner(inner, plan, value, path).await
                }
                _ if value.is_null() => Some(Value::Null),
                _ => Some(
                    self.complete_inner(ty, plan, value, path)
                        .await
                        .unwrap_or(Value::Null),
                ),
            }
        }
        .boxed()
    }

    fn complete_inner<'f>(
        &'f self,
        ty: &'a Type,
        plan: &'f FieldPlan<'a>,
        value: Value,
        path: Vec<PathSegment>,
    ) -> BoxFuture<'f, Option<Value>> {
        async move {
            match ty {
                Type::NonNull(..) => self.complete_value(ty, plan, value, path).await,
                Type::List(inner, _) => {
                    let Value::Array(items) = value else {
                        self.fail(
                            plan,
                            path,
                            format!(
                                "Expected Iterable, but did not find one for field \"{}\".",
                                plan.label()
                            ),
                        );
                        return None;
                    };
                    let completed = join_all(items.into_iter().enumerate().map(|(i, item)| {
                        let mut item_path = path.clone();
                        item_path.push(PathSegment::Index(i));
                        self.complete_value(inner, plan, item, item_path)
                    }))
                    .await;
                    completed.into_iter().collect::<Option<Vec<_>>>().map(Value::Array)
                }
                Type::Named(name) => self.complete_named(name.as_str(), plan, value, path).await,
            }
        }
        .boxed()
    }

    async fn complete_named(
        &self,
        type_name: &'a str,
        plan: &FieldPlan<'a>,
        value: Value,
        path: Vec<PathSegment>,
    ) -> Option<Value> {
        let schema = self.schema;
        let Some(def) = schema.get_type(type_name) else {
            self.fail(plan, path, format!("Unknown type \"{type_name}\"."));
            return None;
        };

        let object_type = match &def.kind {
            TypeKind::Scalar => {
                return match self.scalars.serialize(type_name, &value) {
                    Ok(v) => Some(v),
                    Err(message) => {
                        self.fail(plan, path, message);
                        None
                    }
                };
            }
            TypeKind::Enum { values } => {
                return match value.as_str() {
                    Some(s) if values.iter().any(|v| v == s) => Some(value),
                    _ => {
                        self.fail(
                            plan,
                            path,
                            format!("Enum \"{type_name}\" cannot represent value: {value}"),
                        );
                        None
                    }
                };
            }
            TypeKind::Object { .. } => def.name.as_str(),
            TypeKind::Interface { .. } | TypeKind::Union { .. } => {
                let runtime = value
                    .get("__typename")
                    .and_then(Value::as_str)
                    .and_then(|name| schema.get_type(name))
                    .filter(|t| matches!(t.kind, TypeKind::Object { .. }))
                    .filter(|t| schema.is_possible_type(type_name, &t.name));
                match runtime {
                    Some(t) => t.name.as_str(),
                    None => {
                        self.fail(
                            plan,
                            path,
                            format!(
                                "Abstract type \"{type_name}\" must resolve to an Object type at runtime for field \"{}\". Return a \"__typename\" naming one of its possible types.",
                                plan.label()
                            ),
                        );
                        return None;
                    }
                }
            }
            TypeKind::InputObject { .. } => {
                self.fail(
                    plan,
                    path,
                    format!("Input type \"{type_name}\" cannot be used as an output type."),
                );
                return None;
            }
        };

        let sub_sets: Vec<&'a SelectionSet> = plan
            .fields
            .iter()
            .filter_map(|f| f.selection_set.as_ref())
            .collect();
        self.execute_selection_set(object_type, sub_sets, &value, path, false)
            .await
    }

    fn fail(&self, plan: &FieldPlan<'_>, path: Vec<PathSegment>, message: String) {
        self.record(
            FieldError::new(message)
                .with_location(self.location(plan.fields[0].span))
                .with_path(path),
        );
    }

    /// Groups the fields of `sets` that apply to `type_name` by response key.
    fn collect_fields(
        &self,
        type_name: &str,
        sets: &[&'a SelectionSet],
    ) -> IndexMap<&'a str, Vec<&'a Field>> {
        let mut grouped = IndexMap::new();
        let mut visited = HashSet::new();
        for set in sets {
            self.collect_into(type_name, set, &mut grouped, &mut visited);
        }
        grouped
    }

    fn collect_into(
        &self,
        type_name: &str,
        set: &'a SelectionSet,
        grouped: &mut IndexMap<&'a str, Vec<&'a Field>>,
        visited: &mut HashSet<&'a str>,
    ) {
        for selection in &set.selections {
            if !self.should_include(selection.directives()) {
                continue;
            }
            match selection {
                Selection::Field(field) => {
                    grouped.entry(field.response_key()).or_default().push(field);
                }
                Selection::FragmentSpread(spread) => {
                    if !visited.insert(spread.name.as_str()) {
                        continue;
                    }
                    let Some(fragment) = self.fragments.get(spread.name.as_str()).copied() else {
                        continue;
                    };
                    if self
                        .schema
                        .is_possible_type(fragment.type_condition.as_str(), type_name)
                    {
                        self.collect_into(type_name, &fragment.selection_set, grouped, visited);
                    }
                }
                Selection::InlineFragment(inline) => {
                    let applies = inline
                        .type_condition
                        .as_ref()
                        .map_or(true, |tc| self.schema.is_possible_type(tc.as_str(), type_name));
                    if applies {
                        self.collect_into(type_name, &inline.selection_set, grouped, visited);
                    }
                }
            }
        }
    }

    /// Evaluates `@skip(if:)` and `@include(if:)`.
    fn should_include(&self, directives: &[Directive]) -> bool {
        let condition = |directive: &Directive| {
            directive
                .arguments
                .iter()
                .find(|a| a.name.as_str() == "if")
                .is_some_and(|arg| match &arg.value {
                    Literal::Boolean(b, _) => *b,
                    Literal::Variable(name) => self
                        .variables
                        .get(name.as_str())
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    _ => false,
                })
        };

        directives.iter().all(|directive| match directive.name.as_str() {
            "skip" => !condition(directive),
            "include" => condition(directive),
            _ => true,
        })
    }
}

fn null_unless_required(ty: &Type) -> Option<Value> {
    if ty.is_non_null() {
        None
    } else {
        Some(Value::Null)
    }
}
