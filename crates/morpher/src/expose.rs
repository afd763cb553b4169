//! Exposing database collections through generated schema.
//!
//! [`expose`] turns a collection into root fields:
//!
//! ```text
//! type Post { _id: ID! }
//! extend type Query { posts(filters: JSON, options: JSON): [Post], postsCount(filters: JSON): Int }
//! extend type Mutation { postsInsert(document: JSON!): String, ... }
//! ```
//!
//! Generated resolvers use the request's [`Db`] and fall back to the
//! process-wide handle.

use crate::db::{db, Collection, Db, FindOptions};
use crate::error::{SdkError, SdkResult};
use crate::loader::{self, Module};
use morpher_runtime::{Context, ResolverArgs, ResolverError, ResolverResult};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Access check run before every generated resolver.
pub type Firewall = Arc<dyn Fn(&Context) -> SdkResult<()> + Send + Sync>;

/// Which operations to generate for a collection.
#[derive(Clone)]
pub struct ExposureConfig {
    /// Object type name. When unset, an already declared type named after
    /// the collection (`notes` -> `Note` or `Notes`) is reused, and
    /// otherwise `Notes` is declared with just an `_id`.
    pub type_name: Option<String>,
    pub find: bool,
    pub count: bool,
    pub insert: bool,
    pub update: bool,
    pub remove: bool,
    pub firewall: Option<Firewall>,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            type_name: None,
            find: true,
            count: true,
            insert: false,
            update: false,
            remove: false,
            firewall: None,
        }
    }
}

impl ExposureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the object type name.
    #[must_use]
    pub fn type_name(mut self, name: impl Into<String>) -> Self {
        self.type_name = Some(name.into());
        self
    }

    /// Enables insert, update and remove.
    #[must_use]
    pub fn mutations(mut self) -> Self {
        self.insert = true;
        self.update = true;
        self.remove = true;
        self
    }

    #[must_use]
    pub fn find(mut self, enabled: bool) -> Self {
        self.find = enabled;
        self
    }

    #[must_use]
    pub fn count(mut self, enabled: bool) -> Self {
        self.count = enabled;
        self
    }

    #[must_use]
    pub fn insert(mut self, enabled: bool) -> Self {
        self.insert = enabled;
        self
    }

    #[must_use]
    pub fn update(mut self, enabled: bool) -> Self {
        self.update = enabled;
        self
    }

    #[must_use]
    pub fn remove(mut self, enabled: bool) -> Self {
        self.remove = enabled;
        self
    }

    /// Installs a firewall.
    #[must_use]
    pub fn firewall<F>(mut self, firewall: F) -> Self
    where
        F: Fn(&Context) -> SdkResult<()> + Send + Sync + 'static,
    {
        self.firewall = Some(Arc::new(firewall));
        self
    }
}

impl fmt::Debug for ExposureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExposureConfig")
            .field("type_name", &self.type_name)
            .field("find", &self.find)
            .field("count", &self.count)
            .field("insert", &self.insert)
            .field("update", &self.update)
            .field("remove", &self.remove)
            .field("firewall", &self.firewall.is_some())
            .finish()
    }
}

/// Exposes `collection` in the process-wide schema.
pub fn expose(collection: &str, config: ExposureConfig) -> SdkResult<()> {
    let (type_name, _) = exposed_type(collection, &config, loader::declares_type)?;
    loader::load(exposure_module(collection, &config, loader::declares_type)?)?;
    info!(collection, type_name = %type_name, "exposed collection");
    Ok(())
}

/// Builds the module [`expose`] loads. `declared` tells whether a type name
/// is already defined; a declared type is reused instead of redefined.
pub fn exposure_module(
    collection: &str,
    config: &ExposureConfig,
    declared: impl Fn(&str) -> bool,
) -> SdkResult<Module> {
    let (type_name, declare_type) = exposed_type(collection, config, declared)?;
    let field = camel_case(collection);

    let mut queries = Vec::new();
    let mut mutations = Vec::new();
    if config.find {
        queries.push(format!("{field}(filters: JSON, options: JSON): [{type_name}]"));
    }
    if config.count {
        queries.push(format!("{field}Count(filters: JSON): Int"));
    }
    if config.insert {
        mutations.push(format!("{field}Insert(document: JSON!): String"));
    }
    if config.update {
        mutations.push(format!("{field}Update(_id: String!, modifier: JSON!): Boolean"));
    }
    if config.remove {
        mutations.push(format!("{field}Remove(_id: String!): Boolean"));
    }

    let mut sdl = String::new();
    if declare_type {
        sdl.push_str(&format!("type {type_name} {{\n  _id: ID!\n}}\n"));
    }
    if !queries.is_empty() {
        sdl.push_str(&format!("extend type Query {{\n  {}\n}}\n", queries.join("\n  ")));
    }
    if !mutations.is_empty() {
        sdl.push_str(&format!(
            "extend type Mutation {{\n  {}\n}}\n",
            mutations.join("\n  ")
        ));
    }

    let mut module = Module::new();
    if !sdl.is_empty() {
        module = module.type_defs(sdl);
    }

    let resolvers = Resolvers {
        collection: collection.to_string(),
        firewall: config.firewall.clone(),
    };
    if config.find {
        module = resolvers.add(module, "Query", &field, |coll, args| async move {
            let filters = args.get("filters").cloned().unwrap_or(Value::Null);
            let options = find_options(&args)?;
            Ok::<_, ResolverError>(Value::Array(coll.find(&filters, &options).await))
        });
    }
    if config.count {
        module = resolvers.add(module, "Query", &format!("{field}Count"), |coll, args| async move {
            let filters = args.get("filters").cloned().unwrap_or(Value::Null);
            Ok::<_, ResolverError>(Value::from(coll.count(&filters).await))
        });
    }
    if config.insert {
        module = resolvers.add(module, "Mutation", &format!("{field}Insert"), |coll, args| async move {
            let document: Value = args.require("document")?;
            Ok::<_, ResolverError>(Value::String(coll.insert(document).await?))
        });
    }
    if config.update {
        module = resolvers.add(module, "Mutation", &format!("{field}Update"), |coll, args| async move {
            let id: String = args.require("_id")?;
            let modifier: Value = args.require("modifier")?;
            Ok::<_, ResolverError>(Value::Bool(coll.update(&id, &modifier).await?))
        });
    }
    if config.remove {
        module = resolvers.add(module, "Mutation", &format!("{field}Remove"), |coll, args| async move {
            let id: String = args.require("_id")?;
            Ok::<_, ResolverError>(Value::Bool(coll.remove(&id).await))
        });
    }

    Ok(module)
}

struct Resolvers {
    collection: String,
    firewall: Option<Firewall>,
}

impl Resolvers {
    fn add<F, Fut>(&self, module: Module, type_name: &str, field: &str, f: F) -> Module
    where
        F: Fn(Collection, ResolverArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        let collection = self.collection.clone();
        let firewall = self.firewall.clone();
        let f = Arc::new(f);
        module.resolver_async(type_name, field, move |_, args, ctx, _| {
            let guard = firewall.as_ref().map_or(Ok(()), |check| check(&ctx));
            let coll = ctx
                .get::<Db>()
                .map_or_else(|| db().collection(&collection), |db| db.collection(&collection));
            let f = Arc::clone(&f);
            async move {
                guard.map_err(ResolverError::from)?;
                f(coll, args).await
            }
        })
    }
}

fn find_options(args: &ResolverArgs) -> Result<FindOptions, ResolverError> {
    match args.get("options") {
        None | Some(Value::Null) => Ok(FindOptions::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| ResolverError::ArgumentParse("options".to_string(), e.to_string())),
    }
}

/// The object type of an exposed collection, and whether it still has to
/// be declared.
fn exposed_type(
    collection: &str,
    config: &ExposureConfig,
    declared: impl Fn(&str) -> bool,
) -> SdkResult<(String, bool)> {
    if !is_name(&camel_case(collection)) {
        return Err(SdkError::validation(format!(
            "Cannot expose collection \"{collection}\": not a valid GraphQL name"
        )));
    }

    if let Some(name) = &config.type_name {
        if !is_name(name) {
            return Err(SdkError::validation(format!(
                "Invalid type name \"{name}\" for collection \"{collection}\""
            )));
        }
        return Ok((name.clone(), !declared(name)));
    }

    let plural = pascal_case(collection);
    let existing = singular(&plural)
        .filter(|name| is_name(name) && declared(name))
        .or_else(|| declared(&plural).then(|| plural.clone()));
    Ok(match existing {
        Some(name) => (name, false),
        None => (plural, true),
    })
}

/// `Notes` -> `Note`, `Categories` -> `Category`, `Boxes` -> `Box`.
fn singular(name: &str) -> Option<String> {
    if let Some(stem) = name.strip_suffix("ies") {
        return Some(format!("{stem}y"));
    }
    if ["sses", "xes", "ches", "shes"]
        .iter()
        .any(|suffix| name.ends_with(suffix))
    {
        return Some(name[..name.len() - 2].to_string());
    }
    name.strip_suffix('s')
        .filter(|stem| !stem.ends_with('s'))
        .map(str::to_string)
}

fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn words(name: &str) -> impl Iterator<Item = &str> {
    name.split(['_', '-', ' ', '.']).filter(|w| !w.is_empty())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_ascii_uppercase().to_string() + chars.as_str()
    })
}

/// `blog_posts` -> `BlogPosts`
fn pascal_case(name: &str) -> String {
    words(name).map(capitalize).collect()
}

/// `blog_posts` -> `blogPosts`
fn camel_case(name: &str) -> String {
    let mut parts = words(name);
    let Some(first) = parts.next() else {
        return String::new();
    };
    let mut out = String::from(first);
    out.extend(parts.map(capitalize));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::loader::Loader;
    use morpher_runtime::{ContextExt, Executor, Request, TypedContext};
    use serde_json::json;

    fn executor(loader: &Loader) -> Executor {
        let exec = loader.schema().unwrap();
        Executor::new(exec.schema, exec.resolvers, exec.scalars)
    }

    fn context(db: &Db) -> Context {
        let mut ctx = TypedContext::new();
        ctx.insert(db.clone());
        ctx.into()
    }

    #[test]
    fn test_names() {
        assert_eq!(pascal_case("blog_posts"), "BlogPosts");
        assert_eq!(camel_case("blog-posts"), "blogPosts");
        assert_eq!(camel_case("users"), "users");
        assert!(exposed_type("9lives", &ExposureConfig::new(), |_| false).is_err());
        assert_eq!(
            exposed_type("", &ExposureConfig::new(), |_| false)
                .unwrap_err()
                .code,
            ErrorCode::ValidationError
        );
        assert_eq!(singular("Notes").as_deref(), Some("Note"));
        assert_eq!(singular("Categories").as_deref(), Some("Category"));
        assert_eq!(singular("Boxes").as_deref(), Some("Box"));
        assert_eq!(singular("Classes").as_deref(), Some("Class"));
        assert_eq!(singular("Glass"), None);
    }

    #[test]
    fn test_exposed_type_prefers_declared_names() {
        let config = ExposureConfig::new();
        assert_eq!(
            exposed_type("notes", &config, |name| name == "Note").unwrap(),
            ("Note".to_string(), false)
        );
        assert_eq!(
            exposed_type("notes", &config, |name| name == "Notes").unwrap(),
            ("Notes".to_string(), false)
        );
        assert_eq!(
            exposed_type("blog_posts", &config, |_| false).unwrap(),
            ("BlogPosts".to_string(), true)
        );
        assert_eq!(
            exposed_type("notes", &config.type_name("Memo"), |_| false).unwrap(),
            ("Memo".to_string(), true)
        );
    }

    #[tokio::test]
    async fn test_expose_reuses_host_type_fields() {
        let db = Db::new();
        db.collection("notes")
            .insert(json!({"_id": "n1", "text": "hello"}))
            .await
            .unwrap();

        let mut loader = Loader::with_base().unwrap();
        loader
            .load(Module::new().type_defs("type Note { _id: ID!, text: String }"))
            .unwrap();
        let module =
            exposure_module("notes", &ExposureConfig::new(), |name| loader.declares_type(name))
                .unwrap();
        loader.load(module).unwrap();
        assert!(!loader.declares_type("Notes"));

        let response = executor(&loader)
            .execute(&Request::new("{ notes { _id text } }"), &context(&db))
            .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data.unwrap(),
            json!({"notes": [{"_id": "n1", "text": "hello"}]})
        );
    }

    #[test]
    fn test_exposing_twice_is_rejected() {
        let mut loader = Loader::with_base().unwrap();
        let config = ExposureConfig::new();
        let first = exposure_module("things", &config, |name| loader.declares_type(name)).unwrap();
        loader.load(first).unwrap();

        let second = exposure_module("things", &config, |name| loader.declares_type(name)).unwrap();
        let err = loader.load(second).unwrap_err();
        assert_eq!(err.code, ErrorCode::SchemaError);
        assert!(err.message.contains("Query.things"), "{}", err.message);
        loader.schema().unwrap();
    }

    #[tokio::test]
    async fn test_find_and_count() {
        let db = Db::new();
        let posts = db.collection("blog_posts");
        for (title, views) in [("a", 3), ("b", 1), ("c", 2)] {
            posts.insert(json!({"title": title, "views": views})).await.unwrap();
        }

        let mut loader = Loader::with_base().unwrap();
        loader
            .load(Module::new().type_defs("type BlogPost { _id: ID!, title: String, views: Int }"))
            .unwrap();
        let module =
            exposure_module("blog_posts", &ExposureConfig::new(), |name| loader.declares_type(name))
                .unwrap();
        loader.load(module).unwrap();

        let response = executor(&loader)
            .execute(
                &Request::new(
                    r#"{
                        blogPosts(options: {sort: {views: -1}, limit: 2}) { title views }
                        blogPostsCount(filters: {views: 1})
                    }"#,
                ),
                &context(&db),
            )
            .await;

        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data.unwrap(),
            json!({
                "blogPosts": [{"title": "a", "views": 3}, {"title": "c", "views": 2}],
                "blogPostsCount": 1
            })
        );
    }

    #[tokio::test]
    async fn test_mutations() {
        let db = Db::new();
        let mut loader = Loader::with_base().unwrap();
        loader
            .load(exposure_module("tasks", &ExposureConfig::new().mutations(), |_| false).unwrap())
            .unwrap();
        let executor = executor(&loader);

        let inserted = executor
            .execute(
                &Request::new(r#"mutation { tasksInsert(document: {_id: "t1", done: false}) }"#),
                &context(&db),
            )
            .await;
        assert_eq!(inserted.data.unwrap(), json!({"tasksInsert": "t1"}));

        let mut vars = serde_json::Map::new();
        vars.insert("m".into(), json!({"$set": {"done": true}}));
        let updated = executor
            .execute(
                &Request::new(
                    r#"mutation($m: JSON!) {
                        tasksUpdate(_id: "t1", modifier: $m)
                        tasksRemove(_id: "missing")
                    }"#,
                )
                .variables(vars),
                &context(&db),
            )
            .await;
        assert!(updated.errors.is_empty(), "{:?}", updated.errors);
        assert_eq!(
            updated.data.unwrap(),
            json!({"tasksUpdate": true, "tasksRemove": false})
        );
        assert_eq!(
            db.collection("tasks").find_one(&json!("t1")).await.unwrap()["done"],
            true
        );
    }

    #[tokio::test]
    async fn test_firewall() {
        let db = Db::new();
        db.collection("secrets").insert(json!({"_id": "s"})).await.unwrap();

        let config = ExposureConfig::new().firewall(|ctx: &Context| {
            match ctx.value("userId") {
                Some(Value::String(_)) => Ok(()),
                _ => Err(SdkError::forbidden("login required")),
            }
        });
        let mut loader = Loader::with_base().unwrap();
        loader
            .load(exposure_module("secrets", &config, |_| false).unwrap())
            .unwrap();
        let executor = executor(&loader);
        let request = Request::new("{ secrets { _id } secretsCount }");

        let denied = executor.execute(&request, &context(&db)).await;
        assert_eq!(
            denied.data.unwrap(),
            json!({"secrets": null, "secretsCount": null})
        );
        assert_eq!(denied.errors.len(), 2);
        assert_eq!(denied.errors[0].code(), Some("FORBIDDEN"));

        let mut ctx = TypedContext::new().with_value("userId", "u1");
        ctx.insert(db.clone());
        let allowed = executor.execute(&request, &ctx.into()).await;
        assert!(allowed.errors.is_empty(), "{:?}", allowed.errors);
        assert_eq!(allowed.data.unwrap()["secrets"], json!([{"_id": "s"}]));
    }
}
