//! Integration tests for schema building and execution.

use morpher_runtime::{
    Context, ContextExt, Executor, PathSegment, Request, ResolverError, ResolverMap,
    ScalarRegistry, Schema, TypedContext,
};
use serde_json::json;

/// A schema split across documents, with extensions adding root fields.
#[tokio::test]
async fn test_modular_schema_execution() {
    let schema = Schema::builder()
        .add_sdl("type Query { framework: String } type Mutation { framework: String }")
        .unwrap()
        .add_sdl(
            r"
            type Post { _id: ID!, title: String, authorId: ID }
            extend type Query { posts(limit: Int = 2): [Post!]! }
            ",
        )
        .unwrap()
        .build()
        .unwrap();

    let mut resolvers = ResolverMap::new();
    resolvers.register_fn("Query", "framework", |_, _, _, _| Ok(json!("morpher")));
    resolvers.register_async("Query", "posts", |_, args, _, _| async move {
        let limit: usize = args.require("limit")?;
        let posts: Vec<_> = (1..=3)
            .map(|i| json!({"_id": format!("p{i}"), "title": format!("Post {i}"), "author_id": "u1"}))
            .take(limit)
            .collect();
        Ok::<_, ResolverError>(json!(posts))
    });

    let executor = Executor::new(schema, resolvers, ScalarRegistry::new());
    let response = executor
        .execute(
            &Request::new("{ framework posts { _id title authorId } }"),
            &Context::new(),
        )
        .await;

    assert!(response.errors.is_empty(), "{:?}", response.errors);
    let data = response.data.unwrap();
    assert_eq!(data["framework"], "morpher");
    assert_eq!(data["posts"].as_array().unwrap().len(), 2);
    // Default resolver falls back to the snake_case property.
    assert_eq!(data["posts"][1]["authorId"], "u1");
}

/// Resolver errors are collected alongside partial data.
#[tokio::test]
async fn test_partial_results() {
    let schema = Schema::parse(
        "type Query { items: [Item] } type Item { name: String, secret: String }",
    )
    .unwrap();

    let mut resolvers = ResolverMap::new();
    resolvers.register_fn("Query", "items", |_, _, _, _| {
        Ok(json!([{"name": "a"}, {"name": "b"}]))
    });
    resolvers.register_fn("Item", "secret", |parent, _, ctx, _| {
        if ctx.value("admin").and_then(|v| v.as_bool()) == Some(true) {
            Ok(json!(format!("{}-secret", parent["name"].as_str().unwrap_or_default())))
        } else {
            Err(ResolverError::Forbidden("admin only".into()))
        }
    });

    let executor = Executor::new(schema, resolvers, ScalarRegistry::new());
    let request = Request::new("{ items { name secret } }");

    let response = executor.execute(&request, &Context::new()).await;
    assert_eq!(
        response.data.unwrap(),
        json!({"items": [{"name": "a", "secret": null}, {"name": "b", "secret": null}]})
    );
    assert_eq!(response.errors.len(), 2);
    assert_eq!(response.errors[0].message, "Not authorized: admin only");
    assert_eq!(response.errors[0].code(), Some("FORBIDDEN"));
    assert_eq!(
        response.errors[1].path,
        vec![
            PathSegment::Field("items".into()),
            PathSegment::Index(1),
            PathSegment::Field("secret".into()),
        ]
    );

    let admin: Context = TypedContext::new().with_value("admin", true).into();
    let response = executor.execute(&request, &admin).await;
    assert!(response.errors.is_empty());
    assert_eq!(response.data.unwrap()["items"][0]["secret"], "a-secret");
}

/// Requests deserialize from the JSON wire shape.
#[test]
fn test_request_wire_format() {
    let request: Request = serde_json::from_value(json!({
        "query": "query Q { a }",
        "operationName": "Q",
        "variables": {"x": 1}
    }))
    .unwrap();

    assert_eq!(request.operation_name.as_deref(), Some("Q"));
    assert_eq!(request.variables.unwrap()["x"], 1);
}
