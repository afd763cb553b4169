//! Serving an exposed collection and the accounts context over HTTP.

use morpher::users::{hash_login_token, USERS_COLLECTION};
use morpher::{
    db, expose, initialize, load, Client, ClientConfig, Config, ErrorCode, ExposureConfig,
    HttpLink, InitOptions, InstalledPackages, Module, MorpherServer, SdkError,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{mpsc, OnceLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Starts the server once, on its own thread and runtime, so it outlives
/// the runtime of any single test.
fn server_addr() -> SocketAddr {
    static ADDR: OnceLock<SocketAddr> = OnceLock::new();
    *ADDR.get_or_init(|| {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async move {
                let server = start().await;
                let listener = server.bind().await.unwrap();
                tx.send(listener.local_addr().unwrap()).unwrap();
                server.serve(listener, std::future::pending()).await.unwrap();
            });
        });
        rx.recv().unwrap()
    })
}

async fn start() -> MorpherServer {
    db().collection(USERS_COLLECTION)
        .insert(json!({
            "_id": "ada",
            "username": "ada",
            "roles": ["admin"],
            "services": {"resume": {"loginTokens": [{"hashedToken": hash_login_token("ada-token")}]}}
        }))
        .await
        .unwrap();
    db().collection("notes")
        .insert(json!({"_id": "n1", "owner": "ada", "text": "hello"}))
        .await
        .unwrap();

    load(
        Module::new()
            .type_defs("type Note { _id: ID!, owner: String, text: String }")
            .type_defs("extend type Query { me: JSON }")
            .resolver_fn("Query", "me", |_, _, ctx, _| {
                Ok(ctx.value("user").cloned().unwrap_or(Value::Null))
            }),
    )
    .unwrap();
    expose(
        "notes",
        ExposureConfig::new()
            .mutations()
            .firewall(|ctx| match ctx.value("userId") {
                Some(Value::String(_)) => Ok(()),
                _ => Err(SdkError::forbidden("login required")),
            }),
    )
    .unwrap();

    let installed = InstalledPackages::from_lockfile(
        r#"
        [[package]]
        name = "apollo-server-express"
        version = "2.9.0"

        [[package]]
        name = "graphql"
        version = "14.5.8"

        [[package]]
        name = "graphql-load"
        version = "0.1.1"

        [[package]]
        name = "graphql-type-json"
        version = "0.3.0"

        [[package]]
        name = "graphql-tools"
        version = "4.0.6"
        "#,
    )
    .unwrap();
    initialize(InitOptions::new(installed).config(Config::new().port(0).graphql_endpoint("/api").max_body_bytes(4096)))
        .unwrap()
}

async fn raw(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn client(addr: SocketAddr, token: Option<&str>) -> Client {
    let mut config = ClientConfig::new(format!("http://{addr}/api")).max_retries(0);
    if let Some(token) = token {
        config = config.header("meteor-login-token", token);
    }
    Client::new(HttpLink::with_config(config))
}

#[tokio::test]
async fn test_routes() {
    let addr = server_addr();

    let health = raw(
        addr,
        "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(health.starts_with("HTTP/1.1 200"), "{health}");
    assert!(health.ends_with(r#"{"status":"healthy"}"#));

    let page = raw(
        addr,
        "GET /api HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(page.starts_with("HTTP/1.1 200"));
    assert!(page.contains("text/html"));

    let missing = raw(
        addr,
        "GET /nope HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(missing.starts_with("HTTP/1.1 404"));

    let preflight = raw(
        addr,
        "OPTIONS /api HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(preflight.starts_with("HTTP/1.1 200"));
    assert!(preflight
        .to_ascii_lowercase()
        .contains("access-control-allow-methods: get, post, options"));

    let body = "{not json";
    let invalid = raw(
        addr,
        &format!(
            "POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ),
    )
    .await;
    assert!(invalid.starts_with("HTTP/1.1 400"));
    assert!(invalid.contains("Invalid JSON"));
}

#[tokio::test]
async fn test_login_token_resolves_user() {
    let addr = server_addr();

    let me: Value = client(addr, Some("ada-token"))
        .query_data("{ me }")
        .await
        .unwrap();
    assert_eq!(
        me,
        json!({"me": {"_id": "ada", "username": "ada", "roles": ["admin"]}})
    );

    let anonymous: Value = client(addr, None).query_data("{ me }").await.unwrap();
    assert_eq!(anonymous, json!({"me": null}));
}

#[tokio::test]
async fn test_exposed_collection_behind_firewall() {
    let addr = server_addr();

    let denied = client(addr, None)
        .query("{ notes { _id text } }")
        .await
        .unwrap();
    assert_eq!(denied.data.unwrap(), json!({"notes": null}));
    assert_eq!(denied.errors[0].code(), Some("FORBIDDEN"));
    assert_eq!(denied.errors[0].message, "Not authorized: login required");

    let client = client(addr, Some("ada-token"));
    let notes: Value = client
        .query_data(r#"{ notes(filters: {owner: "ada"}) { _id text } notesCount }"#)
        .await
        .unwrap();
    assert_eq!(
        notes,
        json!({"notes": [{"_id": "n1", "text": "hello"}], "notesCount": 1})
    );

    let err = client
        .query_data::<Value>(r#"mutation { notesInsert(document: {_id: "n1"}) }"#)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ExecutionError);

    let parse = client.query("{ notes {").await.unwrap();
    assert!(parse.data.is_none());
    assert_eq!(parse.errors[0].code(), Some("GRAPHQL_PARSE_FAILED"));
}

#[tokio::test]
async fn test_oversized_and_deeply_nested_requests_are_refused() {
    let addr = server_addr();
    let post = |body: String| {
        format!(
            "POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    };

    let padding = "x".repeat(5000);
    let oversized = raw(addr, &post(json!({"query": format!("# {padding}\n{{ me }}")}).to_string())).await;
    assert!(oversized.starts_with("HTTP/1.1 413"), "{oversized}");
    assert!(oversized.contains("Request body exceeds 4096 bytes"));

    let query = format!("{{ notes(filters: {}) {{ _id }} }}", "[".repeat(2000));
    let nested = raw(addr, &post(json!({ "query": query }).to_string())).await;
    assert!(nested.starts_with("HTTP/1.1 400"), "{nested}");
    assert!(nested.contains("Document nesting exceeds"));
}
