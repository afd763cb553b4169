//! A host-supplied context value reaches resolvers in-process, over HTTP
//! and over WebSocket.

use morpher::{
    initialize, load, Client, Config, HttpLink, InitOptions, InstalledPackages, LocalLink,
    Module, MorpherServer, SdkError, SdkResult, WsLink,
};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const SECRET_MESSAGE: &str = "SECRET_MESSAGE_IN_CONTEXT";

fn installed() -> InstalledPackages {
    InstalledPackages::from_pairs([
        ("apollo-server-express", "2.25.2"),
        ("graphql", "14.7.0"),
        ("graphql-load", "0.1.1"),
        ("graphql-type-json", "0.3.2"),
        ("graphql-tools", "4.0.8"),
    ])
}

/// The host application: one query field answered from its context.
fn server() -> MorpherServer {
    static SERVER: OnceLock<MorpherServer> = OnceLock::new();
    SERVER
        .get_or_init(|| {
            load(
                Module::new()
                    .type_defs("extend type Query { secretContextMessage: String }")
                    .resolver_fn("Query", "secretContextMessage", |_, _, ctx, _| {
                        Ok(ctx.value("secretContextMessage").cloned().unwrap_or(Value::Null))
                    }),
            )
            .unwrap();

            initialize(
                InitOptions::new(installed())
                    .config(Config::new().port(0))
                    .context(|_request| async {
                        let mut values = Map::new();
                        values.insert("secretContextMessage".to_string(), json!(SECRET_MESSAGE));
                        Ok::<_, SdkError>(values)
                    }),
            )
            .unwrap()
        })
        .clone()
}

async fn assert_secret_message(client: &Client) {
    let response = client.query("{ secretContextMessage }").await.unwrap();
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    assert_eq!(
        response.data.unwrap()["secretContextMessage"],
        SECRET_MESSAGE
    );
}

#[tokio::test]
async fn test_custom_context_local() {
    let client = Client::new(LocalLink::new(server()));
    assert_secret_message(&client).await;
}

/// Serves the host application on an ephemeral port until `stop` fires.
async fn serve() -> (SocketAddr, oneshot::Sender<()>, JoinHandle<SdkResult<()>>) {
    let server = server();
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = stopped.await;
            })
            .await
    });
    (addr, stop, handle)
}

#[tokio::test]
async fn test_custom_context_http() {
    let (addr, stop, handle) = serve().await;

    let client = Client::new(HttpLink::new(format!(
        "http://{addr}{}",
        server().config().graphql_endpoint
    )));
    assert_secret_message(&client).await;

    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct SecretData {
        secret_context_message: String,
    }
    let data: SecretData = client.query_data("{ secretContextMessage }").await.unwrap();
    assert_eq!(data.secret_context_message, SECRET_MESSAGE);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_custom_context_ws() {
    let (addr, stop, handle) = serve().await;

    let client = Client::new(WsLink::new(format!(
        "ws://{addr}{}",
        server().config().graphql_endpoint
    )));
    assert_secret_message(&client).await;

    // Both operations share the link's one connection.
    let (secret, framework) = tokio::join!(
        client.query_data::<Value>("{ secretContextMessage }"),
        client.query_data::<Value>("{ framework }"),
    );
    assert_eq!(secret.unwrap(), json!({ "secretContextMessage": SECRET_MESSAGE }));
    assert_eq!(framework.unwrap(), json!({ "framework": "morpher" }));

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
