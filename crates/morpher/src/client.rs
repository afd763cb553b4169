//! GraphQL client.
//!
//! A [`Client`] sends requests through a [`Link`]:
//!
//! - [`LocalLink`] executes against a [`MorpherServer`] in the same process.
//! - [`HttpLink`] POSTs JSON to a server over HTTP/1, with retries.
//! - [`WsLink`] multiplexes requests over one `graphql-transport-ws`
//!   connection, opened on first use and reopened after it drops.
//!
//! ```ignore
//! let client = Client::new(HttpLink::new("http://127.0.0.1:4000/graphql"));
//! let data: serde_json::Value = client.query_data("{ framework }").await?;
//! ```

use crate::error::{ErrorCode, SdkError, SdkResult};
use crate::server::MorpherServer;
use crate::ws::{send_json, ClientMessage, ServerMessage, PROTOCOL};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::Method;
use hyper_util::rt::TokioIo;
use morpher_runtime::{Request, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Transport a [`Client`] sends requests through.
pub trait Link: Send + Sync {
    fn request(&self, request: Request) -> BoxFuture<'_, SdkResult<Response>>;
}

/// Executes requests in-process.
#[derive(Debug, Clone)]
pub struct LocalLink {
    server: MorpherServer,
    headers: HashMap<String, String>,
}

impl LocalLink {
    pub fn new(server: MorpherServer) -> Self {
        Self {
            server,
            headers: HashMap::new(),
        }
    }

    /// Sends `token` in the server's login-token header.
    #[must_use]
    pub fn login_token(self, token: impl Into<String>) -> Self {
        let name = self.server.config().login_token_header.clone();
        self.header(name, token)
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

impl Link for LocalLink {
    fn request(&self, request: Request) -> BoxFuture<'_, SdkResult<Response>> {
        async move { Ok(self.server.execute(request, self.headers.clone()).await) }.boxed()
    }
}

/// HTTP link configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// URL of the GraphQL endpoint.
    pub url: String,
    /// Timeout for each of connect, send and read.
    pub timeout: Duration,
    /// Maximum retry attempts.
    pub max_retries: u32,
    /// Headers sent with every request.
    pub headers: HashMap<String, String>,
    /// Retry delay base in milliseconds, doubled on each attempt.
    pub retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            headers: HashMap::new(),
            retry_delay_ms: 100,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Adds a default header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn retry_delay_ms(mut self, delay: u64) -> Self {
        self.retry_delay_ms = delay;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    path: String,
}

impl Target {
    fn authority(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Parses `http://host[:port][/path]`.
fn parse_url(url: &str) -> SdkResult<Target> {
    let url = url.trim();
    if url.starts_with("https://") {
        return Err(SdkError::new(
            ErrorCode::InvalidUrl,
            "HTTPS is not supported by HttpLink; terminate TLS in front of the server",
        ));
    }
    let rest = url.strip_prefix("http://").unwrap_or(url);

    let (host_port, path) = match rest.find('/') {
        Some(slash) => rest.split_at(slash),
        None => (rest, "/"),
    };

    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| {
                SdkError::new(ErrorCode::InvalidUrl, format!("Invalid port: {port}"))
            })?;
            (host, port)
        }
        None => (host_port, 80),
    };
    if host.is_empty() {
        return Err(SdkError::new(
            ErrorCode::InvalidUrl,
            format!("Missing host: {url}"),
        ));
    }

    Ok(Target {
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}

/// Sends requests over HTTP/1.
#[derive(Debug, Clone)]
pub struct HttpLink {
    config: ClientConfig,
}

impl HttpLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(ClientConfig::new(url))
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends the request, retrying retryable failures with exponential
    /// backoff.
    pub async fn send(&self, request: &Request) -> SdkResult<Response> {
        let target = parse_url(&self.config.url)?;
        let body = Bytes::from(
            serde_json::to_vec(request).map_err(|e| SdkError::serialize(e.to_string()))?,
        );

        let mut attempt = 0;
        loop {
            match self.post(&target, body.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_delay_ms * 2_u64.pow(attempt - 1);
                    debug!(attempt, delay, "retrying after {err}");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn post(&self, target: &Target, body: Bytes) -> SdkResult<Response> {
        let stream = timeout(
            self.config.timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        .map_err(|_| SdkError::timeout())?
        .map_err(|e| {
            SdkError::new(
                ErrorCode::ConnectionRefused,
                format!("Connection failed: {e}"),
            )
        })?;

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| SdkError::network(format!("Handshake failed: {e}")))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!("connection closed: {err}");
            }
        });

        let mut builder = hyper::Request::builder()
            .method(Method::POST)
            .uri(target.path.as_str())
            .header(HOST, target.authority())
            .header(CONTENT_TYPE, "application/json");
        for (key, value) in &self.config.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        let request = builder
            .body(Full::new(body))
            .map_err(|e| SdkError::config(format!("Invalid request: {e}")))?;

        let response = timeout(self.config.timeout, sender.send_request(request))
            .await
            .map_err(|_| SdkError::timeout())?
            .map_err(|e| SdkError::network(format!("Request failed: {e}")))?;
        let status = response.status();
        let bytes = timeout(self.config.timeout, response.into_body().collect())
            .await
            .map_err(|_| SdkError::timeout())?
            .map_err(|e| SdkError::network(format!("Read failed: {e}")))?
            .to_bytes();

        // GraphQL errors come back as JSON even on 4xx; only a non-JSON
        // body is a transport failure.
        match serde_json::from_slice::<Response>(&bytes) {
            Ok(response) => Ok(response),
            Err(_) if !status.is_success() => Err(SdkError::new(
                ErrorCode::HttpError,
                format!("HTTP error: {status}"),
            )
            .with_extension("status", status.as_u16())),
            Err(e) => Err(SdkError::new(
                ErrorCode::InvalidResponse,
                format!(
                    "Failed to parse response: {e}. Body: {}",
                    String::from_utf8_lossy(&bytes[..bytes.len().min(200)])
                ),
            )),
        }
    }
}

impl Link for HttpLink {
    fn request(&self, request: Request) -> BoxFuture<'_, SdkResult<Response>> {
        async move { self.send(&request).await }.boxed()
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = oneshot::Sender<SdkResult<Response>>;

/// One request waiting on a [`WsLink`] connection.
struct Operation {
    id: String,
    request: Request,
    reply: Reply,
}

/// Sends requests over GraphQL-over-WebSocket (`graphql-transport-ws`).
///
/// Uses the `url`, `timeout` and `headers` of its [`ClientConfig`]. The
/// headers travel as the `connection_init` payload, which the server reads
/// like request headers.
#[derive(Debug)]
pub struct WsLink {
    config: ClientConfig,
    connection: Mutex<Option<mpsc::UnboundedSender<Operation>>>,
    next_id: AtomicU64,
}

impl WsLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(ClientConfig::new(url))
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs one operation and waits for its single result.
    pub async fn send(&self, request: Request) -> SdkResult<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (reply, result) = oneshot::channel();
        self.connection()
            .await?
            .send(Operation { id, request, reply })
            .map_err(|_| connection_closed())?;

        timeout(self.config.timeout, result)
            .await
            .map_err(|_| SdkError::timeout())?
            .map_err(|_| connection_closed())?
    }

    /// The live connection, opening a new one when there is none.
    async fn connection(&self) -> SdkResult<mpsc::UnboundedSender<Operation>> {
        let mut slot = self.connection.lock().await;
        if let Some(sender) = slot.as_ref().filter(|sender| !sender.is_closed()) {
            return Ok(sender.clone());
        }

        let socket = timeout(self.config.timeout, self.open())
            .await
            .map_err(|_| SdkError::timeout())??;
        let (sender, operations) = mpsc::unbounded_channel();
        tokio::spawn(drive(socket, operations));
        *slot = Some(sender.clone());
        Ok(sender)
    }

    /// Connects and completes the `connection_init` handshake.
    async fn open(&self) -> SdkResult<Socket> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SdkError::new(ErrorCode::InvalidUrl, format!("Invalid URL: {e}")))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(PROTOCOL));

        let (mut socket, _) = connect_async(request).await.map_err(|e| {
            SdkError::new(
                ErrorCode::ConnectionRefused,
                format!("WebSocket connection failed: {e}"),
            )
        })?;

        let params: Map<String, Value> = self
            .config
            .headers
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        send_json(
            &mut socket,
            &ClientMessage::ConnectionInit {
                payload: Some(params),
            },
        )
        .await?;

        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(ServerMessage::ConnectionAck { .. }) => return Ok(socket),
                    Ok(ServerMessage::Ping { payload }) => {
                        send_json(&mut socket, &ClientMessage::Pong { payload }).await?;
                    }
                    Ok(_) | Err(_) => {}
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.into_owned()).unwrap_or_default();
                    return Err(SdkError::network(format!(
                        "WebSocket closed before acknowledgement: {reason}"
                    )));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(SdkError::network(format!("WebSocket read failed: {e}")));
                }
                None => return Err(connection_closed()),
            }
        }
    }
}

fn connection_closed() -> SdkError {
    SdkError::network("WebSocket connection closed")
}

/// Owns the socket: sends queued operations and routes results back by id.
async fn drive(socket: Socket, mut operations: mpsc::UnboundedReceiver<Operation>) {
    let (mut sink, mut stream) = socket.split();
    let mut pending: HashMap<String, (Reply, Option<Response>)> = HashMap::new();

    loop {
        tokio::select! {
            operation = operations.recv() => {
                // The link was dropped.
                let Some(Operation { id, request, reply }) = operation else { break };
                let subscribe = ClientMessage::Subscribe { id: id.clone(), payload: request };
                if let Err(err) = send_json(&mut sink, &subscribe).await {
                    let _ = reply.send(Err(err));
                    break;
                }
                pending.insert(id, (reply, None));
            }
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        debug!("websocket read failed: {err}");
                        break;
                    }
                };
                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::Next { id, payload }) => {
                        if let Some((_, result)) = pending.get_mut(&id) {
                            *result = Some(payload);
                        }
                    }
                    Ok(ServerMessage::Error { id, payload }) => {
                        if let Some((reply, _)) = pending.remove(&id) {
                            let _ = reply.send(Ok(Response::from_errors(payload)));
                        }
                    }
                    Ok(ServerMessage::Complete { id }) => {
                        if let Some((reply, result)) = pending.remove(&id) {
                            let _ = reply.send(result.ok_or_else(|| {
                                SdkError::new(ErrorCode::NoData, "Operation completed without a result")
                            }));
                        }
                    }
                    Ok(ServerMessage::Ping { payload }) => {
                        if send_json(&mut sink, &ClientMessage::Pong { payload }).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => debug!("ignoring malformed message: {err}"),
                }
            }
        }
    }

    for (_, (reply, _)) in pending.drain() {
        let _ = reply.send(Err(connection_closed()));
    }
}

impl Link for WsLink {
    fn request(&self, request: Request) -> BoxFuture<'_, SdkResult<Response>> {
        self.send(request).boxed()
    }
}

/// A GraphQL client bundled with its link.
#[derive(Clone)]
pub struct Client {
    link: Arc<dyn Link>,
}

impl Client {
    pub fn new(link: impl Link + 'static) -> Self {
        Self {
            link: Arc::new(link),
        }
    }

    /// Sends a request and returns the raw response.
    pub async fn request(&self, request: Request) -> SdkResult<Response> {
        self.link.request(request).await
    }

    /// Sends a query without variables.
    pub async fn query(&self, query: impl Into<String>) -> SdkResult<Response> {
        self.request(Request::new(query)).await
    }

    /// Sends a request and deserializes its `data`. Any GraphQL error fails
    /// the call.
    pub async fn request_data<T: DeserializeOwned>(&self, request: Request) -> SdkResult<T> {
        let response = self.request(request).await?;

        if let Some(first) = response.errors.first() {
            return Err(SdkError::new(ErrorCode::ExecutionError, first.message.clone())
                .with_extension("errors", &response.errors));
        }

        match response.data {
            Some(data) => {
                serde_json::from_value(data).map_err(|e| SdkError::deserialize(e.to_string()))
            }
            None => Err(SdkError::new(ErrorCode::NoData, "No data in response")),
        }
    }

    /// Sends a query and deserializes its `data`.
    pub async fn query_data<T: DeserializeOwned>(&self, query: impl Into<String>) -> SdkResult<T> {
        self.request_data(Request::new(query)).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}
