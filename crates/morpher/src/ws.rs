//! GraphQL over WebSocket, `graphql-transport-ws` subprotocol.
//!
//! A GET on the GraphQL endpoint carrying `Upgrade: websocket` switches the
//! connection to this protocol. The client opens with `connection_init`;
//! the string entries of its payload are added to the upgrade request's
//! headers, which is how a WebSocket client passes its login token. Each
//! `subscribe` runs one operation and answers with `next` then `complete`,
//! or with `error` when the document is rejected before execution.

use crate::error::{SdkError, SdkResult};
use crate::http::{error_response, full, header_map, BoxBody};
use crate::server::MorpherServer;
use futures_util::{Sink, SinkExt, StreamExt};
use hyper::body::Incoming;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_PROTOCOL, UPGRADE,
};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use morpher_runtime::{FieldError, Request as GraphQLRequest, Response as GraphQLResponse};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// The subprotocol name negotiated in `Sec-WebSocket-Protocol`.
pub const PROTOCOL: &str = "graphql-transport-ws";

/// How long a new connection may wait before sending `connection_init`.
const INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Close codes defined by the subprotocol.
pub mod close_code {
    pub const INVALID_MESSAGE: u16 = 4400;
    pub const UNAUTHORIZED: u16 = 4401;
    pub const INIT_TIMEOUT: u16 = 4408;
    pub const DUPLICATE_SUBSCRIBER: u16 = 4409;
    pub const TOO_MANY_INITS: u16 = 4429;
}

/// Messages a client sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Map<String, Value>>,
    },
    Subscribe {
        id: String,
        payload: GraphQLRequest,
    },
    Complete {
        id: String,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Next {
        id: String,
        payload: GraphQLResponse,
    },
    Error {
        id: String,
        payload: Vec<FieldError>,
    },
    Complete {
        id: String,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

/// Serializes `message` into one text frame.
pub(crate) async fn send_json<S, T>(sink: &mut S, message: &T) -> SdkResult<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
    T: Serialize,
{
    let text = serde_json::to_string(message).map_err(|e| SdkError::serialize(e.to_string()))?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| SdkError::network(format!("WebSocket send failed: {e}")))
}

fn has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|value| value.trim().eq_ignore_ascii_case(token))
}

/// True for a WebSocket upgrade request.
pub(crate) fn is_upgrade<B>(req: &Request<B>) -> bool {
    has_token(req.headers(), &CONNECTION, "upgrade")
        && has_token(req.headers(), &UPGRADE, "websocket")
}

/// Answers the upgrade handshake and runs the session once hyper hands
/// over the connection.
pub(crate) fn upgrade(server: MorpherServer, mut req: Request<Incoming>) -> Response<BoxBody> {
    let Some(key) = req.headers().get(SEC_WEBSOCKET_KEY) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing Sec-WebSocket-Key".to_string(),
        );
    };
    let Ok(accept) = HeaderValue::from_str(&derive_accept_key(key.as_bytes())) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid Sec-WebSocket-Key".to_string(),
        );
    };
    let requested = req.headers().contains_key(SEC_WEBSOCKET_PROTOCOL);
    if requested && !has_token(req.headers(), &SEC_WEBSOCKET_PROTOCOL, PROTOCOL) {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("Unsupported WebSocket subprotocol; expected {PROTOCOL}"),
        );
    }

    let headers = header_map(req.headers());
    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let socket =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                run_session(server, socket, headers).await;
            }
            Err(err) => warn!("websocket upgrade failed: {err}"),
        }
    });

    let mut response = Response::new(full(""));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    if requested {
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(PROTOCOL));
    }
    response
}

/// Drives one connection until either side closes it.
async fn run_session<S>(
    server: MorpherServer,
    socket: WebSocketStream<S>,
    mut headers: HashMap<String, String>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let (results, mut outgoing) = mpsc::unbounded_channel::<ServerMessage>();
    let mut running: HashMap<String, AbortHandle> = HashMap::new();
    let mut acknowledged = false;
    let init_deadline = tokio::time::sleep(INIT_TIMEOUT);
    tokio::pin!(init_deadline);

    let close: Option<(u16, String)> = loop {
        tokio::select! {
            () = &mut init_deadline, if !acknowledged => {
                break Some((close_code::INIT_TIMEOUT, "Connection initialisation timeout".into()));
            }
            Some(message) = outgoing.recv() => {
                // Nothing goes out for an operation the client completed.
                let live = match &message {
                    ServerMessage::Next { id, .. } => running.contains_key(id),
                    ServerMessage::Error { id, .. } | ServerMessage::Complete { id } => {
                        running.remove(id).is_some()
                    }
                    _ => true,
                };
                if live && send_json(&mut sink, &message).await.is_err() {
                    break None;
                }
            }
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        debug!("websocket read failed: {err}");
                        break None;
                    }
                };
                let Ok(message) = serde_json::from_str::<ClientMessage>(&text) else {
                    break Some((close_code::INVALID_MESSAGE, "Invalid message received".into()));
                };

                let reply = match message {
                    ClientMessage::ConnectionInit { payload } => {
                        if acknowledged {
                            break Some((
                                close_code::TOO_MANY_INITS,
                                "Too many initialisation requests".into(),
                            ));
                        }
                        for (key, value) in payload.unwrap_or_default() {
                            if let Value::String(value) = value {
                                headers.insert(key.to_ascii_lowercase(), value);
                            }
                        }
                        acknowledged = true;
                        Some(ServerMessage::ConnectionAck { payload: None })
                    }
                    ClientMessage::Subscribe { id, payload } => {
                        if !acknowledged {
                            break Some((close_code::UNAUTHORIZED, "Unauthorized".into()));
                        }
                        if running.contains_key(&id) {
                            break Some((
                                close_code::DUPLICATE_SUBSCRIBER,
                                format!("Subscriber for {id} already exists"),
                            ));
                        }
                        let task = tokio::spawn(execute(
                            server.clone(),
                            headers.clone(),
                            id.clone(),
                            payload,
                            results.clone(),
                        ));
                        running.insert(id, task.abort_handle());
                        None
                    }
                    ClientMessage::Complete { id } => {
                        if let Some(task) = running.remove(&id) {
                            task.abort();
                        }
                        None
                    }
                    ClientMessage::Ping { payload } => Some(ServerMessage::Pong { payload }),
                    ClientMessage::Pong { .. } => None,
                };
                if let Some(reply) = reply {
                    if send_json(&mut sink, &reply).await.is_err() {
                        break None;
                    }
                }
            }
        }
    };

    for task in running.values() {
        task.abort();
    }
    if let Some((code, reason)) = close {
        debug!(code, %reason, "closing websocket");
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        if let Err(err) = sink.send(Message::Close(Some(frame))).await {
            debug!("failed to send close frame: {err}");
        }
    }
}

/// Runs one operation and queues its result messages.
async fn execute(
    server: MorpherServer,
    headers: HashMap<String, String>,
    id: String,
    request: GraphQLRequest,
    results: mpsc::UnboundedSender<ServerMessage>,
) {
    let response = server.execute(request, headers).await;
    // A closed receiver means the session already ended.
    if response.data.is_none() && response.has_errors() {
        let _ = results.send(ServerMessage::Error {
            id,
            payload: response.errors,
        });
    } else {
        let _ = results.send(ServerMessage::Next {
            id: id.clone(),
            payload: response,
        });
        let _ = results.send(ServerMessage::Complete { id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_shapes() {
        let subscribe: ClientMessage = serde_json::from_value(json!({
            "id": "1",
            "type": "subscribe",
            "payload": {"query": "{ framework }", "variables": null, "extensions": {}}
        }))
        .unwrap();
        let ClientMessage::Subscribe { id, payload } = subscribe else {
            panic!("expected subscribe");
        };
        assert_eq!(id, "1");
        assert_eq!(payload.query, "{ framework }");

        let init: ClientMessage =
            serde_json::from_value(json!({"type": "connection_init"})).unwrap();
        assert!(matches!(init, ClientMessage::ConnectionInit { payload: None }));

        assert!(serde_json::from_value::<ClientMessage>(json!({"type": "start"})).is_err());
    }

    #[test]
    fn test_server_message_shapes() {
        let ack = serde_json::to_value(ServerMessage::ConnectionAck { payload: None }).unwrap();
        assert_eq!(ack, json!({"type": "connection_ack"}));

        let next = ServerMessage::Next {
            id: "7".into(),
            payload: GraphQLResponse {
                data: Some(json!({"framework": "morpher"})),
                errors: Vec::new(),
            },
        };
        assert_eq!(
            serde_json::to_value(next).unwrap(),
            json!({"type": "next", "id": "7", "payload": {"data": {"framework": "morpher"}}})
        );

        let error = ServerMessage::Error {
            id: "7".into(),
            payload: vec![FieldError::new("boom")],
        };
        assert_eq!(
            serde_json::to_value(error).unwrap(),
            json!({"type": "error", "id": "7", "payload": [{"message": "boom"}]})
        );
    }

    #[test]
    fn test_upgrade_detection() {
        let req = Request::get("/graphql")
            .header(CONNECTION, "keep-alive, Upgrade")
            .header(UPGRADE, "WebSocket")
            .body(())
            .unwrap();
        assert!(is_upgrade(&req));

        let plain = Request::get("/graphql").body(()).unwrap();
        assert!(!is_upgrade(&plain));
    }
}
