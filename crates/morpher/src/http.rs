//! HTTP transport.
//!
//! Routes:
//! - POST `<endpoint>` - GraphQL queries and mutations
//! - GET `<endpoint>` - Landing page (when `gui` is on)
//! - GET /health - Health check
//! - GET `<endpoint>` with `Upgrade: websocket` - GraphQL over WebSocket
//! - OPTIONS `<endpoint>` - CORS preflight

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use morpher_runtime::{FieldError, Response as GraphQLResponse};
use std::collections::HashMap;
use std::convert::Infallible;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::server::MorpherServer;
use crate::ws;

pub(crate) type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub(crate) fn full<T: Into<Bytes>>(chunk: T) -> BoxBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<BoxBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn json_response(status: StatusCode, data: &GraphQLResponse) -> Response<BoxBody> {
    match serde_json::to_vec(data) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => {
            error!("failed to serialize response: {e}");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                r#"{"errors":[{"message":"Failed to serialize response"}]}"#,
            )
        }
    }
}

pub(crate) fn error_response(status: StatusCode, message: String) -> Response<BoxBody> {
    json_response(status, &GraphQLResponse::from_errors(vec![FieldError::new(message)]))
}

pub(crate) fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

pub(crate) async fn handle_graphql_request(
    server: &MorpherServer,
    headers: &HeaderMap,
    body: Bytes,
) -> Response<BoxBody> {
    let request: morpher_runtime::Request = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON: {e}")),
    };

    debug!(
        "executing query: {}",
        request.query.chars().take(100).collect::<String>()
    );

    let response = server.execute(request, header_map(headers)).await;
    // Requests rejected before execution (parse, validation) have no data.
    let status = if response.data.is_none() && response.has_errors() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    json_response(status, &response)
}

pub(crate) fn landing_page(endpoint: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Morpher</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 760px; margin: 0 auto; padding: 2rem; }}
        h1 {{ border-bottom: 2px solid #6366f1; padding-bottom: 0.5rem; }}
        code {{ background: #eef2ff; padding: 2px 6px; border-radius: 4px; }}
        pre {{ background: #1e293b; color: #e2e8f0; padding: 1rem; border-radius: 6px; overflow-x: auto; }}
    </style>
</head>
<body>
    <h1>Morpher GraphQL server</h1>
    <ul>
        <li><code>POST {endpoint}</code> - queries and mutations</li>
        <li><code>ws://…{endpoint}</code> - the same over WebSocket (<code>graphql-transport-ws</code>)</li>
        <li><code>GET /health</code> - health check</li>
    </ul>
    <pre>curl -s http://localhost:4000{endpoint} \
  -H "Content-Type: application/json" \
  -d '{{"query": "{{ framework }}"}}'</pre>
</body>
</html>"#
    )
}

pub(crate) fn health_response() -> &'static str {
    r#"{"status":"healthy"}"#
}

async fn route(server: MorpherServer, req: Request<Incoming>) -> Response<BoxBody> {
    if req.method() == Method::GET
        && req.uri().path() == server.config().graphql_endpoint
        && ws::is_upgrade(&req)
    {
        return ws::upgrade(server, req);
    }

    let (parts, body) = req.into_parts();
    let config = server.config();
    let endpoint = config.graphql_endpoint.as_str();
    let path = parts.uri.path();

    match parts.method {
        Method::GET if path == "/health" => {
            respond(StatusCode::OK, "application/json", health_response())
        }
        Method::POST if path == endpoint => {
            match Limited::new(body, config.max_body_bytes).collect().await {
                Ok(collected) => {
                    handle_graphql_request(&server, &parts.headers, collected.to_bytes()).await
                }
                Err(e) if e.is::<LengthLimitError>() => error_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("Request body exceeds {} bytes", config.max_body_bytes),
                ),
                Err(e) => {
                    error_response(StatusCode::BAD_REQUEST, format!("Failed to read body: {e}"))
                }
            }
        }
        Method::GET if path == endpoint && config.gui => respond(
            StatusCode::OK,
            "text/html; charset=utf-8",
            landing_page(endpoint),
        ),
        Method::OPTIONS if path == endpoint => {
            let mut response = respond(StatusCode::OK, "text/plain", "");
            let headers = response.headers_mut();
            headers.insert(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET, POST, OPTIONS"),
            );
            headers.insert(
                ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Content-Type, Authorization, meteor-login-token"),
            );
            response
        }
        _ => respond(
            StatusCode::NOT_FOUND,
            "application/json",
            r#"{"error":"Not Found"}"#,
        ),
    }
}

/// Serves one accepted connection.
pub(crate) async fn serve_connection(server: MorpherServer, stream: TcpStream) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let server = server.clone();
        async move { Ok::<_, Infallible>(route(server, req).await) }
    });

    if let Err(err) = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
    {
        if !err.is_incomplete_message() {
            error!("connection error: {err:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landing_page_mentions_endpoint() {
        let html = landing_page("/api/graphql");
        assert!(html.contains("POST /api/graphql"));
        assert!(html.contains(r#"{"query": "{ framework }"}"#));
    }

    #[test]
    fn test_header_map() {
        let mut headers = HeaderMap::new();
        headers.insert("meteor-login-token", HeaderValue::from_static("abc"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let map = header_map(&headers);
        assert_eq!(map.get("meteor-login-token").map(String::as_str), Some("abc"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(StatusCode::BAD_REQUEST, "Invalid JSON".to_string());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
