//! The framework's error type.
//!
//! Every public operation returns [`SdkResult`]. Errors from the schema
//! and execution layers are folded into an [`SdkError`] whose [`ErrorCode`]
//! is what clients see in `extensions.code`.

use morpher_runtime::{ResolverError, SchemaError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Machine-readable failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    /// The transport failed before a response arrived.
    NetworkError,
    Timeout,
    ConnectionRefused,
    /// The endpoint answered with a non-success status.
    HttpError,
    InvalidUrl,
    /// The response body was not a GraphQL response.
    InvalidResponse,
    ParseError,
    ValidationError,
    ExecutionError,
    /// A response carried neither data nor errors.
    NoData,
    SchemaError,
    SerializeError,
    DeserializeError,
    AuthError,
    Forbidden,
    /// A document with the same `_id` already exists.
    Conflict,
    /// An installed package does not satisfy the framework's requirements.
    VersionMismatch,
    ConfigError,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ConnectionRefused => "CONNECTION_REFUSED",
            Self::HttpError => "HTTP_ERROR",
            Self::InvalidUrl => "INVALID_URL",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::ParseError => "PARSE_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::NoData => "NO_DATA",
            Self::SchemaError => "SCHEMA_ERROR",
            Self::SerializeError => "SERIALIZE_ERROR",
            Self::DeserializeError => "DESERIALIZE_ERROR",
            Self::AuthError => "AUTH_ERROR",
            Self::Forbidden => "FORBIDDEN",
            Self::Conflict => "CONFLICT",
            Self::VersionMismatch => "VERSION_MISMATCH",
            Self::ConfigError => "CONFIG_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Transport failures the client may try again.
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::Timeout | Self::ConnectionRefused
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error with a code, a message and optional structured details.
#[derive(Error, Debug, Clone, Serialize)]
#[error("[{code}] {message}")]
pub struct SdkError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

pub type SdkResult<T> = Result<T, SdkError>;

impl SdkError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extensions: None,
        }
    }

    /// Attaches a detail under `key`. Values that fail to serialize are
    /// dropped.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.extensions
                .get_or_insert_with(Map::new)
                .insert(key.into(), value);
        }
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout, "Request timed out")
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthError, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    pub fn serialize(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializeError, message)
    }

    pub fn deserialize(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeserializeError, message)
    }

    /// A failure on the serving side, such as an unbindable address.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl From<SchemaError> for SdkError {
    fn from(err: SchemaError) -> Self {
        let code = if matches!(err, SchemaError::Syntax(_)) {
            ErrorCode::ParseError
        } else {
            ErrorCode::SchemaError
        };
        Self::new(code, err.to_string())
    }
}

/// Lets resolvers and firewalls return framework errors with `?`.
impl From<SdkError> for ResolverError {
    fn from(err: SdkError) -> Self {
        match err.code {
            ErrorCode::Forbidden | ErrorCode::AuthError => Self::Forbidden(err.message),
            ErrorCode::InternalError => Self::Internal(err.message),
            _ => Self::Custom(err.message),
        }
    }
}

/// Wraps foreign errors with a framework code, keeping the original text
/// under `extensions.cause`.
pub trait ResultExt<T> {
    fn map_sdk_err_with(self, code: ErrorCode, message: impl Into<String>) -> SdkResult<T>;
}

impl<T, E: fmt::Display> ResultExt<T> for Result<T, E> {
    fn map_sdk_err_with(self, code: ErrorCode, message: impl Into<String>) -> SdkResult<T> {
        self.map_err(|err| SdkError::new(code, message).with_extension("cause", err.to_string()))
    }
}
