//! Framework configuration.
//!
//! One [`Config`] lives for the whole process behind [`config()`]. Hosts
//! either build one with the setters below or deserialize it from TOML;
//! missing keys keep their defaults.

use crate::error::{ErrorCode, ResultExt, SdkResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{OnceLock, RwLock};

/// Framework configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP path that accepts GraphQL requests.
    pub graphql_endpoint: String,
    /// Host to bind to.
    pub host: String,
    /// Port to listen on; `0` picks an ephemeral port.
    pub port: u16,
    /// Fields of the user document copied into the request context.
    pub user_default_fields: Vec<String>,
    /// Request header carrying the login token.
    pub login_token_header: String,
    /// Serve a landing page on GET of the endpoint.
    pub gui: bool,
    /// Maximum selection depth.
    pub max_depth: usize,
    /// Largest request body the HTTP endpoint reads, in bytes.
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self {
            graphql_endpoint: "/graphql".to_string(),
            host: "127.0.0.1".to_string(),
            port: 4000,
            user_default_fields: ["_id", "username", "emails", "roles"]
                .into_iter()
                .map(String::from)
                .collect(),
            login_token_header: "meteor-login-token".to_string(),
            gui: true,
            max_depth: 10,
            max_body_bytes: 1024 * 1024,
        }
    }

    /// Parses a config from TOML.
    pub fn from_toml_str(raw: &str) -> SdkResult<Self> {
        toml::from_str(raw).map_sdk_err_with(ErrorCode::ConfigError, "invalid configuration")
    }

    /// Reads a config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> SdkResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_sdk_err_with(
            ErrorCode::ConfigError,
            format!("cannot read {}", path.display()),
        )?;
        Self::from_toml_str(&raw)
    }

    /// Sets the GraphQL endpoint path.
    #[must_use]
    pub fn graphql_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.graphql_endpoint = endpoint.into();
        self
    }

    /// Sets the host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the user fields exposed in the context.
    #[must_use]
    pub fn user_default_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_default_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the login token header name.
    #[must_use]
    pub fn login_token_header(mut self, header: impl Into<String>) -> Self {
        self.login_token_header = header.into();
        self
    }

    /// Disables the landing page.
    #[must_use]
    pub fn no_gui(mut self) -> Self {
        self.gui = false;
        self
    }

    /// Sets the maximum selection depth.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the request body limit.
    #[must_use]
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// The `host:port` pair to bind.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// The process-wide configuration.
pub fn config() -> &'static RwLock<Config> {
    static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();
    CONFIG.get_or_init(|| RwLock::new(Config::default()))
}

/// Returns a copy of the current process-wide configuration.
pub fn current() -> Config {
    config()
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone()
}

/// Replaces the process-wide configuration.
pub(crate) fn install(new: Config) {
    *config()
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = new;
}
