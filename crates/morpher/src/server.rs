//! Framework initialization and the server it produces.
//!
//! [`initialize`] checks the framework's dependency ranges, installs the
//! configuration, builds the schema from everything loaded so far and
//! returns a [`MorpherServer`]. The server executes requests in-process
//! and serves them over HTTP.

use crate::config::{self, Config};
use crate::context::{build_context, context_creator, ContextCreator, ContextRequest};
use crate::db::{db, Db};
use crate::error::{SdkError, SdkResult};
use crate::http;
use crate::loader;
use crate::version::{check_framework, InstalledPackages};
use morpher_runtime::{Executor, ExecutorConfig, FieldError, Request, Response};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// What [`initialize`] needs from the host.
#[derive(Clone, Default)]
pub struct InitOptions {
    /// Installed packages checked against the framework's requirements.
    pub installed: InstalledPackages,
    /// Replaces the process-wide configuration when set.
    pub config: Option<Config>,
    /// Adds host values to every request context.
    pub context: Option<ContextCreator>,
}

impl InitOptions {
    pub fn new(installed: InstalledPackages) -> Self {
        Self {
            installed,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the custom context creator.
    #[must_use]
    pub fn context<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ContextRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SdkResult<Map<String, Value>>> + Send + 'static,
    {
        self.context = Some(context_creator(f));
        self
    }
}

impl fmt::Debug for InitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitOptions")
            .field("installed", &self.installed)
            .field("config", &self.config)
            .field("context", &self.context.is_some())
            .finish()
    }
}

/// Initializes the framework.
///
/// Fails without side effects when a required package is missing or out of
/// range; the caller decides whether that ends the process.
pub fn initialize(options: InitOptions) -> SdkResult<MorpherServer> {
    check_framework(&options.installed)?;

    if let Some(config) = options.config {
        config::install(config);
    }
    let config = config::current();

    let exec = loader::schema()?;
    let executor = Executor::new(exec.schema, exec.resolvers, exec.scalars)
        .with_config(ExecutorConfig::default().max_depth(config.max_depth));

    info!(
        endpoint = %config.graphql_endpoint,
        resolvers = executor.resolvers().len(),
        "initialized"
    );

    Ok(MorpherServer {
        inner: Arc::new(Inner {
            executor,
            config,
            db: db().clone(),
            context: options.context,
        }),
    })
}

struct Inner {
    executor: Executor,
    config: Config,
    db: Db,
    context: Option<ContextCreator>,
}

/// An initialized server. Cloning is cheap.
#[derive(Clone)]
pub struct MorpherServer {
    inner: Arc<Inner>,
}

impl MorpherServer {
    /// The configuration the server was initialized with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    /// Executes a request with the context built from `headers`.
    pub async fn execute(&self, request: Request, headers: HashMap<String, String>) -> Response {
        let ctx = match build_context(
            &self.inner.db,
            &self.inner.config,
            headers,
            self.inner.context.as_ref(),
        )
        .await
        {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!("context creation failed: {err}");
                return Response::from_errors(vec![context_error(&err)]);
            }
        };

        debug!(
            operation = request.operation_name.as_deref().unwrap_or("<anonymous>"),
            "executing"
        );
        self.inner.executor.execute(&request, &ctx).await
    }

    /// Binds the configured address.
    /// Host names are resolved; IPv6 hosts may be written with or without
    /// brackets.
    pub async fn bind(&self) -> SdkResult<TcpListener> {
        let config = &self.inner.config;
        let host = config.host.trim_start_matches('[').trim_end_matches(']');
        TcpListener::bind((host, config.port))
            .await
            .map_err(|e| SdkError::server(format!("Failed to bind {}: {e}", config.address())))
    }

    /// Serves on the configured address until ctrl-c.
    pub async fn listen(&self) -> SdkResult<()> {
        let listener = self.bind().await?;
        self.serve(listener, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {err}");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serves connections from `listener` until `shutdown` completes.
    /// Each connection runs on its own task.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> SdkResult<()> {
        let local = listener
            .local_addr()
            .map_err(|e| SdkError::server(format!("Failed to read local address: {e}")))?;
        info!("listening on http://{local}{}", self.inner.config.graphql_endpoint);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(err) => {
                            warn!("failed to accept: {err}");
                            continue;
                        }
                    };
                    debug!(%peer, "accepted connection");
                    tokio::spawn(http::serve_connection(self.clone(), stream));
                }
            }
        }
    }
}

impl fmt::Debug for MorpherServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MorpherServer")
            .field("config", &self.inner.config)
            .field("executor", &self.inner.executor)
            .finish_non_exhaustive()
    }
}

fn context_error(err: &SdkError) -> FieldError {
    let mut error = FieldError::new(err.message.clone()).with_code(err.code.as_str());
    if let Some(extra) = &err.extensions {
        error
            .extensions
            .get_or_insert_with(Map::new)
            .extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::version::FRAMEWORK_REQUIREMENTS;

    #[test]
    fn test_initialize_rejects_missing_packages() {
        let err = initialize(InitOptions::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::VersionMismatch);
        for (name, _) in FRAMEWORK_REQUIREMENTS {
            assert!(err.message.contains(name), "{}", err.message);
        }
    }

    #[test]
    fn test_context_error() {
        let err = SdkError::auth("bad token").with_extension("header", "meteor-login-token");
        let field = context_error(&err);
        assert_eq!(field.message, "bad token");
        assert_eq!(field.code(), Some("AUTH_ERROR"));
        assert_eq!(
            field.extensions.unwrap()["header"],
            Value::from("meteor-login-token")
        );
    }
}
