//! # Morpher
//!
//! A GraphQL server framework: modular schema loading, collection
//! exposure, login-token user resolution and an HTTP server that also
//! speaks GraphQL over WebSocket.
//!
//! ```ignore
//! use morpher::{expose, initialize, load, ExposureConfig, InitOptions, InstalledPackages, Module};
//!
//! load(Module::new()
//!     .type_defs("extend type Query { hello: String }")
//!     .resolver_fn("Query", "hello", |_, _, _, _| Ok("world".into())))?;
//! expose("posts", ExposureConfig::new())?;
//!
//! let installed = InstalledPackages::from_lockfile_path("packages.lock")?;
//! let server = initialize(InitOptions::new(installed))?;
//! server.listen().await?;
//! ```
//!
//! Initialization first checks the framework's dependency requirements
//! ([`FRAMEWORK_REQUIREMENTS`]) and fails with a `VERSION_MISMATCH` error
//! naming every unsatisfied package. The `JSON` and `Date` scalars and the
//! root `Query`/`Mutation` types are registered before any module loads.

pub mod client;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod expose;
mod http;
pub mod loader;
pub mod scalars;
pub mod server;
pub mod types;
pub mod users;
pub mod version;
pub mod ws;

pub use config::{config, Config};
pub use db::db;
pub use expose::expose;
pub use loader::load;
pub use server::initialize;
pub use users::get_user_for_context;

pub use client::{Client, ClientConfig, HttpLink, Link, LocalLink, WsLink};
pub use context::{ContextCreator, ContextRequest};
pub use db::{Collection, Db, FindOptions};
pub use error::{ErrorCode, SdkError, SdkResult};
pub use expose::ExposureConfig;
pub use loader::Module;
pub use server::{InitOptions, MorpherServer};
pub use users::UserContext;
pub use version::{InstalledPackages, VersionError, FRAMEWORK_REQUIREMENTS};

pub use morpher_runtime::{Context, FieldError, Request, ResolverError, Response};
