//! Morpher demo server.
//!
//! A small task board on top of the framework.
//!
//! # Running
//! ```bash
//! cargo run -p morpher-demo-server -- --port 4000
//! curl -s http://localhost:4000/graphql \
//!   -H "Content-Type: application/json" \
//!   -H "meteor-login-token: alice-demo-token" \
//!   -d '{"query": "{ me myTasks { title done } }"}'
//! ```

mod app;

use clap::Parser;
use morpher::{db, initialize, Config, InitOptions, InstalledPackages, SdkResult};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "morpher-demo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host to bind (overrides the config file)
    #[arg(long, env = "MORPHER_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "MORPHER_PORT")]
    port: Option<u16>,

    /// TOML configuration file
    #[arg(short, long, env = "MORPHER_CONFIG")]
    config: Option<PathBuf>,

    /// Lockfile listing the installed packages
    #[arg(long, default_value = "demos/server/packages.lock")]
    lockfile: PathBuf,

    /// Do not serve the landing page
    #[arg(long)]
    no_gui: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "morpher=info,morpher_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> SdkResult<()> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::new(),
    };
    if let Some(host) = cli.host {
        config = config.host(host);
    }
    if let Some(port) = cli.port {
        config = config.port(port);
    }
    if cli.no_gui {
        config = config.no_gui();
    }

    let installed = InstalledPackages::from_lockfile_path(&cli.lockfile)?;

    app::register()?;
    app::seed(db()).await?;

    let server = initialize(
        InitOptions::new(installed)
            .config(config)
            .context(app::request_context),
    )?;
    info!("sample login token: {}", app::DEMO_TOKEN);

    server.listen().await
}
