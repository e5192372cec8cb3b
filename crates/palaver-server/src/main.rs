use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use palaver_realtime::MembershipDirectory;

mod auth;
mod config;
mod directory;
mod server;
mod state;
mod telemetry;

use auth::{Authenticator, RestAuthenticator, StaticTokenAuthenticator};
use config::ServerConfig;
use directory::RestDirectory;
use state::AppState;

/// Palaver realtime server.
#[derive(Debug, Parser)]
#[command(name = "palaver-server", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen address from the config file.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init()?;

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.listen.bind = bind;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Palaver server starting");

    let authenticator: Arc<dyn Authenticator> = match &config.collaborators.identity_url {
        Some(url) => Arc::new(RestAuthenticator::new(url.clone())),
        None => {
            info!("No identity collaborator configured; using static tokens");
            Arc::new(StaticTokenAuthenticator::new(
                config.collaborators.static_tokens.clone(),
            ))
        }
    };

    let directory: Arc<dyn MembershipDirectory> = match &config.collaborators.directory_url {
        Some(url) => Arc::new(RestDirectory::new(url.clone())),
        None => Arc::new(directory::EmptyDirectory),
    };

    let state = AppState::new(&config, authenticator, directory);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(config.listen.bind).await?;
    server::start(state, listener, shutdown).await
}
