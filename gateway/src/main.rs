use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use axum::Router;
use axum_server::{Handle, tls_rustls::RustlsConfig};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use callbridge_gateway::config::TlsConfig;
use callbridge_gateway::{ServerConfig, routes, state::AppState};

/// Grace period for in-flight calls on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// CallBridge Gateway - carrier audio to conversational AI
#[derive(Parser, Debug)]
#[command(name = "callbridge-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// YAML configuration file; environment variables fill the gaps
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env must be loaded before the configuration reads the environment
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration file");
            ServerConfig::from_file(path)?
        }
        None => ServerConfig::from_env()?,
    };

    let address = config.address();
    let socket_addr: SocketAddr = address
        .parse()
        .with_context(|| format!("Invalid server address '{address}'"))?;
    let tls = config.tls.clone();

    let state = AppState::new(config)?;
    if cli.check {
        info!(provider = %state.services.provider.kind(), "Configuration is valid");
        return Ok(());
    }

    let app = routes::create_router(state);
    match tls {
        Some(tls) => serve_tls(app, socket_addr, &tls).await,
        None => serve_plain(app, socket_addr).await,
    }
}

async fn serve_plain(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Gateway listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn serve_tls(app: Router, addr: SocketAddr, tls: &TlsConfig) -> anyhow::Result<()> {
    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .with_context(|| {
            format!(
                "Failed to load TLS certificates from {} and {}",
                tls.cert_path.display(),
                tls.key_path.display()
            )
        })?;
    info!("Gateway listening on https://{} (TLS enabled)", addr);

    let handle = Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| anyhow!("TLS server error: {}", e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
