//! wikiforged — the WikiForge daemon.
//!
//! Single binary that assembles the control plane:
//! - Instance registry (redb)
//! - Docker container runtime adapter
//! - PostgreSQL database provisioner
//! - nginx route configurator + certbot issuer
//! - Provisioning orchestrator
//! - REST API
//!
//! # Usage
//!
//! ```text
//! wikiforged run --config /etc/wikiforge/wikiforge.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use wikiforge_core::ForgeConfig;
use wikiforge_orchestrator::{Orchestrator, PortAllocator};

#[derive(Parser)]
#[command(name = "wikiforged", about = "WikiForge control-plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Run {
        /// Path to wikiforge.toml. Built-in defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the API listen port.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wikiforged=debug,wikiforge=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, port } => {
            let mut config = match config {
                Some(path) => ForgeConfig::from_file(&path)?,
                None => ForgeConfig::default(),
            };
            if let Some(port) = port {
                config.server.listen_port = port;
            }
            run(config).await
        }
    }
}

async fn run(config: ForgeConfig) -> anyhow::Result<()> {
    info!("WikiForge daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("wikiforge.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let registry = wikiforge_state::InstanceRegistry::open(&db_path)?;
    info!(path = ?db_path, "instance registry opened");

    let runtime = Arc::new(wikiforge_runtime::DockerRuntime::new(
        config.docker.network.clone(),
    ));
    info!(network = %config.docker.network, "container runtime adapter initialized");

    let databases = Arc::new(wikiforge_postgres::PgProvisioner::connect(&config.database.admin_url).await?);
    info!("database provisioner connected");

    let proxy = Arc::new(wikiforge_proxy::NginxProxy::new(&config.proxy));
    let certs = Arc::new(wikiforge_proxy::CertbotIssuer::new(&config.acme));
    info!(acme_enabled = config.acme.enabled, "proxy and certificate adapters initialized");

    let ports = PortAllocator::new(config.ports.start, config.ports.end);
    let listen_port = config.server.listen_port;

    let orchestrator = Orchestrator::new(
        config, registry, ports, runtime, databases, proxy, certs,
    )?;
    info!("orchestrator initialized");

    // ── Start API server ───────────────────────────────────────

    let router = wikiforge_api::build_router(Arc::new(orchestrator));
    let addr = SocketAddr::from(([0, 0, 0, 0], listen_port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    info!("WikiForge daemon stopped");
    Ok(())
}
