//! devclaimd: the devclaim daemon.
//!
//! Single binary that assembles every devclaim subsystem:
//! - Object store (redb)
//! - Scheduler extension API (filter + bind)
//! - Reconciliation controller (claim and device loops)
//! - Host health monitor
//!
//! # Usage
//!
//! ```text
//! devclaimd standalone --port 8443 --data-dir /var/lib/devclaim
//! devclaimd import --data-dir /var/lib/devclaim --file inventory.json
//! ```

mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use devclaim_controller::ReconcileController;
use devclaim_health::HostHealthMonitor;
use devclaim_state::{Inventory, ObjectStore, StateStore};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

const DEFAULT_FILTER: &str = "info,devclaimd=debug,devclaim=debug";
const DEFAULT_PORT: u16 = 8443;
const DEFAULT_DATA_DIR: &str = "/var/lib/devclaim";
const DB_FILE: &str = "devclaim.redb";

#[derive(Parser)]
#[command(name = "devclaimd", about = "devclaim daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the extension server and background loops in one process.
    Standalone {
        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the object store.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Optional TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load claims, devices, hosts and workloads from a JSON inventory.
    Import {
        #[arg(long, default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,

        /// Inventory file.
        #[arg(long)]
        file: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Standalone {
            port,
            data_dir,
            config,
        } => {
            let file_config = match config {
                Some(path) => DaemonConfig::from_file(&path)?,
                None => DaemonConfig::default(),
            };
            run_standalone(port, data_dir, file_config).await
        }
        Command::Import { data_dir, file } => run_import(&data_dir, &file),
    }
}

fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(DB_FILE);
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "object store opened");
    Ok(store)
}

async fn run_standalone(
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    config: DaemonConfig,
) -> anyhow::Result<()> {
    info!("devclaim daemon starting in standalone mode");

    let port = port.or(config.port()).unwrap_or(DEFAULT_PORT);
    let data_dir = data_dir
        .or(config.data_dir())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    // ── Initialize subsystems ──────────────────────────────────

    let store: Arc<dyn ObjectStore> = Arc::new(open_store(&data_dir)?);

    let controller = ReconcileController::new(store.clone(), config.controller_config());
    info!("reconcile controller initialized");

    let monitor = HostHealthMonitor::new(store.clone(), config.health_config());
    info!("host health monitor initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller_shutdown = shutdown_rx.clone();
    let monitor_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let controller_handle = tokio::spawn(async move {
        controller.run(controller_shutdown).await;
    });

    let monitor_handle = tokio::spawn(async move {
        if let Err(e) = monitor.run(monitor_shutdown).await {
            error!(error = %e, "host health monitor exited");
        }
    });

    // ── Start API server ───────────────────────────────────────

    let router = devclaim_api::build_router(store, config.filter_config());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = controller_handle.await;
    let _ = monitor_handle.await;

    info!("devclaim daemon stopped");
    Ok(())
}

fn run_import(data_dir: &Path, file: &Path) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    let content = std::fs::read_to_string(file)?;
    let inventory: Inventory = serde_json::from_str(&content)?;
    let written = store.import(&inventory)?;
    info!(
        file = ?file,
        objects = written,
        claims = inventory.claims.len(),
        devices = inventory.devices.len(),
        hosts = inventory.hosts.len(),
        workloads = inventory.workloads.len(),
        "inventory imported"
    );
    Ok(())
}
