//! # GridPulse — Power-Monitoring Analysis Dispatch Service
//!
//! Persisted analysis tasks routed to capability providers (hosted LLM chat
//! or in-process statistics), a due-task poller, and an HTTP JSON API.
//!
//! Usage:
//!   gridpulse                        # Start the service (default port 8090)
//!   gridpulse --port 8080            # Custom port
//!   gridpulse --poll-interval 10     # Faster due-task scans

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gridpulse_core::GridPulseConfig;
use gridpulse_providers::ChatProvider as _;
use gridpulse_dispatch::{
    CapabilityRegistry, InsightProvider, StatisticsProvider, TaskExecutor, TaskStore,
};

#[derive(Parser)]
#[command(
    name = "gridpulse",
    version,
    about = "⚡ GridPulse — power-monitoring analysis dispatch service"
)]
struct Cli {
    /// Bind host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Seconds between due-task scans (overrides config)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Path to config.toml (default: ~/.gridpulse/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "gridpulse=debug,tower_http=debug"
    } else {
        "gridpulse=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => GridPulseConfig::load_from(std::path::Path::new(path))?,
        None => GridPulseConfig::load()?,
    };
    if let Some(host) = cli.host {
        config.gateway.host = host;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(interval) = cli.poll_interval {
        config.scheduler.poll_interval_secs = interval;
    }

    // Open the task store and recover anything a previous run left behind
    let db_path = config.scheduler.resolved_db_path();
    let store = Arc::new(TaskStore::open(&db_path)?);
    tracing::info!("💾 Task store: {}", db_path.display());
    store.recover_stuck()?;

    // Build the capability registry — statistics always, insight when the
    // chat provider can be constructed
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register(Arc::new(StatisticsProvider))?;
    match gridpulse_providers::create_provider(&config.llm) {
        Ok(chat) => {
            tracing::info!("🧠 Insight capabilities via '{}'", chat.name());
            registry.register(Arc::new(InsightProvider::new(chat)))?;
        }
        Err(e) => {
            tracing::warn!("⚠️ Insight provider not available: {e} — statistics only");
        }
    }

    let executor = Arc::new(TaskExecutor::new(store.clone(), registry.clone()));

    // Spawn the due-task poller
    let poller_executor = executor.clone();
    let poll_interval = config.scheduler.poll_interval_secs;
    tokio::spawn(async move {
        gridpulse_dispatch::poller::spawn_poller(poller_executor, poll_interval).await;
    });

    println!("⚡ GridPulse v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "   🌐 API:        http://{}:{}/api/v1",
        config.gateway.host, config.gateway.port
    );
    println!("   🗄️  Database:   {}", db_path.display());
    println!("   ⏰ Poll every: {poll_interval}s");
    println!();

    let state = gridpulse_gateway::AppState::new(config, store, registry, executor);
    gridpulse_gateway::start(state).await
}
