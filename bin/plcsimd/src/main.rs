//! ---
//! sim_section: "01-core-functionality"
//! sim_subsection: "binary"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Binary entrypoint for the PLC-SIM daemon."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use plcsim_common::config::AppConfig;
use plcsim_common::dimensions::base_dimensions;
use plcsim_common::logging::init_tracing;
use plcsim_core::composer::compose;
use plcsim_core::interceptor::InstrumentedEngine;
use plcsim_core::shutdown::ShutdownCoordinator;
use plcsim_engine::{EngineContext, InMemoryEngine};
use plcsim_metrics::{new_registry, spawn_http_server, SimMetrics};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "PLC-SIM daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the simulation server")]
    Run,
    #[command(about = "Validate configuration and address-space composition, then exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/example.toml"));
    candidates.push(PathBuf::from("configs/example.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    init_tracing("plcsimd", &config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::CheckConfig => check_config(config),
    }
}

fn check_config(config: AppConfig) -> Result<()> {
    let context = EngineContext::new();
    let activated = compose(&config.features, &config.node_set, &context)?;
    for provider in &activated {
        println!(
            "provider[{}] {} (namespace {}, {} nodes)",
            provider.index,
            provider.name,
            provider.provider.namespace_index(),
            provider.provider.node_count()
        );
    }
    println!("configuration OK");
    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let registry = new_registry();
    let metrics = SimMetrics::new(registry.clone(), base_dimensions(&config))?;
    metrics.set_pod_count(1);

    // Composition runs once, before any client traffic; any failure here is
    // fatal and the process must not start serving.
    let context = Arc::new(EngineContext::new());
    let activated = compose(&config.features, &config.node_set, &context)?;
    info!(
        providers = activated.len(),
        nodes = context.node_count(),
        "address space composed"
    );

    let engine = Arc::new(InMemoryEngine::new(context, config.max_sessions));
    let services = Arc::new(InstrumentedEngine::new(engine, metrics));

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    info!(app = %config.app_name, simulation = %config.simulation_id, "daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    let coordinator = ShutdownCoordinator::new(services, &config.shutdown);
    coordinator.run().await;

    if let Some(server) = metrics_server {
        if let Err(err) = server.shutdown().await {
            warn!(error = %err, "metrics exporter shutdown failed");
        }
    }

    Ok(())
}
