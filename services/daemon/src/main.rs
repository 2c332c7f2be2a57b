//! `conduitd`: a pluggable ingestion and routing daemon (§1-§9). Loads a
//! TOML config, wires up the pack pool / router / runners, then drives
//! signal handling until a graceful or fatal shutdown.

use clap::Parser;
use conduitd::config;
use conduitd::pipeline::PipelineConfig;
use conduitd::plugin::PluginRegistry;
use conduitd::plugins;
use conduitd::runner::ShutdownTrigger;
use conduitd::signal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "conduitd", about = "Pluggable ingestion and routing daemon")]
struct Cli {
    /// Path to the daemon's TOML config file.
    #[arg(long, default_value = "/etc/conduit/conduitd.toml")]
    config: PathBuf,

    /// Directory scanned for dynamically added/removed plugin configs
    /// (§6). Disabled if not provided.
    #[arg(long)]
    dynamic_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!(version = env!("CARGO_PKG_VERSION"), "conduitd starting");

    let cfg = match config::load_config_from_path(&cli.config) {
        Ok(cfg) => {
            info!(runners = cfg.runners.len(), base_dir = %cfg.base_dir.display(), "config loaded");
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let mut registry = PluginRegistry::new();
    plugins::register_builtin(&mut registry);

    let (shutdown, fatal_rx) = ShutdownTrigger::new();
    let pipeline = Arc::new(PipelineConfig::new(&cfg, registry, shutdown));

    for rconfig in &cfg.runners {
        if let Err(e) = pipeline.add_runner(rconfig).await {
            eprintln!("FATAL: failed to start runner '{}': {e}", rconfig.name);
            std::process::exit(1);
        }
        info!(runner = %rconfig.name, "runner started");
    }

    let dynamic_task = cli.dynamic_dir.map(|root| {
        let pipeline = pipeline.clone();
        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(dynamic_dir_task(pipeline, root, stop_rx));
        (handle, stop_tx)
    });

    signal::run(pipeline, fatal_rx).await;

    if let Some((handle, stop_tx)) = dynamic_task {
        let _ = stop_tx.send(true);
        let _ = handle.await;
    }

    info!("conduitd exited");
}

async fn dynamic_dir_task(pipeline: Arc<PipelineConfig>, root: PathBuf, stop_rx: tokio::sync::watch::Receiver<bool>) {
    conduitd::dynamic_dir::run(pipeline, root, std::time::Duration::from_secs(10), stop_rx).await;
}
