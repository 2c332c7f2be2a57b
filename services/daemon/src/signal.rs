//! Unix signal wiring (§6): SIGINT for graceful shutdown, SIGUSR1 to emit
//! a report, SIGUSR2 for wedge-detection/abort, SIGHUP to reopen rotating
//! outputs. Pattern grounded in `services/server/src/main.rs`'s
//! `shutdown_signal()`.

use crate::pipeline::PipelineConfig;
use crate::report;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Time between the two processed-count samples the wedge detector takes
/// before declaring the pipeline stuck (§4.I).
const WEDGE_SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Runs until SIGINT/SIGTERM is received (or the pipeline's own fatal
/// shutdown trigger fires), driving SIGUSR1/SIGUSR2/SIGHUP as they arrive
/// in the meantime. Returns once a graceful shutdown has been run.
pub async fn run(pipeline: Arc<PipelineConfig>, mut fatal_shutdown: tokio::sync::mpsc::UnboundedReceiver<String>) {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigusr1 = signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");
    let mut sigusr2 = signal(SignalKind::user_defined2()).expect("failed to install SIGUSR2 handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            reason = fatal_shutdown.recv() => {
                if let Some(reason) = reason {
                    info!(%reason, "fatal runner error triggered shutdown");
                }
                break;
            }
            _ = sigusr1.recv() => {
                let rep = report::generate_report(&pipeline).await;
                info!(?rep, "report (SIGUSR1)");
            }
            _ = sigusr2.recv() => {
                if report::detect_wedge(&pipeline, WEDGE_SAMPLE_INTERVAL).await {
                    report::abort(&pipeline, pipeline.shutdown_grace).await;
                    return;
                }
                info!("SIGUSR2 received but pipeline is not wedged");
            }
            _ = sighup.recv() => {
                info!("SIGHUP received; reopening rotating outputs is delegated to individual output plugins");
            }
        }
    }

    pipeline.shutdown().await;
}
