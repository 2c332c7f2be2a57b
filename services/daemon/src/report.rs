//! Introspection reports (SIGUSR1) and wedge-detection / abort (SIGUSR2)
//! (§4.I).

use crate::pipeline::PipelineConfig;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, warn};

/// One runner's line in a report (§4.I: "inbound channel capacity and
/// current length, match channel capacity and length, average match
/// duration, processed message count, injected message count").
#[derive(Debug, Clone, Serialize)]
pub struct RunnerReport {
    pub name: String,
    pub kind: &'static str,
    pub inbound_capacity: usize,
    pub inbound_len: usize,
    pub average_match_duration_us: u64,
    pub process_count: u64,
    pub inject_count: u64,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub hostname: String,
    pub pid: u32,
    pub pool_available: usize,
    pub pool_capacity: usize,
    pub runners: Vec<RunnerReport>,
}

/// Gather a [`Report`] across every live runner. Sandboxed-runner
/// memory/instruction usage (§4.I) has no counterpart in this
/// implementation — there is no embedded scripting sandbox (see the
/// Non-goals carried in SPEC_FULL.md) — so that field is omitted rather
/// than stubbed with a meaningless zero.
pub async fn generate_report(pipeline: &PipelineConfig) -> Report {
    Report {
        hostname: pipeline.hostname.clone(),
        pid: pipeline.pid,
        pool_available: pipeline.pool().available().await,
        pool_capacity: pipeline.pool().capacity().await,
        runners: pipeline.runner_reports().await,
    }
}

/// Sample the router's processed-pack count twice, `interval` apart, and
/// declare the pipeline wedged if it hasn't moved *and* the pack pool is
/// completely checked out (§4.I abort path).
pub async fn detect_wedge(pipeline: &PipelineConfig, interval: Duration) -> bool {
    let before = pipeline.router_shared().processed_count();
    tokio::time::sleep(interval).await;
    let after = pipeline.router_shared().processed_count();
    let pool_exhausted = pipeline.pool().available().await == 0;
    before == after && pool_exhausted
}

/// The abort path (§4.I): emit a report for postmortem, then run the
/// normal shutdown sequence (which signals every runner's stop channel,
/// unblocking cooperatively-wedged plugins) within a grace window.
pub async fn abort(pipeline: &PipelineConfig, grace: Duration) {
    let report = generate_report(pipeline).await;
    error!(?report, "pipeline declared wedged, aborting");

    if tokio::time::timeout(grace, pipeline.shutdown()).await.is_err() {
        warn!("shutdown did not complete within the abort grace window; giving up");
    }
}
