//! Wraps one plugin instance with a retry policy, introspection counters,
//! and the channels the router and pipeline use to reach it (§4.F).

use crate::config::RetryPolicyConfig;
use crate::plugin::{Input, Output, PluginInstance, RunnerContext, RunnerError};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use conduit_queue::QueueBuffer;

use crate::router::DeliveredPack;

/// Exponential backoff with jitter applied to a plugin's retryable errors
/// (§4.F, §7).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: i64,
    pub jitter_pct: f64,
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(cfg: &RetryPolicyConfig) -> Self {
        RetryPolicy {
            initial_delay: cfg.initial_delay,
            max_delay: cfg.max_delay,
            max_retries: cfg.max_retries,
            jitter_pct: cfg.jitter_pct,
        }
    }
}

impl RetryPolicy {
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries >= 0 && attempt as i64 >= self.max_retries
    }

    /// Delay before the `attempt`-th retry (0-indexed), doubling each time
    /// up to `max_delay`, then jittered by ±`jitter_pct`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = capped * self.jitter_pct;
        let jittered = if jitter > 0.0 {
            let offset = rand::thread_rng().gen_range(-jitter..=jitter);
            (capped + offset).max(0.0)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }
}

/// Counters exposed via the §4.I report.
#[derive(Default)]
pub struct RunnerCounters {
    pub process_count: AtomicU64,
    pub inject_count: AtomicU64,
    pub match_count: AtomicU64,
    match_duration_total_ns: AtomicU64,
}

impl RunnerCounters {
    pub fn record_match(&self, duration: Duration) {
        self.match_count.fetch_add(1, Ordering::Relaxed);
        self.match_duration_total_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn average_match_duration(&self) -> Duration {
        let count = self.match_count.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        let total_ns = self.match_duration_total_ns.load(Ordering::Relaxed);
        Duration::from_nanos(total_ns / count)
    }
}

/// A signal that can be fired once to request process shutdown, without
/// the runner loop needing a handle to the whole pipeline (§4.F "fatal
/// ... signals shutdown").
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: mpsc::UnboundedSender<String>,
}

impl ShutdownTrigger {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ShutdownTrigger { tx }, rx)
    }

    pub fn fire(&self, reason: String) {
        let _ = self.tx.send(reason);
    }
}

/// What the router consults to decide how to deliver a pack to this
/// runner, and what the pipeline's reporter reads for introspection.
pub struct RunnerHandle {
    pub name: Arc<str>,
    pub kind: crate::config::RunnerKind,
    pub matcher: Option<conduit_matcher::Matcher>,
    pub inbound_tx: Option<mpsc::Sender<DeliveredPack>>,
    pub inbound_capacity: usize,
    pub queue: Option<Arc<QueueBuffer>>,
    pub counters: Arc<RunnerCounters>,
    pub can_exit: bool,
    pub stop_tx: watch::Sender<bool>,
    pub join: tokio::task::JoinHandle<()>,
}

impl RunnerHandle {
    pub fn inbound_len(&self) -> usize {
        match &self.inbound_tx {
            Some(tx) => self.inbound_capacity.saturating_sub(tx.capacity()),
            None => 0,
        }
    }
}

/// Runs an `Input` plugin's main loop under the retry policy, calling
/// `shutdown` on a fatal, non-`can_exit` error (§4.F, §7).
pub async fn drive_input(
    name: Arc<str>,
    mut plugin: Box<dyn Input>,
    ctx: RunnerContext,
    retry: RetryPolicy,
    can_exit: bool,
    shutdown: ShutdownTrigger,
    mut stop: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        if *stop.borrow() {
            return;
        }
        let result = plugin.run(ctx.clone()).await;
        match result {
            Ok(()) => return,
            Err(RunnerError::Retryable(msg)) => {
                if retry.exhausted(attempt) {
                    error!(runner = %name, "retries exhausted: {msg}");
                    if can_exit {
                        return;
                    }
                    shutdown.fire(format!("runner '{name}' exhausted retries: {msg}"));
                    return;
                }
                let delay = retry.delay_for_attempt(attempt);
                warn!(runner = %name, attempt, delay_ms = delay.as_millis() as u64, "retryable error: {msg}");
                attempt += 1;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.changed() => { if *stop.borrow() { return; } }
                }
            }
            Err(RunnerError::Fatal(msg)) => {
                error!(runner = %name, "fatal error: {msg}");
                if can_exit {
                    return;
                }
                shutdown.fire(format!("runner '{name}' fatal: {msg}"));
                return;
            }
        }
    }
}

pub enum ConsumerPlugin {
    Filter(Box<dyn crate::plugin::Filter>),
    Output(Box<dyn Output>),
}

/// As [`drive_input`], but for `Filter`/`Output` plugins, which own a
/// borrowed inbound channel for the duration of their loop.
pub async fn drive_consumer(
    name: Arc<str>,
    mut plugin: ConsumerPlugin,
    mut inbound: mpsc::Receiver<DeliveredPack>,
    ctx: RunnerContext,
    retry: RetryPolicy,
    can_exit: bool,
    shutdown: ShutdownTrigger,
    mut stop: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        if *stop.borrow() {
            return;
        }
        let result = match &mut plugin {
            ConsumerPlugin::Filter(f) => f.run(&mut inbound, ctx.clone()).await,
            ConsumerPlugin::Output(o) => o.run(&mut inbound, ctx.clone()).await,
        };
        match result {
            Ok(()) => return,
            Err(RunnerError::Retryable(msg)) => {
                if retry.exhausted(attempt) {
                    error!(runner = %name, "retries exhausted: {msg}");
                    if can_exit {
                        return;
                    }
                    shutdown.fire(format!("runner '{name}' exhausted retries: {msg}"));
                    return;
                }
                let delay = retry.delay_for_attempt(attempt);
                warn!(runner = %name, attempt, delay_ms = delay.as_millis() as u64, "retryable error: {msg}");
                attempt += 1;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.changed() => { if *stop.borrow() { return; } }
                }
            }
            Err(RunnerError::Fatal(msg)) => {
                error!(runner = %name, "fatal error: {msg}");
                if can_exit {
                    return;
                }
                shutdown.fire(format!("runner '{name}' fatal: {msg}"));
                return;
            }
        }
    }
}

pub fn plugin_kind_name(instance: &PluginInstance) -> &'static str {
    match instance {
        PluginInstance::Input(_) => "input",
        PluginInstance::Filter(_) => "filter",
        PluginInstance::Output(_) => "output",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped_at_max_delay() {
        let retry = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_retries: -1,
            jitter_pct: 0.0,
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_configured_percentage() {
        let retry = RetryPolicy {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_retries: -1,
            jitter_pct: 0.25,
        };
        for attempt in 0..5 {
            let base = 1000f64 * 2f64.powi(attempt as i32);
            let delay = retry.delay_for_attempt(attempt).as_secs_f64() * 1000.0;
            assert!(delay >= base * 0.75 - 1.0, "attempt {attempt}: {delay} too low");
            assert!(delay <= base * 1.25 + 1.0, "attempt {attempt}: {delay} too high");
        }
    }

    #[test]
    fn unbounded_retries_never_exhaust() {
        let retry = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            max_retries: -1,
            jitter_pct: 0.0,
        };
        assert!(!retry.exhausted(1_000_000));
    }

    #[test]
    fn bounded_retries_exhaust_at_the_limit() {
        let retry = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            max_retries: 3,
            jitter_pct: 0.0,
        };
        assert!(!retry.exhausted(2));
        assert!(retry.exhausted(3));
    }
}
