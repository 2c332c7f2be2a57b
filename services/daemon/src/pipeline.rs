//! Process-wide coordinator: globals, the runner registry, and the
//! shutdown sequencer (§4.H).

use crate::config::{DaemonConfig, RunnerConfig, RunnerKind};
use crate::pack_pool::PackPool;
use crate::plugin::{PackAcquirer, PluginInstance, PluginRegistry, RunnerContext};
use crate::router::{Delivery, DeliveredPack, Router, RouterEntry, RouterShared};
use crate::runner::{
    drive_consumer, drive_input, ConsumerPlugin, RetryPolicy, RunnerCounters, RunnerHandle, ShutdownTrigger,
};
use conduit_queue::QueueBuffer;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

/// How often a buffered runner's bridge task re-polls its queue reader
/// when it finds nothing new (the same polling shape the log streamer
/// uses for its own `check_interval`, since the queue has no
/// new-data-arrived wakeup — only the overflow-block `Notify`).
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Process-wide globals and the live runner registry (§4.H).
pub struct PipelineConfig {
    pub base_dir: PathBuf,
    pub share_dir: PathBuf,
    pub hostname: String,
    pub pid: u32,
    pub max_procs: usize,
    pub shutdown_grace: Duration,
    pool: PackAcquirer,
    router_shared: Arc<RouterShared>,
    router_tx: mpsc::Sender<conduit_message::Pack>,
    router_stop_tx: watch::Sender<bool>,
    router_join: Mutex<Option<tokio::task::JoinHandle<()>>>,
    registry: Arc<PluginRegistry>,
    shutdown: ShutdownTrigger,
    runners: Mutex<HashMap<String, RunnerHandle>>,
}

impl PipelineConfig {
    /// Build the pipeline's shared state and spawn the router's run loop,
    /// but do not yet start any `[[runners]]`; call `add_input_runner` /
    /// `add_consumer_runner` for each configured runner afterward.
    pub fn new(config: &DaemonConfig, registry: PluginRegistry, shutdown: ShutdownTrigger) -> Self {
        let pool = PackAcquirer::new(PackPool::new(config.pack_pool_capacity));
        let (router, router_shared, router_tx) = Router::new(config.pack_pool_capacity, crate::router::DEFAULT_HOP_COUNT_CAP);
        let (router_stop_tx, router_stop_rx) = watch::channel(false);
        let router_join = tokio::spawn(router.run(router_stop_rx));

        PipelineConfig {
            base_dir: config.base_dir.clone(),
            share_dir: config.share_dir.clone(),
            hostname: hostname_or_unknown(),
            pid: std::process::id(),
            max_procs: config.max_procs,
            shutdown_grace: config.shutdown_grace,
            pool,
            router_shared,
            router_tx,
            router_stop_tx,
            router_join: Mutex::new(Some(router_join)),
            registry: Arc::new(registry),
            shutdown,
            runners: Mutex::new(HashMap::new()),
        }
    }

    pub fn router_shared(&self) -> Arc<RouterShared> {
        self.router_shared.clone()
    }

    pub fn pool(&self) -> PackAcquirer {
        self.pool.clone()
    }

    /// Start one runner from its config: build the plugin instance, wire
    /// its channels, register it with the router if it's a filter/output,
    /// and spawn its drive loop (§4.F, §4.H `add_input_runner`).
    pub async fn add_runner(&self, rconfig: &RunnerConfig) -> Result<(), String> {
        let instance = self.registry.build(rconfig)?;
        let matcher = match &rconfig.matcher {
            Some(src) => Some(conduit_matcher::Matcher::compile(src).map_err(|e| e.to_string())?),
            None => None,
        };
        let counters = Arc::new(RunnerCounters::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let retry = RetryPolicy::from(&rconfig.retry);
        let name: Arc<str> = Arc::from(rconfig.name.as_str());

        let queue = match &rconfig.buffering {
            Some(b) => Some(Arc::new(
                QueueBuffer::open(
                    self.base_dir.join(&rconfig.name),
                    b.max_file_size,
                    b.max_buffer_size,
                    b.overflow_policy,
                )
                .map_err(|e| e.to_string())?,
            )),
            None => None,
        };

        let ctx = RunnerContext {
            runner_name: name.clone(),
            pool: self.pool.clone(),
            router_tx: self.router_tx.clone(),
            counters: counters.clone(),
            stop: stop_rx.clone(),
        };

        let (inbound_tx, join) = match (rconfig.kind, instance) {
            (RunnerKind::Input, PluginInstance::Input(plugin)) => {
                let join = tokio::spawn(drive_input(
                    name.clone(),
                    plugin,
                    ctx,
                    retry,
                    rconfig.can_exit,
                    self.shutdown.clone(),
                    stop_rx,
                ));
                (None, join)
            }
            (RunnerKind::Filter, PluginInstance::Filter(plugin)) => {
                let (inbound_tx, inbound_rx) =
                    self.wire_consumer(queue.as_ref(), &name, matcher.clone(), &counters, rconfig.inbound_capacity)?;
                let join = tokio::spawn(drive_consumer(
                    name.clone(),
                    ConsumerPlugin::Filter(plugin),
                    inbound_rx,
                    ctx,
                    retry,
                    rconfig.can_exit,
                    self.shutdown.clone(),
                    stop_rx,
                ));
                (inbound_tx, join)
            }
            (RunnerKind::Output, PluginInstance::Output(plugin)) => {
                let (inbound_tx, inbound_rx) =
                    self.wire_consumer(queue.as_ref(), &name, matcher.clone(), &counters, rconfig.inbound_capacity)?;
                let join = tokio::spawn(drive_consumer(
                    name.clone(),
                    ConsumerPlugin::Output(plugin),
                    inbound_rx,
                    ctx,
                    retry,
                    rconfig.can_exit,
                    self.shutdown.clone(),
                    stop_rx,
                ));
                (inbound_tx, join)
            }
            _ => return Err(format!("runner '{}' plugin kind does not match its configured kind", rconfig.name)),
        };

        let handle = RunnerHandle {
            name: name.clone(),
            kind: rconfig.kind,
            matcher,
            inbound_tx,
            inbound_capacity: rconfig.inbound_capacity,
            queue,
            counters,
            can_exit: rconfig.can_exit,
            stop_tx,
            join,
        };
        self.runners.lock().await.insert(rconfig.name.clone(), handle);
        Ok(())
    }

    /// Register a consumer runner with the router and return the channel
    /// its `drive_consumer` loop reads from. Unbuffered runners read
    /// directly off what the router sends; buffered runners instead read
    /// off a bridge task that tails their own queue buffer, so a record
    /// is only acked (cursor advanced) once the plugin drops it.
    fn wire_consumer(
        &self,
        queue: Option<&Arc<QueueBuffer>>,
        name: &Arc<str>,
        matcher: Option<conduit_matcher::Matcher>,
        counters: &Arc<RunnerCounters>,
        inbound_capacity: usize,
    ) -> Result<(Option<mpsc::Sender<DeliveredPack>>, mpsc::Receiver<DeliveredPack>), String> {
        let (tx, rx) = mpsc::channel(inbound_capacity);
        match queue {
            Some(q) => {
                self.router_shared.register(RouterEntry {
                    name: name.clone(),
                    matcher,
                    delivery: Delivery::Buffered(q.clone()),
                    counters: counters.clone(),
                });
                let reader = q.reader(1).map_err(|e| e.to_string())?;
                tokio::spawn(drive_buffer_bridge(reader, tx.clone()));
                Ok((Some(tx), rx))
            }
            None => {
                self.router_shared.register(RouterEntry {
                    name: name.clone(),
                    matcher,
                    delivery: Delivery::Unbuffered(tx.clone()),
                    counters: counters.clone(),
                });
                Ok((Some(tx), rx))
            }
        }
    }

    /// Stop and deregister one runner by name (§4.H `remove_input_runner`).
    pub async fn remove_runner(&self, name: &str) {
        let handle = self.runners.lock().await.remove(name);
        if let Some(handle) = handle {
            self.router_shared.deregister(name);
            let _ = handle.stop_tx.send(true);
            let _ = handle.join.await;
        }
    }

    pub async fn runner_names(&self) -> Vec<String> {
        self.runners.lock().await.keys().cloned().collect()
    }

    /// Per-runner introspection for a report (§4.I).
    pub async fn runner_reports(&self) -> Vec<crate::report::RunnerReport> {
        self.runners
            .lock()
            .await
            .values()
            .map(|handle| crate::report::RunnerReport {
                name: handle.name.to_string(),
                kind: match handle.kind {
                    RunnerKind::Input => "input",
                    RunnerKind::Filter => "filter",
                    RunnerKind::Output => "output",
                },
                inbound_capacity: handle.inbound_capacity,
                inbound_len: handle.inbound_len(),
                average_match_duration_us: handle.counters.average_match_duration().as_micros() as u64,
                process_count: handle.counters.process_count.load(std::sync::atomic::Ordering::Relaxed),
                inject_count: handle.counters.inject_count.load(std::sync::atomic::Ordering::Relaxed),
            })
            .collect()
    }

    /// The shutdown sequencer (§4.H): close inputs, drain the router,
    /// signal filters, signal outputs, join everything within `grace`.
    pub async fn shutdown(&self) {
        let mut runners = self.runners.lock().await;

        let stop_kind = |runners: &HashMap<String, RunnerHandle>, kind: RunnerKind| {
            for handle in runners.values() {
                if handle.kind == kind {
                    let _ = handle.stop_tx.send(true);
                }
            }
        };

        stop_kind(&runners, RunnerKind::Input);
        let _ = self.router_stop_tx.send(true);
        stop_kind(&runners, RunnerKind::Filter);
        stop_kind(&runners, RunnerKind::Output);

        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        let names: Vec<String> = runners.keys().cloned().collect();
        for name in names {
            if let Some(handle) = runners.remove(&name) {
                self.router_shared.deregister(&name);
                if tokio::time::timeout_at(deadline, handle.join).await.is_err() {
                    warn!(runner = %name, "runner did not exit within shutdown grace period");
                }
            }
        }
        drop(runners);

        if let Some(join) = self.router_join.lock().await.take() {
            let _ = tokio::time::timeout(self.shutdown_grace, join).await;
        }
        info!("pipeline shutdown complete");
    }
}

/// Tails one runner's queue buffer and forwards re-read records to its
/// consumer loop, acking the cursor only once the consumer drops each
/// [`DeliveredPack`] (§4.E cursor invariant).
async fn drive_buffer_bridge(mut reader: conduit_queue::QueueReader, tx: mpsc::Sender<DeliveredPack>) {
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<String>();
    loop {
        while let Ok(cursor) = ack_rx.try_recv() {
            if let Err(e) = reader.update_cursor(&cursor) {
                warn!("failed to update queue cursor: {e}");
            }
        }

        match reader.next_record() {
            Ok(Some(bytes)) => {
                let cursor = reader.queue_cursor();
                match conduit_message::Message::decode(&bytes) {
                    Ok(message) => {
                        let delivered = DeliveredPack::from_buffer(message, 0, None, cursor, ack_tx.clone());
                        if tx.send(delivered).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("discarding undecodable buffered record: {e}"),
                }
            }
            Ok(None) => tokio::time::sleep(QUEUE_POLL_INTERVAL).await,
            Err(e) => {
                warn!("queue reader error: {e}");
                tokio::time::sleep(QUEUE_POLL_INTERVAL).await;
            }
        }
    }
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_owned())
}
