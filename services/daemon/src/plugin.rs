//! The plugin capability interfaces (§9 design note: "a small fixed set of
//! capability interfaces ... plus a registry name -> factory") and the
//! context a runner hands to whichever capability it wraps.

use crate::config::RunnerConfig;
use crate::router::DeliveredPack;
use crate::runner::RunnerCounters;
use async_trait::async_trait;
use conduit_message::{Message, Pack};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

use crate::pack_pool::PackPool;

/// Classification a plugin's main loop uses when returning an error, so the
/// runner knows whether to apply the retry policy or trigger shutdown (§7).
#[derive(Debug)]
pub enum RunnerError {
    Retryable(String),
    Fatal(String),
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerError::Retryable(s) => write!(f, "retryable: {s}"),
            RunnerError::Fatal(s) => write!(f, "fatal: {s}"),
        }
    }
}

impl std::error::Error for RunnerError {}

/// A cloneable handle onto the pack pool, shared by every runner that needs
/// to acquire fresh packs (inputs, and filters that inject new messages).
#[derive(Clone)]
pub struct PackAcquirer(Arc<AsyncMutex<PackPool>>);

impl PackAcquirer {
    pub fn new(pool: PackPool) -> Self {
        PackAcquirer(Arc::new(AsyncMutex::new(pool)))
    }

    pub async fn acquire(&self, message: Message) -> Pack {
        self.0.lock().await.acquire(message).await
    }

    pub async fn available(&self) -> usize {
        self.0.lock().await.available()
    }

    pub async fn capacity(&self) -> usize {
        self.0.lock().await.capacity()
    }
}

/// What a runner hands its wrapped plugin: a way to acquire and submit
/// fresh packs to the router, and a shutdown signal to observe (§5
/// Cancellation).
#[derive(Clone)]
pub struct RunnerContext {
    pub runner_name: Arc<str>,
    pub pool: PackAcquirer,
    pub router_tx: mpsc::Sender<Pack>,
    pub counters: Arc<RunnerCounters>,
    pub stop: watch::Receiver<bool>,
}

impl RunnerContext {
    pub fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Acquire a fresh pack for `message` and submit it to the router,
    /// counting it as this runner's own production (used directly by
    /// inputs, and by filters re-injecting derived messages through the
    /// back-edge — §4.G). `parent_hop_count` is the hop count of whatever
    /// pack prompted this one, or 0 for a freshly-produced input message.
    pub async fn submit(&self, message: Message, parent_hop_count: u8) {
        let mut pack = self.pool.acquire(message).await;
        pack.hop_count = parent_hop_count.saturating_add(1);
        self.counters.inject_count.fetch_add(1, Ordering::Relaxed);
        if self.router_tx.send(pack).await.is_err() {
            // Router has shut down; nothing to recycle to since the pack
            // was just constructed and never claimed by anyone.
        }
    }
}

/// Produces packs: reads from a socket, tails a file, polls a directory.
/// Input runners own no inbound channel of their own (§4.F).
#[async_trait]
pub trait Input: Send {
    async fn run(&mut self, ctx: RunnerContext) -> Result<(), RunnerError>;
}

/// Consumes packs from its inbound channel and may re-inject new ones
/// through `ctx.submit` (the injection back-edge, §4.G).
#[async_trait]
pub trait Filter: Send {
    async fn run(
        &mut self,
        inbound: &mut mpsc::Receiver<DeliveredPack>,
        ctx: RunnerContext,
    ) -> Result<(), RunnerError>;
}

/// Consumes packs from its inbound channel terminally.
#[async_trait]
pub trait Output: Send {
    async fn run(
        &mut self,
        inbound: &mut mpsc::Receiver<DeliveredPack>,
        ctx: RunnerContext,
    ) -> Result<(), RunnerError>;
}

/// Decodes raw bytes (the splitter's per-record slice) into a [`Message`].
/// Pure and reentrant, unlike the stateful `Input`/`Filter`/`Output` loops.
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Message, String>;
}

/// One concrete plugin instance, tagged by which capability it implements.
pub enum PluginInstance {
    Input(Box<dyn Input>),
    Filter(Box<dyn Filter>),
    Output(Box<dyn Output>),
}

type Factory = fn(&RunnerConfig) -> Result<PluginInstance, String>;

/// Maps a plugin type name (the `plugin` field in a `[[runners]]` entry) to
/// the factory that builds it from that runner's config (§9: "a registry
/// name -> factory").
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<&'static str, Factory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    pub fn register(&mut self, name: &'static str, factory: Factory) {
        self.factories.insert(name, factory);
    }

    pub fn build(&self, config: &RunnerConfig) -> Result<PluginInstance, String> {
        let factory = self
            .factories
            .get(config.plugin.as_str())
            .ok_or_else(|| format!("no plugin registered under name '{}'", config.plugin))?;
        factory(config)
    }
}
