//! The router: evaluates every registered runner's matcher against each
//! pack and fans delivery out to however many runners claimed it (§4.G).

use crate::runner::RunnerCounters;
use conduit_message::{frame, Message, Pack};
use conduit_queue::QueueBuffer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::warn;

/// Packs hop through at most this many injections before the router drops
/// them (§4.G).
pub const DEFAULT_HOP_COUNT_CAP: u8 = 10;

/// Shared release-on-last-claim bookkeeping for one incoming pack that
/// matched N runners. Chosen over a per-runner recycle channel so the
/// router doesn't need to track which runners are still outstanding —
/// only a count (§4.G open question, resolved in DESIGN.md).
struct Claims {
    remaining: AtomicUsize,
    original: Mutex<Option<Pack>>,
}

impl Claims {
    fn release_one(self: &Arc<Self>) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(pack) = self.original.lock().unwrap().take() {
                pack.recycle(None);
            }
        }
    }
}

/// Carried by a [`DeliveredPack`] built from a re-read buffered record:
/// dropping the pack reports its queue cursor back to the bridge task
/// that owns the runner's [`conduit_queue::QueueReader`], so the cursor
/// only advances once the consumer has actually finished with the record
/// (§4.E: "the persisted cursor never advances past a byte the consumer
/// has not yet acknowledged").
struct BufferAck {
    cursor: String,
    tx: mpsc::UnboundedSender<String>,
}

/// What a consuming runner receives, whether delivered live by the router
/// or re-read from its own disk queue. Carries its own message clone (a
/// router-evaluated pack may be cloned into several of these) plus enough
/// routing metadata for filters to keep propagating it.
pub struct DeliveredPack {
    pub message: Message,
    pub hop_count: u8,
    pub signer: Option<String>,
    claim: Arc<Claims>,
    buffer_ack: Option<BufferAck>,
}

impl DeliveredPack {
    /// Build a `DeliveredPack` for a record re-read from a runner's own
    /// queue buffer. Its `claim` is a single-owner, already-original-less
    /// [`Claims`] (the underlying `Pack` this record came from was
    /// already recycled by the router at append time), so dropping it is
    /// purely for the cursor ack, not pool recycling.
    pub(crate) fn from_buffer(
        message: Message,
        hop_count: u8,
        signer: Option<String>,
        cursor: String,
        ack_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        DeliveredPack {
            message,
            hop_count,
            signer,
            claim: Arc::new(Claims {
                remaining: AtomicUsize::new(1),
                original: Mutex::new(None),
            }),
            buffer_ack: Some(BufferAck { cursor, tx: ack_tx }),
        }
    }
}

impl Drop for DeliveredPack {
    fn drop(&mut self) {
        self.claim.release_one();
        if let Some(ack) = self.buffer_ack.take() {
            let _ = ack.tx.send(ack.cursor);
        }
    }
}

/// How a matched runner wants its packs: live, in-process delivery, or
/// durably appended to its on-disk queue (§4.G).
#[derive(Clone)]
pub enum Delivery {
    Unbuffered(mpsc::Sender<DeliveredPack>),
    Buffered(Arc<QueueBuffer>),
}

pub struct RouterEntry {
    pub name: Arc<str>,
    pub matcher: Option<conduit_matcher::Matcher>,
    pub delivery: Delivery,
    pub counters: Arc<RunnerCounters>,
}

/// The registry half of the router: a cloneable handle the pipeline and
/// the dynamic plugin directory scanner use to add/remove runners while
/// the router's run loop (which needs exclusive access to its inbound
/// receiver) drives concurrently on its own task.
pub struct RouterShared {
    entries: RwLock<Vec<RouterEntry>>,
    hop_count_cap: u8,
    processed_count: AtomicUsize,
}

impl RouterShared {
    pub fn register(&self, entry: RouterEntry) {
        self.entries.write().unwrap().push(entry);
    }

    pub fn deregister(&self, name: &str) {
        self.entries.write().unwrap().retain(|e| &*e.name != name);
    }

    pub fn registered_names(&self) -> Vec<Arc<str>> {
        self.entries.read().unwrap().iter().map(|e| e.name.clone()).collect()
    }

    pub fn processed_count(&self) -> usize {
        self.processed_count.load(Ordering::Relaxed)
    }
}

/// One router per daemon (§4.G). Owns the inbound channel exclusively;
/// [`RouterShared`] (obtainable via [`Router::shared`]) is what the rest
/// of the daemon uses to register/deregister runners.
pub struct Router {
    rx: mpsc::Receiver<Pack>,
    shared: Arc<RouterShared>,
}

impl Router {
    pub fn new(inbound_capacity: usize, hop_count_cap: u8) -> (Self, Arc<RouterShared>, mpsc::Sender<Pack>) {
        let (tx, rx) = mpsc::channel(inbound_capacity);
        let shared = Arc::new(RouterShared {
            entries: RwLock::new(Vec::new()),
            hop_count_cap,
            processed_count: AtomicUsize::new(0),
        });
        (
            Router {
                rx,
                shared: shared.clone(),
            },
            shared,
            tx,
        )
    }

    /// Drive the router until `stop` fires. Returns once the inbound
    /// channel is drained after a stop request (§4.H shutdown sequencer:
    /// "drain the router").
    pub async fn run(mut self, mut stop: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                maybe_pack = self.rx.recv() => {
                    match maybe_pack {
                        Some(pack) => self.route(pack).await,
                        None => return,
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        // Drain whatever is already queued before exiting.
                        while let Ok(pack) = self.rx.try_recv() {
                            self.route(pack).await;
                        }
                        return;
                    }
                }
            }
        }
    }

    async fn route(&self, pack: Pack) {
        if pack.hop_count > self.shared.hop_count_cap {
            warn!(hop_count = pack.hop_count, "pack exceeded hop count cap, dropping");
            pack.recycle(None);
            return;
        }

        let message = pack.message.clone();
        let hop_count = pack.hop_count;
        let signer = pack.signer.clone();

        // Evaluate matchers and copy out what delivery needs while holding
        // the lock, then release it before any `.await` — a std RwLock
        // guard held across an await point would make this future !Send.
        let matched: Vec<(Arc<str>, Delivery, Arc<RunnerCounters>)> = {
            let entries = self.shared.entries.read().unwrap();
            let mut matched = Vec::new();
            for entry in entries.iter() {
                let start = Instant::now();
                let is_match = match &entry.matcher {
                    None => true,
                    Some(m) => matches!(m.evaluate(&message), conduit_matcher::MatchOutcome::Match),
                };
                entry.counters.record_match(start.elapsed());
                if is_match {
                    matched.push((entry.name.clone(), entry.delivery.clone(), entry.counters.clone()));
                }
            }
            matched
        };

        if matched.is_empty() {
            pack.recycle(None);
            return;
        }

        self.shared.processed_count.fetch_add(1, Ordering::Relaxed);
        let claims = Arc::new(Claims {
            remaining: AtomicUsize::new(matched.len()),
            original: Mutex::new(Some(pack)),
        });

        for (name, delivery, counters) in matched {
            counters.process_count.fetch_add(1, Ordering::Relaxed);
            match delivery {
                Delivery::Unbuffered(tx) => {
                    let delivered = DeliveredPack {
                        message: message.clone(),
                        hop_count,
                        signer: signer.clone(),
                        claim: claims.clone(),
                        buffer_ack: None,
                    };
                    if tx.send(delivered).await.is_err() {
                        // DeliveredPack's Drop still runs on send failure
                        // (tokio returns it in the error), so no manual
                        // release is needed here.
                    }
                }
                Delivery::Buffered(queue) => {
                    let bytes = message.encode();
                    let framed = frame::encode_frame(&bytes, None);
                    if let Err(e) = queue.append(&framed).await {
                        warn!(runner = %name, "failed to append to queue buffer: {e}");
                    }
                    claims.release_one();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_message::PackPoolHandle;
    use tokio::sync::mpsc as tmpsc;

    fn pool_handle() -> (PackPoolHandle, tmpsc::Receiver<()>) {
        let (tx, rx) = tmpsc::channel(8);
        (PackPoolHandle::new(tx), rx)
    }

    #[tokio::test]
    async fn unmatched_pack_is_recycled_immediately() {
        let (router, _shared, tx) = Router::new(8, DEFAULT_HOP_COUNT_CAP);
        let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(router.run(stop_rx));

        let (pool, mut recycle_rx) = pool_handle();
        let pack = Pack::new(Message::new([1; 16], 0, "actual.type"), pool);
        tx.send(pack).await.unwrap();
        drop(tx);
        let _ = handle.await;
        assert!(recycle_rx.try_recv().is_ok(), "pack should have been recycled back to its pool");
    }

    #[tokio::test]
    async fn matching_runner_receives_delivered_pack_and_releases_on_drop() {
        let (router, shared, tx) = Router::new(8, DEFAULT_HOP_COUNT_CAP);
        let matcher = conduit_matcher::Matcher::compile("Type == 'nginx.access'").unwrap();
        let (delivered_tx, mut delivered_rx) = tmpsc::channel(8);
        shared.register(RouterEntry {
            name: Arc::from("out"),
            matcher: Some(matcher),
            delivery: Delivery::Unbuffered(delivered_tx),
            counters: Arc::new(RunnerCounters::default()),
        });

        let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(router.run(stop_rx));

        let (pool, _recycle_rx) = pool_handle();
        let pack = Pack::new(Message::new([2; 16], 0, "nginx.access"), pool);
        tx.send(pack).await.unwrap();
        drop(tx);

        let delivered = delivered_rx.recv().await.unwrap();
        assert_eq!(delivered.message.r#type(), "nginx.access");
        drop(delivered);
        let _ = handle.await;
        assert_eq!(shared.processed_count(), 1);
    }

    #[tokio::test]
    async fn hop_count_beyond_cap_drops_pack_without_delivery() {
        let (router, shared, tx) = Router::new(8, 2);
        let matcher = conduit_matcher::Matcher::compile("TRUE").unwrap();
        let (delivered_tx, mut delivered_rx) = tmpsc::channel(8);
        shared.register(RouterEntry {
            name: Arc::from("always"),
            matcher: Some(matcher),
            delivery: Delivery::Unbuffered(delivered_tx),
            counters: Arc::new(RunnerCounters::default()),
        });

        let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(router.run(stop_rx));

        let (pool, _recycle_rx) = pool_handle();
        let mut msg_pack = Pack::new(Message::new([3; 16], 0, "t"), pool);
        msg_pack.hop_count = 5;
        tx.send(msg_pack).await.unwrap();
        drop(tx);
        let _ = handle.await;
        assert!(delivered_rx.try_recv().is_err());
    }
}
