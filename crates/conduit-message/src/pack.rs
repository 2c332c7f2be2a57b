use crate::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// An error delivered back to a buffered pack's producer on a retryable
/// delivery failure (§3, §4.D).
#[derive(Debug, Clone)]
pub struct DeliveryError {
    pub reason: String,
}

/// Handle back to the pool a [`Pack`] was checked out from, used by
/// `recycle` to return it to the free list (§4.D).
#[derive(Clone)]
pub struct PackPoolHandle {
    recycle_tx: mpsc::Sender<()>,
}

impl PackPoolHandle {
    pub fn new(recycle_tx: mpsc::Sender<()>) -> Self {
        PackPoolHandle { recycle_tx }
    }

    /// Return one slot to the pool's free list. Best-effort: a full or
    /// closed channel just means the pool has already been torn down.
    pub fn release(&self) {
        let _ = self.recycle_tx.try_send(());
    }
}

/// The transient envelope wrapping a [`Message`] as it moves through
/// routing (§3). A pack is owned by exactly one component at a time;
/// ownership transfers on channel send.
pub struct Pack {
    pub message: Message,
    pub serialized: Option<Vec<u8>>,
    pub signer: Option<String>,
    pub queue_cursor: Option<String>,
    pub from_buffer: bool,
    pub delivery_err_tx: Option<mpsc::Sender<DeliveryError>>,
    pub hop_count: u8,
    pool: PackPoolHandle,
    recycled: Arc<AtomicBool>,
}

impl Pack {
    pub fn new(message: Message, pool: PackPoolHandle) -> Self {
        Pack {
            message,
            serialized: None,
            signer: None,
            queue_cursor: None,
            from_buffer: false,
            delivery_err_tx: None,
            hop_count: 0,
            pool,
            recycled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Clear routing metadata, optionally deliver `err` to the producer,
    /// and return the pack to its pool. Idempotent: a second call logs
    /// and does nothing rather than double-releasing the slot (§4.D).
    pub fn recycle(mut self, err: Option<DeliveryError>) {
        if self.recycled.swap(true, Ordering::AcqRel) {
            warn!("pack recycled more than once; ignoring duplicate recycle");
            return;
        }
        if let (Some(tx), Some(err)) = (self.delivery_err_tx.take(), err) {
            let _ = tx.try_send(err);
        }
        self.pool.release();
    }
}

impl std::fmt::Debug for Pack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pack")
            .field("type", &self.message.r#type())
            .field("from_buffer", &self.from_buffer)
            .field("hop_count", &self.hop_count)
            .finish()
    }
}
