//! Fixed-capacity free list of pack envelopes (§4.D).

use conduit_message::{Message, Pack, PackPoolHandle};
use tokio::sync::mpsc;

pub struct PackPool {
    recycle_tx: mpsc::Sender<()>,
    recycle_rx: mpsc::Receiver<()>,
    capacity: usize,
}

impl PackPool {
    /// Pre-allocate `capacity` free-list tokens.
    pub fn new(capacity: usize) -> Self {
        let (recycle_tx, recycle_rx) = mpsc::channel(capacity.max(1));
        for _ in 0..capacity {
            let _ = recycle_tx.try_send(());
        }
        PackPool {
            recycle_tx,
            recycle_rx,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block until a free-list token is available, then wrap `message` in a
    /// fresh [`Pack`] bound to this pool (the primary backpressure signal
    /// from routing back to inputs).
    pub async fn acquire(&mut self, message: Message) -> Pack {
        self.recycle_rx
            .recv()
            .await
            .expect("pool holds a sender clone, channel never closes while pool is alive");
        Pack::new(message, PackPoolHandle::new(self.recycle_tx.clone()))
    }

    /// Number of free-list tokens currently available (an approximation;
    /// used only for introspection/reporting, not for synchronization).
    pub fn available(&self) -> usize {
        self.recycle_rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_message::Message;

    #[tokio::test]
    async fn acquired_count_never_exceeds_capacity() {
        let mut pool = PackPool::new(2);
        let p1 = pool.acquire(Message::new([0; 16], 0, "t")).await;
        let p2 = pool.acquire(Message::new([0; 16], 0, "t")).await;
        assert_eq!(pool.available(), 0);

        // A third acquire would block forever with no releases; verify the
        // pool is indeed exhausted by checking recycle brings it back.
        // `recycle` uses a non-blocking try_send, so yield once for it to land.
        p1.recycle(None);
        tokio::task::yield_now().await;
        assert_eq!(pool.available(), 1);
        p2.recycle(None);
        tokio::task::yield_now().await;
        assert_eq!(pool.available(), 2);
    }
}
