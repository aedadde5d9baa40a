//! In-process fan-out of row inserts on the `messages` table.
//!
//! Every collaborator publishes each committed message insert to a single
//! broadcast channel. Subscribers filter by `pod_id`, the same equality filter
//! the hosted service applies server-side.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::models::{Message, PodId};

/// Raw insert event: the new row, without any joined relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInserted {
    pub new: Message,
}

/// What a subscription yields: an insert, or a count of inserts the hub
/// dropped because this subscriber fell behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Inserted(MessageInserted),
    Lagged(u64),
}

#[derive(Clone)]
pub struct RealtimeHub {
    tx: broadcast::Sender<MessageInserted>,
    active: Arc<AtomicUsize>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Notify subscribers of a committed insert.
    pub fn publish(&self, message: Message) {
        let pod_id = message.pod_id.clone();
        // No receivers is not an error: nobody is watching this table.
        let delivered = self
            .tx
            .send(MessageInserted { new: message })
            .unwrap_or(0);
        tracing::trace!(pod_id = %pod_id, delivered, "published message insert");
    }

    pub fn subscribe(&self, pod_id: PodId) -> Subscription {
        let count = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(pod_id = %pod_id, active = count, "subscription opened");
        Subscription {
            pod_id,
            rx: self.tx.subscribe(),
            active: Some(self.active.clone()),
        }
    }

    /// Number of subscription handles not yet released.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Handle on a filtered insert stream. Released on `close()` or drop.
pub struct Subscription {
    pod_id: PodId,
    rx: broadcast::Receiver<MessageInserted>,
    active: Option<Arc<AtomicUsize>>,
}

impl Subscription {
    pub fn pod_id(&self) -> &PodId {
        &self.pod_id
    }

    /// Next insert matching this subscription's pod, or `None` once the hub
    /// is gone. A lag is reported once, before the oldest retained insert.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.new.pod_id == self.pod_id => {
                    return Some(Delivery::Inserted(event));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        pod_id = %self.pod_id,
                        skipped,
                        "subscription lagged, notifications dropped"
                    );
                    return Some(Delivery::Lagged(skipped));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(active) = self.active.take() {
            let remaining = active.fetch_sub(1, Ordering::SeqCst) - 1;
            tracing::debug!(pod_id = %self.pod_id, active = remaining, "subscription released");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
