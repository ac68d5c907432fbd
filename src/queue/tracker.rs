use std::sync::{Arc, Mutex, Weak};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::protocol::{ClientId, MessageId};

use super::{client::QueueClient, envelope::QueueMessage, QueueRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcknowledgeStatus {
    Pending,
    Received,
    Failed,
    Timeout,
}

/// One tracked attempt to hand a message to a consumer.
#[derive(Debug)]
pub struct MessageDelivery {
    pub queue_message: QueueMessage,
    pub client_id: ClientId,
    pub message_id: MessageId,
    pub deadline: Option<Instant>,
    receiver: Weak<QueueClient>,
    acknowledge: Mutex<AcknowledgeStatus>,
    pub(crate) ct: CancellationToken,
}

impl MessageDelivery {
    pub fn new(
        queue_message: QueueMessage,
        receiver: &Arc<QueueClient>,
        client_id: ClientId,
        message_id: MessageId,
        deadline: Option<Instant>,
        ct: CancellationToken,
    ) -> Self {
        Self {
            queue_message,
            client_id,
            message_id,
            deadline,
            receiver: Arc::downgrade(receiver),
            acknowledge: Mutex::new(AcknowledgeStatus::Pending),
            ct,
        }
    }

    pub fn status(&self) -> AcknowledgeStatus {
        *self.acknowledge.lock().unwrap()
    }
    /// Transition out of `Pending`; false when some other path got there
    /// first.
    pub(crate) fn mark(&self, status: AcknowledgeStatus) -> bool {
        let mut slot = self.acknowledge.lock().unwrap();
        if *slot == AcknowledgeStatus::Pending {
            *slot = status;
            true
        } else {
            false
        }
    }
    pub fn receiver(&self) -> Option<Arc<QueueClient>> {
        self.receiver.upgrade()
    }
}

/// In-flight deliveries awaiting ack, with their deadline timers. Entries
/// hold the queue and its consumers weakly so a destroyed queue cannot be
/// kept alive by a stray timer.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    entries: Mutex<Vec<Arc<MessageDelivery>>>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert and, when the delivery carries a deadline, arm its timer.
    pub fn track(&self, delivery: Arc<MessageDelivery>, queue: QueueRef) {
        self.entries.lock().unwrap().push(delivery.clone());
        let Some(deadline) = delivery.deadline else {
            return;
        };
        let ct = delivery.ct.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = ct.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if delivery.mark(AcknowledgeStatus::Timeout) {
                        if let Some(queue) = queue.upgrade() {
                            queue.on_delivery_timeout(delivery).await;
                        }
                    }
                }
            }
        });
    }

    /// Remove and return the delivery a consumer is acknowledging. Misses
    /// are the caller's problem: the ack may have raced the insert, and the
    /// ack pipeline retries the lookup.
    pub fn find_and_remove(
        &self,
        client_id: &ClientId,
        message_id: MessageId,
    ) -> Option<Arc<MessageDelivery>> {
        let mut entries = self.entries.lock().unwrap();
        let at = entries
            .iter()
            .position(|d| d.message_id == message_id && &d.client_id == client_id)?;
        Some(entries.remove(at))
    }

    /// Drop a specific entry, used by the timeout path.
    pub(crate) fn remove(&self, delivery: &Arc<MessageDelivery>) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|d| !Arc::ptr_eq(d, delivery));
        entries.len() != before
    }

    /// Every delivery still owned by `client_id`, for disconnect cleanup.
    pub(crate) fn remove_client(&self, client_id: &ClientId) -> Vec<Arc<MessageDelivery>> {
        let mut entries = self.entries.lock().unwrap();
        let (dropped, kept): (Vec<_>, Vec<_>) = entries
            .drain(..)
            .partition(|d| &d.client_id == client_id);
        *entries = kept;
        dropped
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.status() == AcknowledgeStatus::Pending)
            .count()
    }

    pub fn destroy(&self) {
        let mut entries = self.entries.lock().unwrap();
        for delivery in entries.drain(..) {
            delivery.ct.cancel();
        }
    }
}
