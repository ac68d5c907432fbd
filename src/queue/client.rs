use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::client::{Client, ClientRef};

use super::{envelope::QueueMessage, Queue, QueueRef};

/// The join record of one client on one queue; there is exactly one per
/// (queue, client) pair. Both sides are weak back-references: the queue's
/// subscriber list and the client's subscription list hold the `Arc`s.
#[derive(Debug)]
pub struct QueueClient {
    pub(crate) queue: QueueRef,
    pub(crate) client: ClientRef,
    pub joined_at: DateTime<Utc>,
    currently_processing: Mutex<Option<QueueMessage>>,
    process_deadline: Mutex<Option<Instant>>,
}

impl QueueClient {
    pub fn new(queue: &Queue, client: &Client) -> Self {
        Self {
            queue: queue.reference(),
            client: client.reference(),
            joined_at: Utc::now(),
            currently_processing: Mutex::new(None),
            process_deadline: Mutex::new(None),
        }
    }

    pub fn client(&self) -> Option<Client> {
        self.client.upgrade()
    }
    pub fn queue(&self) -> Option<Queue> {
        self.queue.upgrade()
    }

    pub fn currently_processing(&self) -> Option<QueueMessage> {
        self.currently_processing.lock().unwrap().clone()
    }
    pub fn process_deadline(&self) -> Option<Instant> {
        *self.process_deadline.lock().unwrap()
    }

    pub(crate) fn begin_processing(&self, message: &QueueMessage, deadline: Instant) {
        *self.currently_processing.lock().unwrap() = Some(message.clone());
        *self.process_deadline.lock().unwrap() = Some(deadline);
    }
    pub(crate) fn clear_processing(&self) {
        *self.currently_processing.lock().unwrap() = None;
        *self.process_deadline.lock().unwrap() = None;
    }

    /// Round-robin eligibility: connected, and either not tracking acks or
    /// with a free (or expired) processing slot.
    pub(crate) fn is_available(&self, ack_off: bool, now: Instant) -> bool {
        let Some(client) = self.client() else {
            return false;
        };
        if !client.is_connected() {
            return false;
        }
        if ack_off {
            return true;
        }
        if self.currently_processing.lock().unwrap().is_none() {
            return true;
        }
        self.process_deadline
            .lock()
            .unwrap()
            .is_some_and(|deadline| deadline < now)
    }
}
