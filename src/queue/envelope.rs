use std::{
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
};

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::{
    client::{Client, ClientRef},
    protocol::{Message, MessageId},
};

/// What a delivery handler wants done after a lifecycle callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decision {
    pub interrupt: bool,
    pub save: bool,
    pub delete: bool,
    pub put_back: PutBack,
    pub transmission: DecisionTransmission,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PutBack {
    #[default]
    No,
    Priority,
    Regular,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecisionTransmission {
    #[default]
    None,
    Successful,
    Failed,
}

impl Decision {
    pub fn keep() -> Self {
        Self::default()
    }
    pub fn remove() -> Self {
        Self {
            delete: true,
            ..Self::default()
        }
    }
    pub fn put_back(kind: PutBack) -> Self {
        Self {
            put_back: kind,
            ..Self::default()
        }
    }
    pub fn with_transmission(mut self, transmission: DecisionTransmission) -> Self {
        self.transmission = transmission;
        self
    }
    pub fn with_save(mut self) -> Self {
        self.save = true;
        self
    }
    pub fn with_interrupt(mut self) -> Self {
        self.interrupt = true;
        self
    }

    /// Compose two decisions: booleans OR, enums let the non-default side
    /// win (`other` overrides when both are non-default).
    pub fn or(self, other: Decision) -> Decision {
        Decision {
            interrupt: self.interrupt || other.interrupt,
            save: self.save || other.save,
            delete: self.delete || other.delete,
            put_back: if other.put_back != PutBack::No {
                other.put_back
            } else {
                self.put_back
            },
            transmission: if other.transmission != DecisionTransmission::None {
                other.transmission
            } else {
                self.transmission
            },
        }
    }
}

#[derive(Debug)]
pub struct QueueMessageInner {
    message: RwLock<Message>,
    created_at: DateTime<Utc>,
    deadline: RwLock<Option<Instant>>,
    is_in_queue: AtomicBool,
    is_sent: AtomicBool,
    is_removed: AtomicBool,
    is_saved: AtomicBool,
    is_producer_ack_sent: AtomicBool,
    source: Option<ClientRef>,
    decision: RwLock<Decision>,
    delivery_receivers: Mutex<Vec<ClientRef>>,
}

/// Envelope a message lives in while owned by a queue. Cheap to clone;
/// the store, the tracker and in-flight pipelines share one inner.
///
/// Flag invariants: `is_in_queue` and `is_removed` never hold together;
/// `is_sent` and `is_saved` only ever go false to true.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    inner: Arc<QueueMessageInner>,
}

impl Deref for QueueMessage {
    type Target = QueueMessageInner;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl QueueMessage {
    pub fn new(message: Message, source: Option<ClientRef>) -> Self {
        Self {
            inner: Arc::new(QueueMessageInner {
                message: RwLock::new(message),
                created_at: Utc::now(),
                deadline: RwLock::new(None),
                is_in_queue: AtomicBool::new(false),
                is_sent: AtomicBool::new(false),
                is_removed: AtomicBool::new(false),
                is_saved: AtomicBool::new(false),
                is_producer_ack_sent: AtomicBool::new(false),
                source,
                decision: RwLock::new(Decision::default()),
                delivery_receivers: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl QueueMessageInner {
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    /// Snapshot of the carried frame.
    pub fn message(&self) -> Message {
        self.message.read().unwrap().clone()
    }
    pub fn read_message<R>(&self, f: impl FnOnce(&Message) -> R) -> R {
        f(&self.message.read().unwrap())
    }
    pub fn update_message(&self, f: impl FnOnce(&mut Message)) {
        f(&mut self.message.write().unwrap())
    }
    pub fn id(&self) -> Option<MessageId> {
        self.message.read().unwrap().id
    }
    pub fn is_high_priority(&self) -> bool {
        self.message.read().unwrap().high_priority
    }
    pub fn payload_size(&self) -> usize {
        self.message.read().unwrap().payload.len()
    }

    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.read().unwrap()
    }
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        *self.deadline.write().unwrap() = deadline;
    }
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| deadline <= now)
    }

    pub fn is_in_queue(&self) -> bool {
        self.is_in_queue.load(Ordering::Acquire)
    }
    pub(crate) fn mark_in_queue(&self) {
        if !self.is_removed() {
            self.is_in_queue.store(true, Ordering::Release);
        }
    }
    pub(crate) fn leave_queue(&self) {
        self.is_in_queue.store(false, Ordering::Release);
    }
    pub fn is_sent(&self) -> bool {
        self.is_sent.load(Ordering::Acquire)
    }
    pub(crate) fn mark_sent(&self) {
        self.is_sent.store(true, Ordering::Release);
    }
    pub fn is_removed(&self) -> bool {
        self.is_removed.load(Ordering::Acquire)
    }
    pub(crate) fn mark_removed(&self) {
        self.is_in_queue.store(false, Ordering::Release);
        self.is_removed.store(true, Ordering::Release);
    }
    pub fn is_saved(&self) -> bool {
        self.is_saved.load(Ordering::Acquire)
    }
    pub(crate) fn mark_saved(&self) {
        self.is_saved.store(true, Ordering::Release);
    }
    pub fn is_producer_ack_sent(&self) -> bool {
        self.is_producer_ack_sent.load(Ordering::Acquire)
    }
    /// Test-and-set; true when this caller won the right to send it.
    pub(crate) fn take_producer_ack(&self) -> bool {
        !self.is_producer_ack_sent.swap(true, Ordering::AcqRel)
    }

    pub fn source(&self) -> Option<Client> {
        self.source.as_ref().and_then(ClientRef::upgrade)
    }

    /// The most recent handler decision applied to this message.
    pub fn decision(&self) -> Decision {
        *self.decision.read().unwrap()
    }
    pub(crate) fn set_decision(&self, next: Decision) {
        *self.decision.write().unwrap() = next;
    }

    pub(crate) fn add_delivery_receiver(&self, receiver: ClientRef) {
        self.delivery_receivers.lock().unwrap().push(receiver);
    }
    pub fn delivery_receivers(&self) -> Vec<Client> {
        self.delivery_receivers
            .lock()
            .unwrap()
            .iter()
            .filter_map(ClientRef::upgrade)
            .collect()
    }
}
