pub mod client;
pub mod envelope;
pub mod handler;
pub mod options;
pub mod state;
pub mod store;
pub mod tracker;

use std::{
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock, Weak,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{oneshot, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use typeshare::typeshare;

use crate::{
    broker::{event::EventType, Broker, BrokerRef},
    client::Client,
    protocol::{headers, EntityName, HeaderMap, Message},
};

pub use client::QueueClient;
pub use envelope::{Decision, DecisionTransmission, PutBack, QueueMessage};
pub use handler::{
    DefaultDeliveryHandler, DeliveryHandler, DeliveryHandlerBuildContext, DeliveryHandlerRegistry,
    DeliveryHandlerService,
};
pub use options::{AckDecision, AutoDestroy, MessageLimitPolicy, QueueOptions, QueueType};
pub use state::{PullResult, QueueState, StateTransition};
pub use store::MessageStore;
pub use tracker::{AcknowledgeStatus, DeliveryTracker, MessageDelivery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[typeshare]
pub enum QueueStatus {
    NotInitialized,
    Running,
    Paused,
    OnlyConsume,
    Syncing,
    Destroyed,
}

/// Outcome of accepting one message, also the taxonomy surfaced to
/// producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    Success,
    StatusNotSupported,
    LimitExceeded,
    NoConsumers,
    Empty,
    Error,
}

/// Single-slot completion future for `acknowledge = Wait`: the next send
/// awaits the previous delivery's ack before going out.
#[derive(Debug, Default)]
struct AckSlot {
    pending: std::sync::Mutex<Option<oneshot::Receiver<()>>>,
    release: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

impl AckSlot {
    async fn wait_previous(&self, cap: Duration) {
        let previous = self.pending.lock().unwrap().take();
        if let Some(receiver) = previous {
            let _ = tokio::time::timeout(cap, receiver).await;
        }
    }
    fn install(&self) {
        let (tx, rx) = oneshot::channel();
        *self.release.lock().unwrap() = Some(tx);
        *self.pending.lock().unwrap() = Some(rx);
    }
    fn release(&self) {
        if let Some(tx) = self.release.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[typeshare]
pub struct QueueInfo {
    pub name: String,
    pub topic: Option<String>,
    pub queue_type: QueueType,
    pub status: QueueStatus,
    pub message_count: usize,
    pub priority_message_count: usize,
    pub pending_deliveries: usize,
    pub consumer_count: usize,
}

pub struct QueueInner {
    name: EntityName,
    broker: BrokerRef,
    options: RwLock<QueueOptions>,
    status: watch::Sender<QueueStatus>,
    store: MessageStore,
    tracker: DeliveryTracker,
    clients: RwLock<Vec<Arc<QueueClient>>>,
    state: RwLock<Arc<dyn QueueState>>,
    handler: RwLock<DeliveryHandlerService>,
    trigger_busy: AtomicBool,
    initialized: AtomicBool,
    ack_slot: AckSlot,
    transition_lock: tokio::sync::Mutex<()>,
    ct: CancellationToken,
}

impl std::fmt::Debug for QueueInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Deref for Queue {
    type Target = QueueInner;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueRef {
    inner: Weak<QueueInner>,
}

impl QueueRef {
    pub fn upgrade(&self) -> Option<Queue> {
        self.inner.upgrade().map(|inner| Queue { inner })
    }
}

fn build_state(queue_type: QueueType) -> Arc<dyn QueueState> {
    match queue_type {
        QueueType::Push => Arc::new(state::BroadcastState),
        QueueType::RoundRobin => Arc::new(state::RoundRobinState::default()),
        QueueType::Pull => Arc::new(state::PullState),
    }
}

impl Queue {
    pub(crate) fn new(broker: BrokerRef, name: EntityName, options: QueueOptions) -> Self {
        let state = build_state(options.queue_type);
        Self {
            inner: Arc::new(QueueInner {
                name,
                broker,
                state: RwLock::new(state),
                options: RwLock::new(options),
                status: watch::Sender::new(QueueStatus::NotInitialized),
                store: MessageStore::new(),
                tracker: DeliveryTracker::new(),
                clients: RwLock::new(Vec::new()),
                handler: RwLock::new(DeliveryHandlerService::new(DefaultDeliveryHandler)),
                trigger_busy: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                ack_slot: AckSlot::default(),
                transition_lock: tokio::sync::Mutex::new(()),
                ct: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &EntityName {
        &self.name
    }
    pub fn status(&self) -> QueueStatus {
        *self.status.borrow()
    }
    pub fn options(&self) -> QueueOptions {
        self.options.read().unwrap().clone()
    }
    pub fn store(&self) -> &MessageStore {
        &self.store
    }
    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }
    pub fn handler(&self) -> DeliveryHandlerService {
        self.handler.read().unwrap().clone()
    }
    pub(crate) fn state(&self) -> Arc<dyn QueueState> {
        self.state.read().unwrap().clone()
    }
    pub fn reference(&self) -> QueueRef {
        QueueRef {
            inner: Arc::downgrade(&self.inner),
        }
    }
    pub(crate) fn broker(&self) -> Option<Broker> {
        self.broker.upgrade()
    }
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.ct.child_token()
    }
    pub fn client_snapshot(&self) -> Vec<Arc<QueueClient>> {
        self.clients.read().unwrap().clone()
    }
    pub fn consumer_count(&self) -> usize {
        self.clients.read().unwrap().len()
    }
    pub fn find_client(&self, client: &Client) -> Option<Arc<QueueClient>> {
        self.clients
            .read()
            .unwrap()
            .iter()
            .find(|qc| {
                qc.client()
                    .is_some_and(|c| c.id() == client.id())
            })
            .cloned()
    }

    pub fn info(&self) -> QueueInfo {
        let options = self.options();
        QueueInfo {
            name: self.name.to_string(),
            topic: options.topic,
            queue_type: options.queue_type,
            status: self.status(),
            message_count: self.store.count_all(),
            priority_message_count: self.store.count_priority(),
            pending_deliveries: self.tracker.pending_count(),
            consumer_count: self.consumer_count(),
        }
    }

    pub(crate) fn emit(&self, event_type: EventType, headers: Vec<(String, String)>) {
        if let Some(broker) = self.broker() {
            broker
                .events()
                .trigger(event_type, self.name.to_string(), headers);
        }
    }

    /// Explicit initialisation; also run lazily by the first push. Reads
    /// configuration headers, resolves the delivery handler factory and
    /// starts the time keeper.
    pub async fn initialize(&self, init: Option<&Message>) -> crate::Result<()> {
        let _guard = self.transition_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let init_headers = init.map(|m| m.headers.clone()).unwrap_or_default();
        let handler_name = {
            let mut options = self.options.write().unwrap();
            options.apply_headers(&init_headers);
            options.delivery_handler.clone()
        };
        *self.state.write().unwrap() = build_state(self.options.read().unwrap().queue_type);

        let broker = self
            .broker()
            .ok_or_else(|| crate::Error::new("queue init", crate::error::ErrorKind::Offline))?;
        let registry = broker.config().delivery_handlers.clone();
        let factory = registry.resolve(&handler_name).or_else(|| {
            if handler_name != "Default" {
                tracing::warn!(
                    queue = %self.name,
                    handler = %handler_name,
                    "unknown delivery handler, falling back to default"
                );
            }
            registry.resolve("Default")
        });
        if let Some(factory) = factory {
            let context = DeliveryHandlerBuildContext {
                queue: self.clone(),
                headers: init_headers,
            };
            *self.handler.write().unwrap() = factory(context);
        }

        self.initialized.store(true, Ordering::Release);
        self.status.send_replace(QueueStatus::Running);
        self.start_time_keeper();
        tracing::debug!(queue = %self.name, "queue initialized");
        self.emit(
            EventType::QueueStatusChanged,
            vec![(headers::STATUS.to_string(), "Running".to_string())],
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Drive the status machine. Illegal transitions and strategy vetoes
    /// leave the queue untouched and return false.
    pub async fn set_status(&self, next: QueueStatus) -> bool {
        use QueueStatus::*;
        let _guard = self.transition_lock.lock().await;
        let current = self.status();
        if current == next {
            return true;
        }
        let legal = matches!(
            (current, next),
            (NotInitialized, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, OnlyConsume)
                | (OnlyConsume, Running)
                | (Running, Syncing)
                | (Syncing, Running)
                | (_, Destroyed)
        );
        if !legal {
            return false;
        }
        let state = self.state();
        if state.on_leave(self, next) == StateTransition::DenyAndStay {
            return false;
        }
        self.status.send_replace(next);
        self.emit(
            EventType::QueueStatusChanged,
            vec![(headers::STATUS.to_string(), format!("{next:?}"))],
        );
        if state.on_enter(self, current) == StateTransition::AllowAndTrigger {
            self.trigger();
        }
        true
    }

    /// Fold update-frame headers into the options, swapping the strategy
    /// when the queue type changed. Deadlines of already-enqueued messages
    /// are left as they were stamped.
    pub fn update_options(&self, update: &HeaderMap) {
        let (old_type, new_type) = {
            let mut options = self.options.write().unwrap();
            let old_type = options.queue_type;
            options.apply_headers(update);
            (old_type, options.queue_type)
        };
        if old_type != new_type {
            self.swap_state(new_type);
        }
        self.emit(EventType::QueueUpdated, Vec::new());
    }

    fn swap_state(&self, queue_type: QueueType) {
        let status = self.status();
        let old = self.state();
        old.on_leave(self, status);
        let new = build_state(queue_type);
        let enters = new.on_enter(self, status);
        *self.state.write().unwrap() = new;
        if enters == StateTransition::AllowAndTrigger {
            self.trigger();
        }
    }

    // ------------------------------------------------------------------
    // push pipeline
    // ------------------------------------------------------------------

    #[tracing::instrument(skip_all, fields(queue = %self.name()))]
    pub async fn push(&self, message: Message, sender: Option<&Client>) -> PushResult {
        match self.push_inner(message, sender).await {
            Ok(result) => result,
            Err((error, envelope)) => {
                tracing::warn!(error = %error, "push pipeline failed");
                let handler = self.handler();
                let decision = handler
                    .exception_thrown(self, envelope.as_ref(), &error)
                    .await;
                if let Some(message) = envelope {
                    self.apply_decision(decision, &message, Duration::ZERO).await;
                    // orphan safety net: nothing owns it, give it back
                    if !message.is_in_queue()
                        && !message.is_sent()
                        && !message.is_removed()
                        && !message.decision().delete
                    {
                        self.schedule_put_back(
                            message,
                            PutBack::Regular,
                            Duration::from_secs(1),
                        );
                    }
                }
                PushResult::Error
            }
        }
    }

    async fn push_inner(
        &self,
        mut message: Message,
        sender: Option<&Client>,
    ) -> Result<PushResult, (crate::Error, Option<QueueMessage>)> {
        if self.status() == QueueStatus::NotInitialized {
            self.initialize(Some(&message))
                .await
                .map_err(|e| (e, None))?;
        }
        match self.status() {
            QueueStatus::Paused | QueueStatus::OnlyConsume | QueueStatus::Destroyed => {
                return Ok(PushResult::StatusNotSupported)
            }
            _ => {}
        }

        let options = self.options();
        if options.message_limit > 0 && self.store.count_all() >= options.message_limit {
            match options.limit_policy {
                MessageLimitPolicy::RejectNew => return Ok(PushResult::LimitExceeded),
                MessageLimitPolicy::DropOld => {
                    let oldest = self
                        .store
                        .get_regular_next(true)
                        .or_else(|| self.store.get_priority_next(true));
                    if let Some(oldest) = oldest {
                        self.finalize_removed(&oldest).await;
                    }
                }
            }
        }
        if options.message_size_limit > 0 && message.payload.len() > options.message_size_limit {
            return Ok(PushResult::LimitExceeded);
        }

        headers::strip_internal(&mut message.headers);
        if !message.wait_response && options.acknowledge != AckDecision::None {
            message.wait_response = true;
        }
        if message.id.is_none() {
            let broker = self
                .broker()
                .ok_or_else(|| {
                    (
                        crate::Error::new("queue push", crate::error::ErrorKind::Offline),
                        None,
                    )
                })?;
            message.id = Some(broker.next_message_id());
        }

        // producers wait while a cluster sync owns the queue
        if self.status() == QueueStatus::Syncing {
            let mut status = self.status.subscribe();
            loop {
                let current = *status.borrow_and_update();
                if current == QueueStatus::Destroyed {
                    return Ok(PushResult::StatusNotSupported);
                }
                if current != QueueStatus::Syncing {
                    break;
                }
                if status.changed().await.is_err() {
                    break;
                }
            }
        }

        if let Some(cluster) = self.broker().and_then(|b| b.cluster()) {
            if cluster.is_reliable_main() {
                cluster
                    .send_queue_message(self.name.clone(), message.clone())
                    .await
                    .map_err(|e| {
                        (
                            crate::Error::new("replicate push", crate::error::ErrorKind::Cluster(e)),
                            None,
                        )
                    })?;
            }
        }

        let envelope = QueueMessage::new(message, sender.map(Client::reference));
        if let Some(ttl) = options.message_timeout {
            envelope.set_deadline(Some(Instant::now() + ttl));
        }
        let decision = self
            .handler()
            .received_from_producer(self, &envelope, sender)
            .await;
        let allowed = self.apply_decision(decision, &envelope, Duration::ZERO).await;

        // the production event is not gated on the decision: an
        // interrupting handler still produced the message
        {
            let queue = self.clone();
            tokio::spawn(async move {
                queue.emit(EventType::MessageProduced, Vec::new());
            });
        }

        if !allowed || envelope.is_removed() {
            return Ok(PushResult::Success);
        }
        self.store.put(envelope);
        self.emit(EventType::MessagePushed, Vec::new());
        self.dispatch_pending();
        Ok(PushResult::Success)
    }

    // ------------------------------------------------------------------
    // acknowledge pipeline
    // ------------------------------------------------------------------

    #[tracing::instrument(skip_all, fields(queue = %self.name()))]
    pub async fn acknowledge_delivered(&self, from: &Client, ack: Message) {
        let Some(message_id) = ack.id else {
            return;
        };
        // the ack may outrun the tracker insert by a few ms
        let mut delivery = self.tracker.find_and_remove(from.id(), message_id);
        for backoff_ms in [1u64, 3u64] {
            if delivery.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            delivery = self.tracker.find_and_remove(from.id(), message_id);
        }
        let Some(delivery) = delivery else {
            tracing::trace!(%message_id, "ack for unknown delivery dropped");
            return;
        };
        delivery.ct.cancel();
        let success = !ack.headers.contains(headers::NACK_REASON);
        if !delivery.mark(if success {
            AcknowledgeStatus::Received
        } else {
            AcknowledgeStatus::Failed
        }) {
            // lost the race against the timeout timer
            return;
        }
        if let Some(receiver) = delivery.receiver() {
            receiver.clear_processing();
        }
        let decision = self
            .handler()
            .acknowledge_received(self, &ack, &delivery, success)
            .await;
        self.apply_decision(decision, &delivery.queue_message, Duration::ZERO)
            .await;
        self.ack_slot.release();
        if success {
            self.emit(EventType::MessageAck, Vec::new());
        } else {
            let reason = ack
                .headers
                .get(headers::NACK_REASON)
                .unwrap_or("none")
                .to_string();
            self.emit(
                EventType::MessageNack,
                vec![(headers::REASON.to_string(), reason)],
            );
        }
        self.dispatch_pending();
    }

    pub(crate) async fn on_delivery_timeout(&self, delivery: Arc<MessageDelivery>) {
        self.tracker.remove(&delivery);
        if let Some(receiver) = delivery.receiver() {
            receiver.clear_processing();
        }
        let decision = self
            .handler()
            .message_timed_out(self, &delivery.queue_message)
            .await;
        self.apply_decision(decision, &delivery.queue_message, Duration::ZERO)
            .await;
        self.ack_slot.release();
        self.emit(EventType::MessageTimeout, Vec::new());
        self.dispatch_pending();
    }

    /// A message hit its time-to-live while waiting in the store. It is
    /// gone unless the handler turns the removal into a put-back.
    pub(crate) async fn on_message_expired(&self, message: QueueMessage) {
        let decision = self.handler().message_timed_out(self, &message).await;
        self.apply_decision(decision.or(Decision::remove()), &message, Duration::ZERO)
            .await;
        self.emit(EventType::MessageTimeout, Vec::new());
    }

    // ------------------------------------------------------------------
    // decisions
    // ------------------------------------------------------------------

    /// Act on a handler decision. Returns `!interrupt`, i.e. whether the
    /// calling pipeline should continue.
    pub(crate) async fn apply_decision(
        &self,
        decision: Decision,
        message: &QueueMessage,
        force_delay: Duration,
    ) -> bool {
        message.set_decision(decision);
        let handler = self.handler();
        if decision.save && !message.is_saved() && handler.save_message(self, message).await {
            message.mark_saved();
        }
        if decision.transmission != DecisionTransmission::None && !message.is_producer_ack_sent() {
            if let Some(source) = message.source() {
                if source.is_connected() && message.take_producer_ack() {
                    let frame = self.producer_ack_frame(message, decision.transmission);
                    source.send(&frame).await;
                }
            }
        }
        if decision.put_back != PutBack::No {
            if !message.is_removed() && !message.is_in_queue() {
                self.schedule_put_back(message.clone(), decision.put_back, force_delay);
            }
        } else if decision.delete && !message.is_removed() {
            self.finalize_removed(message).await;
        }
        !decision.interrupt
    }

    fn producer_ack_frame(
        &self,
        message: &QueueMessage,
        transmission: DecisionTransmission,
    ) -> Message {
        let mut frame = Message::new(
            crate::protocol::MessageKind::Acknowledge,
            self.name.to_string(),
            bytes::Bytes::new(),
        );
        frame.id = message.id();
        if transmission == DecisionTransmission::Failed {
            frame.headers.insert(headers::NACK_REASON, "failed");
        }
        frame
    }

    async fn finalize_removed(&self, message: &QueueMessage) {
        message.mark_removed();
        self.handler().message_dequeued(self, message).await;
        self.emit(EventType::MessageRemoved, Vec::new());
        if let Some(cluster) = self.broker().and_then(|b| b.cluster()) {
            if let Some(id) = message.id() {
                if let Err(e) = cluster.send_message_removal(self.name.clone(), id).await {
                    tracing::warn!(error = %e, "cluster removal notice failed");
                }
            }
        }
    }

    /// Put-back policy: priority class honours `put_back_delay` alone,
    /// regular class the larger of `put_back_delay` and `force_delay`.
    /// Re-insertion is at the head of the chosen class.
    pub(crate) fn schedule_put_back(
        &self,
        message: QueueMessage,
        kind: PutBack,
        force_delay: Duration,
    ) {
        let priority = kind == PutBack::Priority;
        let options = self.options();
        let delay = if priority {
            options.put_back_delay
        } else {
            options.put_back_delay.max(force_delay)
        };
        if delay.is_zero() {
            self.store.put_front(message, priority);
            self.dispatch_pending();
            return;
        }
        let queue = self.clone();
        let ct = self.ct.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = ct.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if queue.status() == QueueStatus::Destroyed || message.is_removed() {
                        return;
                    }
                    queue.store.put_front(message.clone(), priority);
                    if let Some(cluster) = queue.broker().and_then(|b| b.cluster()) {
                        let frame = message.message();
                        if let Err(e) = cluster
                            .send_put_back(queue.name.clone(), frame, priority)
                            .await
                        {
                            tracing::warn!(error = %e, "cluster put-back notice failed");
                        }
                    }
                    queue.dispatch_pending();
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // draining
    // ------------------------------------------------------------------

    pub(crate) async fn wait_for_previous_ack(&self, cap: Duration) {
        self.ack_slot.wait_previous(cap).await;
    }
    pub(crate) fn install_ack_slot(&self) {
        self.ack_slot.install();
    }
    pub(crate) fn release_ack_slot(&self) {
        self.ack_slot.release();
    }

    /// Kick the drain loop if the strategy feeds from the store. At most
    /// one drain runs per queue; concurrent calls return immediately.
    pub(crate) fn trigger(&self) {
        if !matches!(
            self.status(),
            QueueStatus::Running | QueueStatus::OnlyConsume
        ) {
            return;
        }
        let state = self.state();
        if !state.drains_store() {
            return;
        }
        if self.trigger_busy.swap(true, Ordering::AcqRel) {
            return;
        }
        let queue = self.clone();
        let ct = self.ct.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = ct.cancelled() => {}
                _ = queue.run_drain() => {}
            }
            queue.trigger_busy.store(false, Ordering::Release);
        });
    }

    /// Re-dispatch after anything that could unblock delivery: a push, a
    /// put-back, a freed consumer slot, a new subscriber.
    pub(crate) fn dispatch_pending(&self) {
        self.trigger();
    }

    async fn run_drain(&self) {
        let state = self.state();
        loop {
            if !matches!(
                self.status(),
                QueueStatus::Running | QueueStatus::OnlyConsume
            ) {
                break;
            }
            if self.client_snapshot().is_empty() {
                break;
            }
            // in wait mode the previous delivery must resolve before the
            // next message is even dequeued, so a put-back can overtake it
            let options = self.options();
            if options.acknowledge == AckDecision::Wait {
                self.wait_for_previous_ack(options.ack_timeout).await;
            }
            let Some(message) = self.store.get_next(true, false) else {
                break;
            };
            if message.is_expired(Instant::now()) {
                self.on_message_expired(message).await;
                continue;
            }
            if state.push(self, message).await == PushResult::NoConsumers {
                break;
            }
            let delay = self.options().delay_between_messages;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// 1s cadence: expire messages, failsafe re-trigger every fifth tick,
    /// auto-destroy checks.
    fn start_time_keeper(&self) {
        let queue = self.clone();
        let ct = self.ct.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut tick: u64 = 0;
            loop {
                tokio::select! {
                    _ = ct.cancelled() => break,
                    _ = interval.tick() => {
                        tick = tick.wrapping_add(1);
                        let expired = queue.store.remove_expired(Instant::now());
                        for message in expired {
                            queue.on_message_expired(message).await;
                        }
                        if tick % 5 == 0 && queue.state().trigger_supported() {
                            queue.trigger();
                        }
                        queue.auto_destroy_check().await;
                    }
                }
            }
        });
    }

    async fn auto_destroy_check(&self) {
        if self.status() == QueueStatus::Destroyed {
            return;
        }
        let rule = self.options().auto_destroy;
        if rule == AutoDestroy::Disabled {
            return;
        }
        let no_consumers = self.clients.read().unwrap().is_empty();
        let no_messages = self.store.is_empty() && self.tracker.pending_count() == 0;
        let destroy = match rule {
            AutoDestroy::Disabled => false,
            AutoDestroy::NoConsumers => no_consumers,
            AutoDestroy::NoMessages => no_messages,
            AutoDestroy::Empty => no_consumers && no_messages,
        };
        if destroy {
            tracing::debug!(queue = %self.name, ?rule, "auto destroy");
            if let Some(broker) = self.broker() {
                broker.remove_queue(self.name()).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // subscriptions
    // ------------------------------------------------------------------

    /// Join a client; idempotent per (queue, client) pair.
    pub async fn subscribe(&self, client: &Client) -> crate::Result<Arc<QueueClient>> {
        if self.status() == QueueStatus::Destroyed {
            return Err(crate::Error::new(
                "queue subscribe",
                crate::error::ErrorKind::Destroyed,
            ));
        }
        let subscription = {
            let mut clients = self.clients.write().unwrap();
            if let Some(existing) = clients.iter().find(|qc| {
                qc.client()
                    .is_some_and(|c| c.id() == client.id())
            }) {
                return Ok(existing.clone());
            }
            let limit = self.options.read().unwrap().client_limit;
            if limit > 0 && clients.len() >= limit {
                return Err(crate::Error::new(
                    "queue subscribe",
                    crate::error::ErrorKind::LimitExceeded,
                ));
            }
            let subscription = Arc::new(QueueClient::new(self, client));
            clients.push(subscription.clone());
            subscription
        };
        client.add_queue_subscription(subscription.clone());
        self.emit(
            EventType::QueueSubscribed,
            vec![(headers::CLIENT_ID.to_string(), client.id().to_string())],
        );
        self.dispatch_pending();
        Ok(subscription)
    }

    /// Detach a client, cancelling and requeueing its in-flight work.
    pub async fn remove_client(&self, client: &Client) -> bool {
        let removed = {
            let mut clients = self.clients.write().unwrap();
            let mut removed = None;
            clients.retain(|qc| match qc.client() {
                // drop dead back-references while scanning
                None => false,
                Some(c) if c.id() == client.id() => {
                    removed = Some(qc.clone());
                    false
                }
                Some(_) => true,
            });
            removed
        };
        let Some(subscription) = removed else {
            return false;
        };
        client.remove_queue_subscription(&subscription);
        for delivery in self.tracker.remove_client(client.id()) {
            delivery.ct.cancel();
            if delivery.mark(AcknowledgeStatus::Failed) {
                self.release_ack_slot();
                let message = delivery.queue_message.clone();
                if !message.is_removed() && !message.is_in_queue() {
                    self.schedule_put_back(message, PutBack::Regular, Duration::ZERO);
                }
            }
        }
        self.emit(
            EventType::QueueUnsubscribed,
            vec![(headers::CLIENT_ID.to_string(), client.id().to_string())],
        );
        true
    }

    // ------------------------------------------------------------------
    // pulling
    // ------------------------------------------------------------------

    pub async fn pull(&self, client: &Client, request: &Message) -> PullResult {
        if self.status() == QueueStatus::NotInitialized {
            if self.initialize(Some(request)).await.is_err() {
                return PullResult::Unacceptable;
            }
        }
        if matches!(self.status(), QueueStatus::Paused | QueueStatus::Destroyed) {
            return PullResult::StatusNotSupported;
        }
        let Some(subscription) = self.find_client(client) else {
            return PullResult::Unacceptable;
        };
        let state = self.state();
        state.pull(self, &subscription, request).await
    }

    // ------------------------------------------------------------------
    // teardown
    // ------------------------------------------------------------------

    /// Terminal. Cancels every timer, drops all subscriptions and empties
    /// the store.
    pub async fn destroy(&self) {
        {
            let _guard = self.transition_lock.lock().await;
            if self.status() == QueueStatus::Destroyed {
                return;
            }
            self.status.send_replace(QueueStatus::Destroyed);
        }
        self.ct.cancel();
        self.tracker.destroy();
        self.ack_slot.release();
        let subscriptions: Vec<_> = self.clients.write().unwrap().drain(..).collect();
        for subscription in subscriptions {
            if let Some(client) = subscription.client() {
                client.remove_queue_subscription(&subscription);
            }
        }
        self.store.clear_all();
        tracing::debug!(queue = %self.name, "queue destroyed");
    }
}
