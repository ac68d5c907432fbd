use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::future::BoxFuture;
use tokio::time::Instant;

use crate::protocol::{headers, Message};

use super::{
    client::QueueClient,
    envelope::{Decision, QueueMessage},
    options::AckDecision,
    tracker::MessageDelivery,
    PushResult, Queue, QueueStatus,
};

/// Verdict of a strategy consulted about a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    DenyAndStay,
    Allow,
    AllowAndTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullResult {
    /// Messages were streamed to the caller.
    Accepted(usize),
    Empty,
    StatusNotSupported,
    Unacceptable,
}

/// A dispatch strategy. One instance lives per queue and owns whatever
/// cursor state the strategy needs.
pub trait QueueState: Send + Sync + 'static {
    /// Whether the watchdog failsafe re-triggers this strategy.
    fn trigger_supported(&self) -> bool;
    /// Whether the drain loop feeds this strategy from the store at all.
    /// Pull queues keep their backlog until asked.
    fn drains_store(&self) -> bool {
        true
    }
    fn push<'a>(&'a self, queue: &'a Queue, message: QueueMessage) -> BoxFuture<'a, PushResult>;
    fn pull<'a>(
        &'a self,
        queue: &'a Queue,
        caller: &'a Arc<QueueClient>,
        request: &'a Message,
    ) -> BoxFuture<'a, PullResult>;
    fn on_enter(&self, queue: &Queue, previous: QueueStatus) -> StateTransition;
    fn on_leave(&self, queue: &Queue, next: QueueStatus) -> StateTransition;
}

const NO_CONSUMER_RESAMPLE: Duration = Duration::from_millis(3);
const NO_CONSUMER_GIVE_UP: Duration = Duration::from_secs(30);

/// Broadcast: every connected subscriber gets the message, nothing is
/// tracked, and the store is only a waiting room for times with no
/// subscribers at all.
#[derive(Debug, Default)]
pub struct BroadcastState;

impl QueueState for BroadcastState {
    fn trigger_supported(&self) -> bool {
        false
    }

    fn push<'a>(&'a self, queue: &'a Queue, message: QueueMessage) -> BoxFuture<'a, PushResult> {
        Box::pin(async move {
            let clients = queue.client_snapshot();
            if clients.is_empty() {
                queue.store().put(message);
                return PushResult::NoConsumers;
            }
            let frame = message.message();
            let mut delivered = 0usize;
            for queue_client in clients {
                let Some(client) = queue_client.client() else {
                    continue;
                };
                if !client.is_connected() {
                    continue;
                }
                if client.send(&frame).await {
                    message.add_delivery_receiver(client.reference());
                    delivered += 1;
                }
            }
            if delivered == 0 {
                queue.store().put(message);
                return PushResult::NoConsumers;
            }
            message.mark_sent();
            let decision = queue.handler().end_send(queue, &message).await;
            // a broadcast message is spent once delivered
            queue
                .apply_decision(decision.or(Decision::remove()), &message, Duration::ZERO)
                .await;
            PushResult::Success
        })
    }

    fn pull<'a>(
        &'a self,
        _queue: &'a Queue,
        _caller: &'a Arc<QueueClient>,
        _request: &'a Message,
    ) -> BoxFuture<'a, PullResult> {
        Box::pin(async { PullResult::StatusNotSupported })
    }

    fn on_enter(&self, _queue: &Queue, _previous: QueueStatus) -> StateTransition {
        StateTransition::Allow
    }
    fn on_leave(&self, _queue: &Queue, _next: QueueStatus) -> StateTransition {
        StateTransition::Allow
    }
}

/// Competing consumers in strict rotation. The cursor starts before the
/// first registered client and survives subscriber churn modulo the list
/// length.
#[derive(Debug)]
pub struct RoundRobinState {
    cursor: Mutex<i64>,
}

impl Default for RoundRobinState {
    fn default() -> Self {
        Self {
            cursor: Mutex::new(-1),
        }
    }
}

impl RoundRobinState {
    /// Next eligible consumer at or after the cursor, honouring the
    /// handler veto. Advances the cursor only when someone is picked.
    async fn next_receiver(
        &self,
        queue: &Queue,
        message: &QueueMessage,
        ack_off: bool,
    ) -> Option<Arc<QueueClient>> {
        let clients = queue.client_snapshot();
        if clients.is_empty() {
            return None;
        }
        let start = *self.cursor.lock().unwrap();
        let len = clients.len() as i64;
        let now = Instant::now();
        for offset in 0..len {
            let index = (start + 1 + offset).rem_euclid(len);
            let candidate = &clients[index as usize];
            if !candidate.is_available(ack_off, now) {
                continue;
            }
            if !queue
                .handler()
                .can_consumer_receive(queue, message, candidate)
                .await
            {
                continue;
            }
            *self.cursor.lock().unwrap() = index;
            return Some(candidate.clone());
        }
        None
    }
}

impl QueueState for RoundRobinState {
    fn trigger_supported(&self) -> bool {
        true
    }

    fn push<'a>(&'a self, queue: &'a Queue, message: QueueMessage) -> BoxFuture<'a, PushResult> {
        Box::pin(async move {
            let options = queue.options();
            let ack_off = options.acknowledge == AckDecision::None;
            let Some(message_id) = message.id() else {
                return PushResult::Error;
            };
            let started = Instant::now();
            loop {
                if queue.status() == QueueStatus::Destroyed {
                    return PushResult::Error;
                }
                let Some(receiver) = self.next_receiver(queue, &message, ack_off).await else {
                    if queue.client_snapshot().is_empty()
                        || started.elapsed() >= NO_CONSUMER_GIVE_UP
                    {
                        // back to the store as a fresh message, not a put-back
                        queue.store().put(message);
                        return PushResult::NoConsumers;
                    }
                    tokio::time::sleep(NO_CONSUMER_RESAMPLE).await;
                    continue;
                };
                let Some(client) = receiver.client() else {
                    continue;
                };

                let deadline = Instant::now() + options.ack_timeout;
                if !ack_off {
                    receiver.begin_processing(&message, deadline);
                }
                let decision = queue.handler().begin_send(queue, &message).await;
                if !queue
                    .apply_decision(decision, &message, Duration::ZERO)
                    .await
                {
                    receiver.clear_processing();
                    return PushResult::Success;
                }

                let frame = message.message();
                message.mark_sent();
                message.add_delivery_receiver(client.reference());
                if !ack_off {
                    let delivery = Arc::new(MessageDelivery::new(
                        message.clone(),
                        &receiver,
                        client.id().clone(),
                        message_id,
                        Some(deadline),
                        queue.child_token(),
                    ));
                    queue.tracker().track(delivery, queue.reference());
                    if options.acknowledge == AckDecision::Wait {
                        queue.install_ack_slot();
                    }
                }

                if !client.send(&frame).await {
                    receiver.clear_processing();
                    if let Some(delivery) = queue.tracker().find_and_remove(client.id(), message_id)
                    {
                        delivery.ct.cancel();
                    }
                    queue.release_ack_slot();
                    let decision = queue
                        .handler()
                        .consumer_receive_failed(queue, &message, &receiver)
                        .await;
                    if !queue
                        .apply_decision(decision, &message, Duration::ZERO)
                        .await
                    {
                        return PushResult::Success;
                    }
                    // try the next consumer in rotation
                    continue;
                }

                let decision = queue.handler().end_send(queue, &message).await;
                queue
                    .apply_decision(decision, &message, Duration::ZERO)
                    .await;
                return PushResult::Success;
            }
        })
    }

    fn pull<'a>(
        &'a self,
        _queue: &'a Queue,
        _caller: &'a Arc<QueueClient>,
        _request: &'a Message,
    ) -> BoxFuture<'a, PullResult> {
        Box::pin(async { PullResult::StatusNotSupported })
    }

    fn on_enter(&self, _queue: &Queue, _previous: QueueStatus) -> StateTransition {
        StateTransition::AllowAndTrigger
    }
    fn on_leave(&self, _queue: &Queue, _next: QueueStatus) -> StateTransition {
        StateTransition::Allow
    }
}

/// On-demand: messages wait in the store until a consumer pulls a batch.
#[derive(Debug, Default)]
pub struct PullState;

impl QueueState for PullState {
    fn trigger_supported(&self) -> bool {
        false
    }
    fn drains_store(&self) -> bool {
        false
    }

    fn push<'a>(&'a self, queue: &'a Queue, message: QueueMessage) -> BoxFuture<'a, PushResult> {
        // never drained through push; keep whatever reaches here
        Box::pin(async move {
            queue.store().put(message);
            PushResult::Success
        })
    }

    fn pull<'a>(
        &'a self,
        queue: &'a Queue,
        caller: &'a Arc<QueueClient>,
        request: &'a Message,
    ) -> BoxFuture<'a, PullResult> {
        Box::pin(async move {
            let Some(client) = caller.client() else {
                return PullResult::Unacceptable;
            };
            let count: usize = request
                .headers
                .get(headers::COUNT)
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            if count == 0 {
                return PullResult::Unacceptable;
            }
            let from_end = request
                .headers
                .get(headers::ORDER)
                .is_some_and(|v| v.eq_ignore_ascii_case("lifo"));
            let options = queue.options();
            let ack_off = options.acknowledge == AckDecision::None;

            let mut sent = 0usize;
            while sent < count {
                let Some(message) = queue.store().get_next(true, from_end) else {
                    break;
                };
                if message.is_expired(Instant::now()) {
                    queue.on_message_expired(message).await;
                    continue;
                }
                let decision = queue.handler().begin_send(queue, &message).await;
                if !queue
                    .apply_decision(decision, &message, Duration::ZERO)
                    .await
                {
                    continue;
                }
                let mut frame = message.message();
                frame
                    .headers
                    .insert(headers::INDEX, (sent + 1).to_string());
                message.mark_sent();
                message.add_delivery_receiver(client.reference());
                if !ack_off {
                    if let Some(message_id) = message.id() {
                        let deadline = Instant::now() + options.ack_timeout;
                        receiver_track(queue, caller, &client, &message, message_id, deadline);
                    }
                }
                if !client.send(&frame).await {
                    queue
                        .store()
                        .put_front(message.clone(), message.is_high_priority());
                    break;
                }
                let decision = queue.handler().end_send(queue, &message).await;
                queue
                    .apply_decision(decision, &message, Duration::ZERO)
                    .await;
                sent += 1;
            }

            let mut end = Message::response(request, crate::protocol::results::OK);
            end.headers.insert(headers::LAST_MESSAGE, "true");
            end.headers.insert(headers::COUNT, sent.to_string());
            let _ = client.send(&end).await;

            match request.headers.get(headers::CLEAR_AFTER) {
                Some(v) if v.eq_ignore_ascii_case("all") => {
                    queue.store().clear_all();
                }
                Some(v) if v.eq_ignore_ascii_case("priority") => {
                    queue.store().clear_priority();
                }
                Some(v) if v.eq_ignore_ascii_case("regular") => {
                    queue.store().clear_regular();
                }
                _ => {}
            }

            if sent == 0 {
                PullResult::Empty
            } else {
                PullResult::Accepted(sent)
            }
        })
    }

    fn on_enter(&self, _queue: &Queue, _previous: QueueStatus) -> StateTransition {
        StateTransition::Allow
    }
    fn on_leave(&self, _queue: &Queue, _next: QueueStatus) -> StateTransition {
        StateTransition::Allow
    }
}

fn receiver_track(
    queue: &Queue,
    caller: &Arc<QueueClient>,
    client: &crate::client::Client,
    message: &QueueMessage,
    message_id: crate::protocol::MessageId,
    deadline: Instant,
) {
    caller.begin_processing(message, deadline);
    let delivery = Arc::new(MessageDelivery::new(
        message.clone(),
        caller,
        client.id().clone(),
        message_id,
        Some(deadline),
        queue.child_token(),
    ));
    queue.tracker().track(delivery, queue.reference());
}
