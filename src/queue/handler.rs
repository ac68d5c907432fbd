//! Delivery handler hooks. Every step of a message's life on a queue asks
//! the handler what to do next; the answer is a [`Decision`] the queue
//! pipeline applies. Handlers are built by name through a factory registry,
//! so the hosting process can plug its own without touching the engine.

use std::{
    borrow::Cow,
    collections::HashMap,
    future::Future,
    sync::{Arc, RwLock},
};

use crate::{
    client::Client,
    protocol::{HeaderMap, Message},
};

use super::{
    envelope::{Decision, DecisionTransmission, PutBack, QueueMessage},
    options::AckDecision,
    tracker::MessageDelivery,
    Queue, QueueClient,
};

pub trait DeliveryHandler: Send + Sync + 'static {
    fn received_from_producer(
        &self,
        queue: &Queue,
        message: &QueueMessage,
        sender: Option<&Client>,
    ) -> impl Future<Output = Decision> + Send;

    fn begin_send(
        &self,
        queue: &Queue,
        message: &QueueMessage,
    ) -> impl Future<Output = Decision> + Send;

    /// Veto hook: a `false` skips this consumer and advances to the next.
    fn can_consumer_receive(
        &self,
        queue: &Queue,
        message: &QueueMessage,
        receiver: &QueueClient,
    ) -> impl Future<Output = bool> + Send;

    fn consumer_receive_failed(
        &self,
        queue: &Queue,
        message: &QueueMessage,
        receiver: &QueueClient,
    ) -> impl Future<Output = Decision> + Send;

    fn end_send(
        &self,
        queue: &Queue,
        message: &QueueMessage,
    ) -> impl Future<Output = Decision> + Send;

    fn acknowledge_received(
        &self,
        queue: &Queue,
        ack: &Message,
        delivery: &MessageDelivery,
        success: bool,
    ) -> impl Future<Output = Decision> + Send;

    fn message_timed_out(
        &self,
        queue: &Queue,
        message: &QueueMessage,
    ) -> impl Future<Output = Decision> + Send;

    fn message_dequeued(
        &self,
        queue: &Queue,
        message: &QueueMessage,
    ) -> impl Future<Output = ()> + Send;

    /// Durable save. Returns whether the message is now saved; the queue
    /// keeps this idempotent through the envelope's saved flag.
    fn save_message(
        &self,
        queue: &Queue,
        message: &QueueMessage,
    ) -> impl Future<Output = bool> + Send;

    fn exception_thrown(
        &self,
        queue: &Queue,
        message: Option<&QueueMessage>,
        error: &crate::Error,
    ) -> impl Future<Output = Decision> + Send;
}

#[derive(Clone)]
pub struct DeliveryHandlerService {
    provider: Cow<'static, str>,
    inner: Arc<dyn sealed::BoxedDeliveryHandler>,
}

impl std::fmt::Debug for DeliveryHandlerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandlerService")
            .field("provider", &self.provider)
            .finish()
    }
}

impl DeliveryHandlerService {
    pub fn new<T>(inner: T) -> Self
    where
        T: DeliveryHandler,
    {
        Self {
            provider: std::any::type_name::<T>().into(),
            inner: Arc::new(inner),
        }
    }
    pub async fn received_from_producer(
        &self,
        queue: &Queue,
        message: &QueueMessage,
        sender: Option<&Client>,
    ) -> Decision {
        self.inner
            .received_from_producer(queue, message, sender)
            .await
    }
    pub async fn begin_send(&self, queue: &Queue, message: &QueueMessage) -> Decision {
        self.inner.begin_send(queue, message).await
    }
    pub async fn can_consumer_receive(
        &self,
        queue: &Queue,
        message: &QueueMessage,
        receiver: &QueueClient,
    ) -> bool {
        self.inner
            .can_consumer_receive(queue, message, receiver)
            .await
    }
    pub async fn consumer_receive_failed(
        &self,
        queue: &Queue,
        message: &QueueMessage,
        receiver: &QueueClient,
    ) -> Decision {
        self.inner
            .consumer_receive_failed(queue, message, receiver)
            .await
    }
    pub async fn end_send(&self, queue: &Queue, message: &QueueMessage) -> Decision {
        self.inner.end_send(queue, message).await
    }
    pub async fn acknowledge_received(
        &self,
        queue: &Queue,
        ack: &Message,
        delivery: &MessageDelivery,
        success: bool,
    ) -> Decision {
        self.inner
            .acknowledge_received(queue, ack, delivery, success)
            .await
    }
    pub async fn message_timed_out(&self, queue: &Queue, message: &QueueMessage) -> Decision {
        self.inner.message_timed_out(queue, message).await
    }
    pub async fn message_dequeued(&self, queue: &Queue, message: &QueueMessage) {
        self.inner.message_dequeued(queue, message).await
    }
    pub async fn save_message(&self, queue: &Queue, message: &QueueMessage) -> bool {
        self.inner.save_message(queue, message).await
    }
    pub async fn exception_thrown(
        &self,
        queue: &Queue,
        message: Option<&QueueMessage>,
        error: &crate::Error,
    ) -> Decision {
        self.inner.exception_thrown(queue, message, error).await
    }
}

/// Passed to a factory when a queue initialises: the queue being built for
/// and the headers of the frame that initialised it.
#[derive(Debug, Clone)]
pub struct DeliveryHandlerBuildContext {
    pub queue: Queue,
    pub headers: HeaderMap,
}

pub type HandlerFactory =
    dyn Fn(DeliveryHandlerBuildContext) -> DeliveryHandlerService + Send + Sync;

/// Name → factory map, resolved when a queue reads its `Delivery-Handler`
/// init header. `"Default"` is always present.
#[derive(Clone)]
pub struct DeliveryHandlerRegistry {
    factories: Arc<RwLock<HashMap<String, Arc<HandlerFactory>>>>,
}

impl std::fmt::Debug for DeliveryHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.factories.read().unwrap().keys().cloned().collect();
        f.debug_struct("DeliveryHandlerRegistry")
            .field("factories", &names)
            .finish()
    }
}

impl Default for DeliveryHandlerRegistry {
    fn default() -> Self {
        let registry = Self {
            factories: Arc::new(RwLock::new(HashMap::new())),
        };
        registry.register("Default", |_ctx| {
            DeliveryHandlerService::new(DefaultDeliveryHandler)
        });
        registry
    }
}

impl DeliveryHandlerRegistry {
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: impl Fn(DeliveryHandlerBuildContext) -> DeliveryHandlerService
            + Send
            + Sync
            + 'static,
    ) {
        self.factories
            .write()
            .unwrap()
            .insert(name.into(), Arc::new(factory));
    }
    pub fn resolve(&self, name: &str) -> Option<Arc<HandlerFactory>> {
        self.factories.read().unwrap().get(name).cloned()
    }
}

/// Ack-driven semantics: delete after send when the queue does not track
/// acks, delete on positive ack, requeue on negative ack, drop on ack
/// timeout, delete expired messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDeliveryHandler;

impl DeliveryHandler for DefaultDeliveryHandler {
    async fn received_from_producer(
        &self,
        queue: &Queue,
        _message: &QueueMessage,
        _sender: Option<&Client>,
    ) -> Decision {
        match queue.options().acknowledge {
            AckDecision::Just => {
                Decision::keep().with_transmission(DecisionTransmission::Successful)
            }
            _ => Decision::keep(),
        }
    }
    async fn begin_send(&self, _queue: &Queue, _message: &QueueMessage) -> Decision {
        Decision::keep()
    }
    async fn can_consumer_receive(
        &self,
        _queue: &Queue,
        _message: &QueueMessage,
        _receiver: &QueueClient,
    ) -> bool {
        true
    }
    async fn consumer_receive_failed(
        &self,
        _queue: &Queue,
        _message: &QueueMessage,
        _receiver: &QueueClient,
    ) -> Decision {
        Decision::keep()
    }
    async fn end_send(&self, queue: &Queue, _message: &QueueMessage) -> Decision {
        if queue.options().acknowledge == AckDecision::None {
            Decision::remove()
        } else {
            Decision::keep()
        }
    }
    async fn acknowledge_received(
        &self,
        queue: &Queue,
        _ack: &Message,
        _delivery: &MessageDelivery,
        success: bool,
    ) -> Decision {
        let transmission = match queue.options().acknowledge {
            AckDecision::Wait if success => DecisionTransmission::Successful,
            AckDecision::Wait => DecisionTransmission::Failed,
            _ => DecisionTransmission::None,
        };
        if success {
            Decision::remove().with_transmission(transmission)
        } else {
            Decision::put_back(PutBack::Regular).with_transmission(transmission)
        }
    }
    async fn message_timed_out(&self, _queue: &Queue, message: &QueueMessage) -> Decision {
        // expired while waiting in the store: drop it; an in-flight
        // delivery that timed out is simply released
        if message.is_sent() {
            Decision::keep()
        } else {
            Decision::remove()
        }
    }
    async fn message_dequeued(&self, _queue: &Queue, _message: &QueueMessage) {}
    async fn save_message(&self, _queue: &Queue, _message: &QueueMessage) -> bool {
        false
    }
    async fn exception_thrown(
        &self,
        _queue: &Queue,
        _message: Option<&QueueMessage>,
        _error: &crate::Error,
    ) -> Decision {
        Decision::keep()
    }
}

mod sealed {
    use futures_util::future::BoxFuture;

    use super::DeliveryHandler;
    use crate::{
        client::Client,
        protocol::Message,
        queue::{
            envelope::{Decision, QueueMessage},
            tracker::MessageDelivery,
            Queue, QueueClient,
        },
    };

    pub(super) trait BoxedDeliveryHandler: Send + Sync {
        fn received_from_producer<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
            sender: Option<&'r Client>,
        ) -> BoxFuture<'r, Decision>;
        fn begin_send<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
        ) -> BoxFuture<'r, Decision>;
        fn can_consumer_receive<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
            receiver: &'r QueueClient,
        ) -> BoxFuture<'r, bool>;
        fn consumer_receive_failed<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
            receiver: &'r QueueClient,
        ) -> BoxFuture<'r, Decision>;
        fn end_send<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
        ) -> BoxFuture<'r, Decision>;
        fn acknowledge_received<'r>(
            &'r self,
            queue: &'r Queue,
            ack: &'r Message,
            delivery: &'r MessageDelivery,
            success: bool,
        ) -> BoxFuture<'r, Decision>;
        fn message_timed_out<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
        ) -> BoxFuture<'r, Decision>;
        fn message_dequeued<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
        ) -> BoxFuture<'r, ()>;
        fn save_message<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
        ) -> BoxFuture<'r, bool>;
        fn exception_thrown<'r>(
            &'r self,
            queue: &'r Queue,
            message: Option<&'r QueueMessage>,
            error: &'r crate::Error,
        ) -> BoxFuture<'r, Decision>;
    }

    impl<T> BoxedDeliveryHandler for T
    where
        T: DeliveryHandler,
    {
        fn received_from_producer<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
            sender: Option<&'r Client>,
        ) -> BoxFuture<'r, Decision> {
            Box::pin(DeliveryHandler::received_from_producer(
                self, queue, message, sender,
            ))
        }
        fn begin_send<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
        ) -> BoxFuture<'r, Decision> {
            Box::pin(DeliveryHandler::begin_send(self, queue, message))
        }
        fn can_consumer_receive<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
            receiver: &'r QueueClient,
        ) -> BoxFuture<'r, bool> {
            Box::pin(DeliveryHandler::can_consumer_receive(
                self, queue, message, receiver,
            ))
        }
        fn consumer_receive_failed<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
            receiver: &'r QueueClient,
        ) -> BoxFuture<'r, Decision> {
            Box::pin(DeliveryHandler::consumer_receive_failed(
                self, queue, message, receiver,
            ))
        }
        fn end_send<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
        ) -> BoxFuture<'r, Decision> {
            Box::pin(DeliveryHandler::end_send(self, queue, message))
        }
        fn acknowledge_received<'r>(
            &'r self,
            queue: &'r Queue,
            ack: &'r Message,
            delivery: &'r MessageDelivery,
            success: bool,
        ) -> BoxFuture<'r, Decision> {
            Box::pin(DeliveryHandler::acknowledge_received(
                self, queue, ack, delivery, success,
            ))
        }
        fn message_timed_out<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
        ) -> BoxFuture<'r, Decision> {
            Box::pin(DeliveryHandler::message_timed_out(self, queue, message))
        }
        fn message_dequeued<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
        ) -> BoxFuture<'r, ()> {
            Box::pin(DeliveryHandler::message_dequeued(self, queue, message))
        }
        fn save_message<'r>(
            &'r self,
            queue: &'r Queue,
            message: &'r QueueMessage,
        ) -> BoxFuture<'r, bool> {
            Box::pin(DeliveryHandler::save_message(self, queue, message))
        }
        fn exception_thrown<'r>(
            &'r self,
            queue: &'r Queue,
            message: Option<&'r QueueMessage>,
            error: &'r crate::Error,
        ) -> BoxFuture<'r, Decision> {
            Box::pin(DeliveryHandler::exception_thrown(
                self, queue, message, error,
            ))
        }
    }
}
