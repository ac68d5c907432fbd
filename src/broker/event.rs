//! Side-channel lifecycle events. Sinks observe; they can never change a
//! pipeline's outcome, and a panicking sink is a sink's own bug.

use std::sync::{Arc, RwLock};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventType {
    QueueCreated,
    QueueRemoved,
    QueueUpdated,
    QueueStatusChanged,
    QueueSubscribed,
    QueueUnsubscribed,
    MessageProduced,
    MessagePushed,
    MessageAck,
    MessageNack,
    MessageTimeout,
    MessageRemoved,
    ChannelCreated,
    ChannelRemoved,
    ChannelSubscribed,
    ChannelUnsubscribed,
    ChannelPublished,
    RouterCreated,
    RouterRemoved,
    BindingAdded,
    BindingRemoved,
    ClientConnected,
    ClientDisconnected,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone)]
pub struct BrokerEvent {
    pub event_type: EventType,
    /// The entity the event is about: a queue, channel, router or client
    /// name.
    pub target: String,
    pub headers: Vec<(String, String)>,
}

pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: &BrokerEvent);
}

impl<F> EventSink for F
where
    F: Fn(&BrokerEvent) + Send + Sync + 'static,
{
    fn emit(&self, event: &BrokerEvent) {
        self(event)
    }
}

#[derive(Default)]
pub struct EventHub {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("sinks", &self.sinks.read().unwrap().len())
            .finish()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn attach<T: EventSink>(&self, sink: T) {
        self.sinks.write().unwrap().push(Arc::new(sink));
    }
    pub fn trigger(
        &self,
        event_type: EventType,
        target: impl Into<String>,
        headers: Vec<(String, String)>,
    ) {
        let sinks = self.sinks.read().unwrap().clone();
        if sinks.is_empty() {
            return;
        }
        let event = BrokerEvent {
            event_type,
            target: target.into(),
            headers,
        };
        tracing::trace!(event = %event.event_type, target = %event.target, "event");
        for sink in sinks {
            sink.emit(&event);
        }
    }
}
