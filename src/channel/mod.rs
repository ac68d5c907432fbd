use std::{
    ops::Deref,
    sync::{Arc, RwLock, Weak},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::{
    broker::{event::EventType, BrokerRef},
    client::{Client, ClientRef},
    protocol::{headers, EntityName, HeaderMap, Message},
    queue::PushResult,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// Subscriber cap; zero means unlimited.
    pub client_limit: usize,
    /// Payload byte cap; zero means unlimited.
    pub message_size_limit: usize,
    /// Drop the channel once its last subscriber leaves.
    pub auto_destroy_idle: bool,
    pub topic: Option<String>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            client_limit: 0,
            message_size_limit: 0,
            auto_destroy_idle: false,
            topic: None,
        }
    }
}

impl ChannelOptions {
    pub fn apply_headers(&mut self, headers_map: &HeaderMap) {
        for (name, value) in headers_map.iter() {
            match name {
                headers::CLIENT_LIMIT => {
                    if let Ok(limit) = value.parse() {
                        self.client_limit = limit;
                    }
                }
                headers::MESSAGE_SIZE_LIMIT => {
                    if let Ok(limit) = value.parse() {
                        self.message_size_limit = limit;
                    }
                }
                headers::QUEUE_TOPIC => self.topic = Some(value.to_string()),
                headers::AUTO_DESTROY => {
                    self.auto_destroy_idle = value.eq_ignore_ascii_case("idle")
                        || value.eq_ignore_ascii_case("true");
                }
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[typeshare]
pub enum ChannelStatus {
    Running,
    Paused,
    Destroyed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[typeshare]
pub struct ChannelInfo {
    pub name: String,
    pub topic: Option<String>,
    pub status: ChannelStatus,
    pub subscriber_count: usize,
}

/// The join record of one client on one channel.
#[derive(Debug)]
pub struct ChannelClient {
    pub(crate) channel: ChannelRef,
    pub(crate) client: ClientRef,
    pub joined_at: DateTime<Utc>,
}

impl ChannelClient {
    pub fn client(&self) -> Option<Client> {
        self.client.upgrade()
    }
    pub fn channel(&self) -> Option<Channel> {
        self.channel.upgrade()
    }
}

pub struct ChannelInner {
    name: EntityName,
    broker: BrokerRef,
    options: RwLock<ChannelOptions>,
    status: RwLock<ChannelStatus>,
    subscribers: RwLock<Vec<Arc<ChannelClient>>>,
}

impl std::fmt::Debug for ChannelInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("status", &*self.status.read().unwrap())
            .finish()
    }
}

/// Best-effort fan-out endpoint: every connected subscriber gets every
/// published message, nothing is stored, nothing is tracked.
#[derive(Debug, Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Deref for Channel {
    type Target = ChannelInner;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelRef {
    inner: Weak<ChannelInner>,
}

impl ChannelRef {
    pub fn upgrade(&self) -> Option<Channel> {
        self.inner.upgrade().map(|inner| Channel { inner })
    }
}

impl Channel {
    pub(crate) fn new(broker: BrokerRef, name: EntityName, options: ChannelOptions) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name,
                broker,
                options: RwLock::new(options),
                status: RwLock::new(ChannelStatus::Running),
                subscribers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &EntityName {
        &self.name
    }
    pub fn status(&self) -> ChannelStatus {
        *self.status.read().unwrap()
    }
    pub fn set_status(&self, status: ChannelStatus) {
        *self.status.write().unwrap() = status;
    }
    pub fn options(&self) -> ChannelOptions {
        self.options.read().unwrap().clone()
    }
    pub fn reference(&self) -> ChannelRef {
        ChannelRef {
            inner: Arc::downgrade(&self.inner),
        }
    }
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }

    pub fn info(&self) -> ChannelInfo {
        let options = self.options();
        ChannelInfo {
            name: self.name.to_string(),
            topic: options.topic,
            status: self.status(),
            subscriber_count: self.subscriber_count(),
        }
    }

    fn emit(&self, event_type: EventType, headers: Vec<(String, String)>) {
        if let Some(broker) = self.broker.upgrade() {
            broker
                .events()
                .trigger(event_type, self.name.to_string(), headers);
        }
    }

    pub async fn subscribe(&self, client: &Client) -> crate::Result<Arc<ChannelClient>> {
        if self.status() == ChannelStatus::Destroyed {
            return Err(crate::Error::new(
                "channel subscribe",
                crate::error::ErrorKind::Destroyed,
            ));
        }
        let subscription = {
            let mut subscribers = self.subscribers.write().unwrap();
            if let Some(existing) = subscribers
                .iter()
                .find(|cc| cc.client().is_some_and(|c| c.id() == client.id()))
            {
                return Ok(existing.clone());
            }
            let limit = self.options.read().unwrap().client_limit;
            if limit > 0 && subscribers.len() >= limit {
                return Err(crate::Error::new(
                    "channel subscribe",
                    crate::error::ErrorKind::LimitExceeded,
                ));
            }
            let subscription = Arc::new(ChannelClient {
                channel: self.reference(),
                client: client.reference(),
                joined_at: Utc::now(),
            });
            subscribers.push(subscription.clone());
            subscription
        };
        client.add_channel_subscription(subscription.clone());
        self.emit(
            EventType::ChannelSubscribed,
            vec![(headers::CLIENT_ID.to_string(), client.id().to_string())],
        );
        Ok(subscription)
    }

    pub async fn remove_client(&self, client: &Client) -> bool {
        let removed = {
            let mut subscribers = self.subscribers.write().unwrap();
            let mut removed = None;
            subscribers.retain(|cc| match cc.client() {
                None => false,
                Some(c) if c.id() == client.id() => {
                    removed = Some(cc.clone());
                    false
                }
                Some(_) => true,
            });
            removed
        };
        let Some(subscription) = removed else {
            return false;
        };
        client.remove_channel_subscription(&subscription);
        self.emit(
            EventType::ChannelUnsubscribed,
            vec![(headers::CLIENT_ID.to_string(), client.id().to_string())],
        );
        if self.options.read().unwrap().auto_destroy_idle
            && self.subscribers.read().unwrap().is_empty()
        {
            if let Some(broker) = self.broker.upgrade() {
                broker.remove_channel(self.name()).await;
            }
        }
        true
    }

    /// Fire-and-forget broadcast. The subscriber set is snapshotted before
    /// any I/O so the lock is never held across a send.
    #[tracing::instrument(skip_all, fields(channel = %self.name()))]
    pub async fn push(&self, mut message: Message) -> PushResult {
        match self.status() {
            ChannelStatus::Running => {}
            _ => return PushResult::StatusNotSupported,
        }
        let size_limit = self.options.read().unwrap().message_size_limit;
        if size_limit > 0 && message.payload.len() > size_limit {
            return PushResult::LimitExceeded;
        }
        headers::strip_internal(&mut message.headers);
        let subscribers = self.subscribers.read().unwrap().clone();
        for subscriber in subscribers {
            let Some(client) = subscriber.client() else {
                continue;
            };
            if !client.is_connected() {
                continue;
            }
            client.send(&message).await;
        }
        self.emit(EventType::ChannelPublished, Vec::new());
        PushResult::Success
    }

    pub async fn destroy(&self) {
        {
            let mut status = self.status.write().unwrap();
            if *status == ChannelStatus::Destroyed {
                return;
            }
            *status = ChannelStatus::Destroyed;
        }
        let subscriptions: Vec<_> = self.subscribers.write().unwrap().drain(..).collect();
        for subscription in subscriptions {
            if let Some(client) = subscription.client() {
                client.remove_channel_subscription(&subscription);
            }
        }
    }
}
