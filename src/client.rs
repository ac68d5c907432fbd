use std::{
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock, Weak,
    },
};

use chrono::{DateTime, Utc};

use crate::{
    channel::ChannelClient,
    connection::Connection,
    protocol::{ClientId, Message},
    queue::QueueClient,
};

#[derive(Debug)]
pub struct ClientInner {
    unique_id: ClientId,
    name: RwLock<String>,
    client_type: RwLock<String>,
    is_authenticated: AtomicBool,
    connection: Connection,
    connected_at: DateTime<Utc>,
    pub(crate) queue_subscriptions: RwLock<Vec<Arc<QueueClient>>>,
    pub(crate) channel_subscriptions: RwLock<Vec<Arc<ChannelClient>>>,
}

/// A connected peer. Cheap to clone; registries hold the strong handle,
/// subscriptions hold [`ClientRef`] back-references.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.unique_id)
            .field("name", &self.name())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Deref for Client {
    type Target = ClientInner;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientRef {
    inner: Weak<ClientInner>,
}

impl ClientRef {
    pub fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client { inner })
    }
}

impl Client {
    pub fn new(unique_id: ClientId, connection: Connection) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                unique_id,
                name: RwLock::new(String::new()),
                client_type: RwLock::new(String::new()),
                is_authenticated: AtomicBool::new(false),
                connection,
                connected_at: Utc::now(),
                queue_subscriptions: RwLock::new(Vec::new()),
                channel_subscriptions: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.unique_id
    }
    pub fn name(&self) -> String {
        self.name.read().unwrap().clone()
    }
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap() = name.into();
    }
    pub fn client_type(&self) -> String {
        self.client_type.read().unwrap().clone()
    }
    pub fn set_client_type(&self, client_type: impl Into<String>) {
        *self.client_type.write().unwrap() = client_type.into();
    }
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated.load(Ordering::Acquire)
    }
    pub fn set_authenticated(&self, value: bool) {
        self.is_authenticated.store(value, Ordering::Release);
    }
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }
    pub fn reference(&self) -> ClientRef {
        ClientRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Hand a frame to the peer. Send failures are not the pipeline's
    /// failure; they surface as `false` and the caller decides.
    pub async fn send(&self, frame: &Message) -> bool {
        match self.connection.send(frame.clone()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!(client = %self.unique_id, error = %e, "send failed");
                false
            }
        }
    }

    pub(crate) fn add_queue_subscription(&self, subscription: Arc<QueueClient>) {
        self.queue_subscriptions.write().unwrap().push(subscription);
    }
    pub(crate) fn remove_queue_subscription(&self, subscription: &Arc<QueueClient>) {
        self.queue_subscriptions
            .write()
            .unwrap()
            .retain(|s| !Arc::ptr_eq(s, subscription));
    }
    pub(crate) fn queue_subscription_snapshot(&self) -> Vec<Arc<QueueClient>> {
        self.queue_subscriptions.read().unwrap().clone()
    }
    pub(crate) fn add_channel_subscription(&self, subscription: Arc<ChannelClient>) {
        self.channel_subscriptions
            .write()
            .unwrap()
            .push(subscription);
    }
    pub(crate) fn remove_channel_subscription(&self, subscription: &Arc<ChannelClient>) {
        self.channel_subscriptions
            .write()
            .unwrap()
            .retain(|s| !Arc::ptr_eq(s, subscription));
    }
    pub(crate) fn channel_subscription_snapshot(&self) -> Vec<Arc<ChannelClient>> {
        self.channel_subscriptions.read().unwrap().clone()
    }
}
