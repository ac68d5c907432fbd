pub mod config;
pub mod event;

use std::{
    collections::HashMap,
    ops::Deref,
    sync::{Arc, Weak},
};

use crossbeam::sync::ShardedLock;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::AuthorizationService,
    channel::{Channel, ChannelOptions},
    client::Client,
    cluster::ClusterService,
    connection::Connection,
    error::ErrorKind,
    protocol::{ClientId, EntityName, IdGenerator, MessageId, SnowflakeIdGenerator},
    queue::{DeliveryHandlerRegistry, Queue, QueueOptions},
    router::{BindingRegistry, RouteMethod, Router},
};

use config::{ConfigRepositoryService, QueueDefinition};
use event::{EventHub, EventType};

pub struct BrokerConfig {
    pub name: String,
    pub id_generator: Arc<dyn IdGenerator>,
    pub config_repository: Option<ConfigRepositoryService>,
    pub cluster: Option<ClusterService>,
    pub admin_authorization: Vec<AuthorizationService>,
    pub client_authorization: Vec<AuthorizationService>,
    pub delivery_handlers: DeliveryHandlerRegistry,
    pub bindings: BindingRegistry,
    pub auto_queue_creation: bool,
    pub auto_channel_creation: bool,
    pub default_queue_options: QueueOptions,
    pub default_channel_options: ChannelOptions,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: "comet".to_string(),
            id_generator: Arc::new(SnowflakeIdGenerator),
            config_repository: None,
            cluster: None,
            admin_authorization: Vec::new(),
            client_authorization: Vec::new(),
            delivery_handlers: DeliveryHandlerRegistry::default(),
            bindings: BindingRegistry::default(),
            auto_queue_creation: true,
            auto_channel_creation: true,
            default_queue_options: QueueOptions::default(),
            default_channel_options: ChannelOptions::default(),
        }
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("name", &self.name)
            .field("cluster", &self.cluster)
            .field("auto_queue_creation", &self.auto_queue_creation)
            .field("auto_channel_creation", &self.auto_channel_creation)
            .finish()
    }
}

pub struct BrokerInner {
    config: BrokerConfig,
    queues: ShardedLock<HashMap<EntityName, Queue>>,
    routers: ShardedLock<HashMap<EntityName, Router>>,
    channels: ShardedLock<HashMap<EntityName, Channel>>,
    clients: ShardedLock<HashMap<ClientId, Client>>,
    events: EventHub,
    ct: CancellationToken,
}

/// The engine's root handle: name → entity registries, the client table,
/// the event hub, and every pluggable service the pipelines consult.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("name", &self.config.name)
            .field("queues", &self.queues.read().unwrap().len())
            .field("clients", &self.clients.read().unwrap().len())
            .finish()
    }
}

impl Deref for Broker {
    type Target = BrokerInner;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Clone, Default)]
pub struct BrokerRef {
    inner: Weak<BrokerInner>,
}

impl BrokerRef {
    pub fn upgrade(&self) -> Option<Broker> {
        self.inner.upgrade().map(|inner| Broker { inner })
    }
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                config,
                queues: ShardedLock::new(HashMap::new()),
                routers: ShardedLock::new(HashMap::new()),
                channels: ShardedLock::new(HashMap::new()),
                clients: ShardedLock::new(HashMap::new()),
                events: EventHub::new(),
                ct: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
    pub fn events(&self) -> &EventHub {
        &self.events
    }
    pub fn cluster(&self) -> Option<ClusterService> {
        self.config.cluster.clone()
    }
    pub fn reference(&self) -> BrokerRef {
        BrokerRef {
            inner: Arc::downgrade(&self.inner),
        }
    }
    pub fn next_message_id(&self) -> MessageId {
        self.config.id_generator.next_id()
    }

    pub async fn shutdown(&self) {
        self.ct.cancel();
        let queues: Vec<Queue> = self.queues.write().unwrap().drain().map(|(_, q)| q).collect();
        for queue in queues {
            queue.destroy().await;
        }
        let channels: Vec<Channel> = self
            .channels
            .write()
            .unwrap()
            .drain()
            .map(|(_, c)| c)
            .collect();
        for channel in channels {
            channel.destroy().await;
        }
        tracing::info!(broker = %self.config.name, "broker shut down");
    }

    // ------------------------------------------------------------------
    // clients
    // ------------------------------------------------------------------

    /// Register a connected peer. When no id is brought along one is
    /// generated.
    pub fn connect_client(&self, id: Option<ClientId>, connection: Connection) -> Client {
        let id = id.unwrap_or_else(|| ClientId::new(self.next_message_id().to_base64()));
        let client = Client::new(id.clone(), connection);
        self.clients.write().unwrap().insert(id.clone(), client.clone());
        self.events
            .trigger(EventType::ClientConnected, id.to_string(), Vec::new());
        client
    }

    /// Synchronous teardown: the client leaves every queue and channel it
    /// joined before this returns.
    pub async fn disconnect_client(&self, client: &Client) {
        self.clients.write().unwrap().remove(client.id());
        client.connection().close();
        for subscription in client.queue_subscription_snapshot() {
            if let Some(queue) = subscription.queue() {
                queue.remove_client(client).await;
            }
        }
        for subscription in client.channel_subscription_snapshot() {
            if let Some(channel) = subscription.channel() {
                channel.remove_client(client).await;
            }
        }
        self.events.trigger(
            EventType::ClientDisconnected,
            client.id().to_string(),
            Vec::new(),
        );
    }

    pub fn get_client(&self, id: &str) -> Option<Client> {
        self.clients.read().unwrap().get(id).cloned()
    }
    pub fn clients_by_name(&self, name: &str) -> Vec<Client> {
        self.clients
            .read()
            .unwrap()
            .values()
            .filter(|c| c.name() == name)
            .cloned()
            .collect()
    }
    pub fn clients_by_type(&self, client_type: &str) -> Vec<Client> {
        self.clients
            .read()
            .unwrap()
            .values()
            .filter(|c| c.client_type() == client_type)
            .cloned()
            .collect()
    }
    pub fn client_count(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    // ------------------------------------------------------------------
    // queues
    // ------------------------------------------------------------------

    pub fn create_queue(
        &self,
        name: EntityName,
        options: QueueOptions,
    ) -> crate::Result<Queue> {
        let queue = {
            let mut queues = self.queues.write().unwrap();
            if queues.contains_key(&name) {
                return Err(crate::Error::new("create queue", ErrorKind::Duplicate));
            }
            let queue = Queue::new(self.reference(), name.clone(), options);
            queues.insert(name.clone(), queue.clone());
            queue
        };
        self.events
            .trigger(EventType::QueueCreated, name.to_string(), Vec::new());
        self.persist_topology();
        queue
            .emit_created_to_cluster();
        Ok(queue)
    }

    pub fn get_queue(&self, name: &EntityName) -> Option<Queue> {
        self.queues.read().unwrap().get(name).cloned()
    }

    /// Lookup with auto-creation when the config allows it.
    pub async fn get_or_create_queue(&self, name: &EntityName) -> Option<Queue> {
        if let Some(queue) = self.get_queue(name) {
            return Some(queue);
        }
        if !self.config.auto_queue_creation {
            return None;
        }
        match self.create_queue(name.clone(), self.config.default_queue_options.clone()) {
            Ok(queue) => Some(queue),
            // lost a create race; somebody else won
            Err(_) => self.get_queue(name),
        }
    }

    pub async fn remove_queue(&self, name: &EntityName) -> bool {
        let Some(queue) = self.queues.write().unwrap().remove(name) else {
            return false;
        };
        queue.destroy().await;
        self.events
            .trigger(EventType::QueueRemoved, name.to_string(), Vec::new());
        self.persist_topology();
        if let Some(cluster) = self.cluster() {
            if let Err(e) = cluster.send_queue_removed(name.clone()).await {
                tracing::warn!(error = %e, "cluster queue-removed notice failed");
            }
        }
        true
    }

    pub fn queue_list(&self) -> Vec<Queue> {
        self.queues.read().unwrap().values().cloned().collect()
    }

    /// Called after a queue's options changed: persist and tell the
    /// cluster.
    pub async fn notify_queue_updated(&self, name: &EntityName) {
        self.persist_topology();
        if let Some(cluster) = self.cluster() {
            if let Err(e) = cluster.send_queue_updated(name.clone()).await {
                tracing::warn!(error = %e, "cluster queue-updated notice failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // routers
    // ------------------------------------------------------------------

    pub fn create_router(&self, name: EntityName, method: RouteMethod) -> crate::Result<Router> {
        let router = {
            let mut routers = self.routers.write().unwrap();
            if routers.contains_key(&name) {
                return Err(crate::Error::new("create router", ErrorKind::Duplicate));
            }
            let router = Router::new(self.reference(), name.clone(), method);
            routers.insert(name.clone(), router.clone());
            router
        };
        self.events
            .trigger(EventType::RouterCreated, name.to_string(), Vec::new());
        self.persist_topology();
        Ok(router)
    }

    pub fn get_router(&self, name: &EntityName) -> Option<Router> {
        self.routers.read().unwrap().get(name).cloned()
    }

    pub fn remove_router(&self, name: &EntityName) -> bool {
        if self.routers.write().unwrap().remove(name).is_none() {
            return false;
        }
        self.events
            .trigger(EventType::RouterRemoved, name.to_string(), Vec::new());
        self.persist_topology();
        true
    }

    pub fn router_list(&self) -> Vec<Router> {
        self.routers.read().unwrap().values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // channels
    // ------------------------------------------------------------------

    pub fn create_channel(
        &self,
        name: EntityName,
        options: ChannelOptions,
    ) -> crate::Result<Channel> {
        let channel = {
            let mut channels = self.channels.write().unwrap();
            if channels.contains_key(&name) {
                return Err(crate::Error::new("create channel", ErrorKind::Duplicate));
            }
            let channel = Channel::new(self.reference(), name.clone(), options);
            channels.insert(name.clone(), channel.clone());
            channel
        };
        self.events
            .trigger(EventType::ChannelCreated, name.to_string(), Vec::new());
        Ok(channel)
    }

    pub fn get_channel(&self, name: &EntityName) -> Option<Channel> {
        self.channels.read().unwrap().get(name).cloned()
    }

    pub async fn get_or_create_channel(&self, name: &EntityName) -> Option<Channel> {
        if let Some(channel) = self.get_channel(name) {
            return Some(channel);
        }
        if !self.config.auto_channel_creation {
            return None;
        }
        match self.create_channel(name.clone(), self.config.default_channel_options.clone()) {
            Ok(channel) => Some(channel),
            Err(_) => self.get_channel(name),
        }
    }

    pub async fn remove_channel(&self, name: &EntityName) -> bool {
        let Some(channel) = self.channels.write().unwrap().remove(name) else {
            return false;
        };
        channel.destroy().await;
        self.events
            .trigger(EventType::ChannelRemoved, name.to_string(), Vec::new());
        true
    }

    pub fn channel_list(&self) -> Vec<Channel> {
        self.channels.read().unwrap().values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // persisted topology
    // ------------------------------------------------------------------

    /// Best-effort write of both topology files off the hot path.
    pub(crate) fn persist_topology(&self) {
        let Some(repository) = self.config.config_repository.clone() else {
            return;
        };
        let queues: Vec<QueueDefinition> = self
            .queue_list()
            .iter()
            .map(|q| QueueDefinition {
                name: q.name().to_string(),
                options: q.options(),
            })
            .collect();
        let routers: Vec<_> = self.router_list().iter().map(Router::definition).collect();
        tokio::spawn(async move {
            if let Err(e) = repository.save_queues(queues).await {
                tracing::warn!(error = %e, "queues-file write failed");
            }
            if let Err(e) = repository.save_routers(routers).await {
                tracing::warn!(error = %e, "routers-file write failed");
            }
        });
    }

    /// Rebuild queues and routers from the persisted files. Bindings with
    /// an unknown kind tag are skipped with a warning.
    pub async fn load_topology(&self) -> crate::Result<()> {
        let Some(repository) = self.config.config_repository.clone() else {
            return Ok(());
        };
        for definition in repository.load_queues().await? {
            let name = EntityName::new(&definition.name)?;
            if self.get_queue(&name).is_some() {
                continue;
            }
            let _ = self.create_queue(name, definition.options);
        }
        for definition in repository.load_routers().await? {
            let name = EntityName::new(&definition.name)?;
            if self.get_router(&name).is_some() {
                continue;
            }
            let router = self.create_router(name, definition.method)?;
            router.set_enabled(definition.is_enabled);
            for binding_def in definition.bindings {
                let kind = binding_def.kind.clone();
                let binding_name = binding_def.name.clone();
                match self.config.bindings.build(binding_def) {
                    Some(Ok(binding)) => {
                        router.add_binding(binding);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(binding = %binding_name, error = %e, "binding skipped");
                    }
                    None => {
                        tracing::warn!(binding = %binding_name, kind = %kind, "unknown binding kind, skipped");
                    }
                }
            }
        }
        Ok(())
    }
}

impl Queue {
    fn emit_created_to_cluster(&self) {
        let Some(broker) = self.broker() else {
            return;
        };
        let Some(cluster) = broker.cluster() else {
            return;
        };
        let name = self.name().clone();
        tokio::spawn(async move {
            if let Err(e) = cluster.send_queue_updated(name).await {
                tracing::warn!(error = %e, "cluster queue-created notice failed");
            }
        });
    }
}
