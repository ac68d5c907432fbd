use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use typeshare::typeshare;

use crate::{
    broker::Broker,
    client::Client,
    protocol::{EntityName, Message, MessageKind},
    queue::PushResult,
};

use super::RouteMethod;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[typeshare]
pub enum BindingInteraction {
    #[default]
    None,
    Ack,
    Response,
}

/// The persisted shape of a binding. `kind` is the stable tag the registry
/// resolves to a constructor: `"queue"`, `"direct"`, or whatever the host
/// registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[typeshare]
pub struct BindingDefinition {
    pub name: String,
    pub kind: String,
    pub target: String,
    pub priority: i32,
    #[serde(default)]
    pub interaction: BindingInteraction,
    #[serde(default)]
    pub method: Option<RouteMethod>,
    #[serde(default)]
    pub content_type: Option<u16>,
}

/// A router's rule for re-targeting a published message. `send` returns
/// whether at least one receiver took the message.
pub trait Binding: Send + Sync + 'static {
    fn definition(&self) -> &BindingDefinition;
    fn send<'a>(
        &'a self,
        broker: &'a Broker,
        sender: Option<&'a Client>,
        message: &'a Message,
    ) -> BoxFuture<'a, bool>;

    fn name(&self) -> &str {
        &self.definition().name
    }
    fn priority(&self) -> i32 {
        self.definition().priority
    }
    fn interaction(&self) -> BindingInteraction {
        self.definition().interaction
    }
}

/// Re-targets into a queue by name.
pub struct QueueBinding {
    definition: BindingDefinition,
    queue_name: EntityName,
}

impl QueueBinding {
    pub fn new(definition: BindingDefinition) -> crate::Result<Self> {
        let queue_name = EntityName::new(&definition.target)?;
        Ok(Self {
            definition,
            queue_name,
        })
    }
}

impl Binding for QueueBinding {
    fn definition(&self) -> &BindingDefinition {
        &self.definition
    }

    fn send<'a>(
        &'a self,
        broker: &'a Broker,
        sender: Option<&'a Client>,
        message: &'a Message,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let Some(queue) = broker.get_or_create_queue(&self.queue_name).await else {
                return false;
            };
            let mut copy = message.clone();
            copy.kind = MessageKind::QueueMessage;
            copy.target = self.queue_name.to_string();
            if let Some(content_type) = self.definition.content_type {
                copy.content_type = content_type;
            }
            if self.definition.interaction == BindingInteraction::Response {
                copy.wait_response = true;
            }
            queue.push(copy, sender).await == PushResult::Success
        })
    }
}

const RECEIVER_CACHE_TTL: Duration = Duration::from_secs(1);

/// Re-targets straight at clients: a concrete id, or the `@name:` /
/// `@type:` selector prefixes matching many. Resolution is cached for a
/// second; the cache is consulted under its own lock.
pub struct DirectBinding {
    definition: BindingDefinition,
    cursor: Mutex<usize>,
    cache: Mutex<Option<(Instant, Vec<Client>)>>,
}

impl DirectBinding {
    pub fn new(definition: BindingDefinition) -> crate::Result<Self> {
        if definition.target.trim().is_empty() {
            return Err(crate::Error::new(
                "direct binding",
                crate::error::ErrorKind::InvalidName,
            ));
        }
        Ok(Self {
            definition,
            cursor: Mutex::new(0),
            cache: Mutex::new(None),
        })
    }

    fn resolve(&self, broker: &Broker) -> Vec<Client> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some((at, receivers)) = cache.as_ref() {
                if at.elapsed() < RECEIVER_CACHE_TTL {
                    return receivers.clone();
                }
            }
        }
        let target = self.definition.target.as_str();
        let receivers = if let Some(name) = target.strip_prefix("@name:") {
            broker.clients_by_name(name)
        } else if let Some(client_type) = target.strip_prefix("@type:") {
            broker.clients_by_type(client_type)
        } else {
            broker.get_client(target).into_iter().collect()
        };
        *self.cache.lock().unwrap() = Some((Instant::now(), receivers.clone()));
        receivers
    }

    fn route_method(&self) -> RouteMethod {
        self.definition.method.unwrap_or(RouteMethod::Distribute)
    }

    fn prepare(&self, message: &Message, receiver: &Client) -> Message {
        let mut copy = message.clone();
        copy.kind = MessageKind::DirectMessage;
        copy.target = receiver.id().to_string();
        if let Some(content_type) = self.definition.content_type {
            copy.content_type = content_type;
        }
        if self.definition.interaction == BindingInteraction::Response {
            copy.wait_response = true;
        }
        copy
    }
}

impl Binding for DirectBinding {
    fn definition(&self) -> &BindingDefinition {
        &self.definition
    }

    fn send<'a>(
        &'a self,
        broker: &'a Broker,
        _sender: Option<&'a Client>,
        message: &'a Message,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let receivers: Vec<Client> = self
                .resolve(broker)
                .into_iter()
                .filter(Client::is_connected)
                .collect();
            if receivers.is_empty() {
                return false;
            }
            match self.route_method() {
                RouteMethod::OnlyFirst => {
                    for receiver in &receivers {
                        if receiver.send(&self.prepare(message, receiver)).await {
                            return true;
                        }
                    }
                    false
                }
                RouteMethod::Distribute => {
                    let mut delivered = false;
                    for receiver in &receivers {
                        if receiver.send(&self.prepare(message, receiver)).await {
                            delivered = true;
                        }
                    }
                    delivered
                }
                RouteMethod::RoundRobin => {
                    let index = {
                        let mut cursor = self.cursor.lock().unwrap();
                        let index = *cursor % receivers.len();
                        *cursor = index + 1;
                        index
                    };
                    let receiver = &receivers[index];
                    receiver.send(&self.prepare(message, receiver)).await
                }
            }
        })
    }
}

type BindingConstructor =
    dyn Fn(BindingDefinition) -> crate::Result<Arc<dyn Binding>> + Send + Sync;

/// Tag → constructor map used when loading the persisted routers-file.
/// Unknown tags are skipped by the loader with a warning.
#[derive(Clone)]
pub struct BindingRegistry {
    constructors: Arc<RwLock<HashMap<String, Arc<BindingConstructor>>>>,
}

impl std::fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<String> = self.constructors.read().unwrap().keys().cloned().collect();
        f.debug_struct("BindingRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl Default for BindingRegistry {
    fn default() -> Self {
        let registry = Self {
            constructors: Arc::new(RwLock::new(HashMap::new())),
        };
        registry.register("queue", |definition| {
            Ok(Arc::new(QueueBinding::new(definition)?))
        });
        registry.register("direct", |definition| {
            Ok(Arc::new(DirectBinding::new(definition)?))
        });
        registry
    }
}

impl BindingRegistry {
    pub fn register(
        &self,
        kind: impl Into<String>,
        constructor: impl Fn(BindingDefinition) -> crate::Result<Arc<dyn Binding>>
            + Send
            + Sync
            + 'static,
    ) {
        self.constructors
            .write()
            .unwrap()
            .insert(kind.into(), Arc::new(constructor));
    }

    pub fn build(&self, definition: BindingDefinition) -> Option<crate::Result<Arc<dyn Binding>>> {
        let constructor = self
            .constructors
            .read()
            .unwrap()
            .get(&definition.kind)
            .cloned()?;
        Some(constructor(definition))
    }
}
