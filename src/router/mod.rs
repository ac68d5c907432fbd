pub mod binding;

use std::{
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock, Weak,
    },
};

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::{
    broker::{Broker, BrokerRef},
    client::Client,
    protocol::{EntityName, Message},
};

pub use binding::{
    Binding, BindingDefinition, BindingInteraction, BindingRegistry, DirectBinding, QueueBinding,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[typeshare]
pub enum RouteMethod {
    /// Every binding gets the message.
    #[default]
    Distribute,
    /// First binding that takes it wins, in priority order.
    OnlyFirst,
    /// Circular cursor over the bindings, one per publish.
    RoundRobin,
}

impl RouteMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "distribute" => Some(RouteMethod::Distribute),
            "only-first" | "onlyfirst" => Some(RouteMethod::OnlyFirst),
            "roundrobin" | "round-robin" => Some(RouteMethod::RoundRobin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterPublishResult {
    Disabled,
    NoBindings,
    NoReceivers,
    /// Delivered somewhere that will produce a response; the producer
    /// should keep waiting.
    OkAndWillRespond,
    OkNoRespond,
}

/// The persisted shape of a router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[typeshare]
pub struct RouterDefinition {
    pub name: String,
    pub method: RouteMethod,
    pub is_enabled: bool,
    pub bindings: Vec<BindingDefinition>,
}

pub struct RouterInner {
    name: EntityName,
    broker: BrokerRef,
    method: RouteMethod,
    enabled: AtomicBool,
    bindings: RwLock<Vec<Arc<dyn Binding>>>,
    cursor: Mutex<usize>,
}

impl std::fmt::Debug for RouterInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Deref for Router {
    type Target = RouterInner;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouterRef {
    inner: Weak<RouterInner>,
}

impl RouterRef {
    pub fn upgrade(&self) -> Option<Router> {
        self.inner.upgrade().map(|inner| Router { inner })
    }
}

impl Router {
    pub(crate) fn new(broker: BrokerRef, name: EntityName, method: RouteMethod) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                name,
                broker,
                method,
                enabled: AtomicBool::new(true),
                bindings: RwLock::new(Vec::new()),
                cursor: Mutex::new(0),
            }),
        }
    }

    pub fn name(&self) -> &EntityName {
        &self.name
    }
    pub fn method(&self) -> RouteMethod {
        self.method
    }
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
    pub fn reference(&self) -> RouterRef {
        RouterRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Insert keeping priority-descending order; equal priorities keep
    /// their insertion order. Binding names are unique per router.
    pub fn add_binding(&self, binding: Arc<dyn Binding>) -> bool {
        let mut bindings = self.bindings.write().unwrap();
        if bindings.iter().any(|b| b.name() == binding.name()) {
            return false;
        }
        let at = bindings
            .iter()
            .position(|b| b.priority() < binding.priority())
            .unwrap_or(bindings.len());
        bindings.insert(at, binding);
        true
    }

    pub fn remove_binding(&self, name: &str) -> bool {
        let mut bindings = self.bindings.write().unwrap();
        let before = bindings.len();
        bindings.retain(|b| b.name() != name);
        bindings.len() != before
    }

    pub fn binding_snapshot(&self) -> Vec<Arc<dyn Binding>> {
        self.bindings.read().unwrap().clone()
    }

    pub fn definition(&self) -> RouterDefinition {
        RouterDefinition {
            name: self.name.to_string(),
            method: self.method,
            is_enabled: self.is_enabled(),
            bindings: self
                .binding_snapshot()
                .iter()
                .map(|b| b.definition().clone())
                .collect(),
        }
    }

    #[tracing::instrument(skip_all, fields(router = %self.name()))]
    pub async fn publish(
        &self,
        sender: Option<&Client>,
        message: Message,
    ) -> RouterPublishResult {
        if !self.is_enabled() {
            return RouterPublishResult::Disabled;
        }
        let bindings = self.binding_snapshot();
        if bindings.is_empty() {
            return RouterPublishResult::NoBindings;
        }
        let Some(broker) = self.broker.upgrade() else {
            return RouterPublishResult::NoReceivers;
        };
        match self.method {
            RouteMethod::Distribute => {
                self.publish_distribute(&broker, sender, &message, &bindings)
                    .await
            }
            RouteMethod::OnlyFirst => {
                self.publish_only_first(&broker, sender, &message, &bindings)
                    .await
            }
            RouteMethod::RoundRobin => {
                self.publish_round_robin(&broker, sender, &message, &bindings)
                    .await
            }
        }
    }

    async fn publish_distribute(
        &self,
        broker: &Broker,
        sender: Option<&Client>,
        message: &Message,
        bindings: &[Arc<dyn Binding>],
    ) -> RouterPublishResult {
        let mut delivered = false;
        let mut will_respond = false;
        for binding in bindings {
            // each binding works on its own copy of the frame, so a
            // Response interaction cannot leak wait flags across bindings
            if binding.send(broker, sender, message).await {
                delivered = true;
                if binding.interaction() != BindingInteraction::None {
                    will_respond = true;
                }
            }
        }
        if will_respond {
            RouterPublishResult::OkAndWillRespond
        } else if delivered {
            RouterPublishResult::OkNoRespond
        } else {
            RouterPublishResult::NoReceivers
        }
    }

    async fn publish_only_first(
        &self,
        broker: &Broker,
        sender: Option<&Client>,
        message: &Message,
        bindings: &[Arc<dyn Binding>],
    ) -> RouterPublishResult {
        for binding in bindings {
            if binding.send(broker, sender, message).await {
                return if binding.interaction() != BindingInteraction::None {
                    RouterPublishResult::OkAndWillRespond
                } else {
                    RouterPublishResult::OkNoRespond
                };
            }
        }
        RouterPublishResult::NoReceivers
    }

    async fn publish_round_robin(
        &self,
        broker: &Broker,
        sender: Option<&Client>,
        message: &Message,
        bindings: &[Arc<dyn Binding>],
    ) -> RouterPublishResult {
        for _attempt in 0..bindings.len() {
            let index = {
                let mut cursor = self.cursor.lock().unwrap();
                let index = *cursor % bindings.len();
                *cursor = index + 1;
                index
            };
            let binding = &bindings[index];
            if binding.send(broker, sender, message).await {
                return if binding.interaction() != BindingInteraction::None {
                    RouterPublishResult::OkAndWillRespond
                } else {
                    RouterPublishResult::OkNoRespond
                };
            }
        }
        RouterPublishResult::NoReceivers
    }
}
