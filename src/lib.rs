pub mod auth;
pub mod broker;
pub mod channel;
pub mod client;
pub mod cluster;
pub mod connection;
mod dispatch;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod router;
pub(crate) mod util;

pub use bytes;
pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod prelude {
    pub use crate::auth::{Authorization, AuthorizationService};
    pub use crate::broker::{
        config::{ConfigRepository, ConfigRepositoryService, FileConfigRepository, QueueDefinition},
        event::{BrokerEvent, EventSink, EventType},
        Broker, BrokerConfig, BrokerRef,
    };
    pub use crate::channel::{Channel, ChannelClient, ChannelInfo, ChannelOptions, ChannelStatus};
    pub use crate::client::{Client, ClientRef};
    pub use crate::cluster::{ClusterCoordinator, ClusterMode, ClusterService, NodeState};
    pub use crate::connection::{Connection, Transport};
    pub use crate::protocol::{
        headers, operations, results, ClientId, EntityName, HeaderMap, IdGenerator, Message,
        MessageId, MessageKind, SnowflakeIdGenerator,
    };
    pub use crate::queue::{
        AckDecision, AcknowledgeStatus, AutoDestroy, Decision, DecisionTransmission,
        DefaultDeliveryHandler, DeliveryHandler, DeliveryHandlerBuildContext,
        DeliveryHandlerRegistry, DeliveryHandlerService, DeliveryTracker, MessageDelivery,
        MessageLimitPolicy, MessageStore, PullResult, PushResult, PutBack, Queue, QueueClient,
        QueueInfo, QueueMessage, QueueOptions, QueueStatus, QueueType,
    };
    pub use crate::router::{
        Binding, BindingDefinition, BindingInteraction, BindingRegistry, DirectBinding,
        QueueBinding, RouteMethod, Router, RouterDefinition, RouterPublishResult, RouterRef,
    };
}
