//! Replication hook. The engine tells the coordinator what happened at
//! well-defined points of the queue pipeline; the transport between broker
//! nodes is somebody else's problem.

use std::{borrow::Cow, future::Future, sync::Arc};

use crate::protocol::{EntityName, Message, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Main,
    Successor,
    Replica,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMode {
    Standalone,
    Reliable,
}

#[derive(Debug)]
pub struct ClusterError {
    pub context: Cow<'static, str>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ClusterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClusterError: {}", self.context)?;
        if let Some(source) = &self.source {
            write!(f, " with source: {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ClusterError {}

impl ClusterError {
    pub fn new(context: &'static str) -> Self {
        Self {
            context: context.into(),
            source: None,
        }
    }
    pub fn with_source(
        context: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

pub trait ClusterCoordinator: Send + Sync + 'static {
    fn state(&self) -> NodeState;
    fn mode(&self) -> ClusterMode;
    fn send_queue_message(
        &self,
        queue: EntityName,
        message: Message,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;
    fn send_put_back(
        &self,
        queue: EntityName,
        message: Message,
        priority: bool,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;
    fn send_message_removal(
        &self,
        queue: EntityName,
        message_id: MessageId,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;
    fn send_queue_updated(&self, queue: EntityName)
        -> impl Future<Output = Result<(), ClusterError>> + Send;
    fn send_queue_removed(&self, queue: EntityName)
        -> impl Future<Output = Result<(), ClusterError>> + Send;
}

#[derive(Clone)]
pub struct ClusterService {
    provider: Cow<'static, str>,
    inner: Arc<dyn sealed::BoxedCoordinator>,
}

impl std::fmt::Debug for ClusterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterService")
            .field("provider", &self.provider)
            .finish()
    }
}

impl ClusterService {
    pub fn new<T>(inner: T) -> Self
    where
        T: ClusterCoordinator,
    {
        Self {
            provider: std::any::type_name::<T>().into(),
            inner: Arc::new(inner),
        }
    }
    pub fn state(&self) -> NodeState {
        self.inner.state()
    }
    pub fn mode(&self) -> ClusterMode {
        self.inner.mode()
    }
    /// True when this node is the main of a reliable cluster, i.e. the one
    /// that must replicate producer writes before accepting them.
    pub fn is_reliable_main(&self) -> bool {
        self.mode() == ClusterMode::Reliable && self.state() == NodeState::Main
    }
    pub async fn send_queue_message(
        &self,
        queue: EntityName,
        message: Message,
    ) -> Result<(), ClusterError> {
        self.inner.send_queue_message(queue, message).await
    }
    pub async fn send_put_back(
        &self,
        queue: EntityName,
        message: Message,
        priority: bool,
    ) -> Result<(), ClusterError> {
        self.inner.send_put_back(queue, message, priority).await
    }
    pub async fn send_message_removal(
        &self,
        queue: EntityName,
        message_id: MessageId,
    ) -> Result<(), ClusterError> {
        self.inner.send_message_removal(queue, message_id).await
    }
    pub async fn send_queue_updated(&self, queue: EntityName) -> Result<(), ClusterError> {
        self.inner.send_queue_updated(queue).await
    }
    pub async fn send_queue_removed(&self, queue: EntityName) -> Result<(), ClusterError> {
        self.inner.send_queue_removed(queue).await
    }
}

mod sealed {
    use futures_util::future::BoxFuture;

    use super::{ClusterCoordinator, ClusterError, ClusterMode, NodeState};
    use crate::protocol::{EntityName, Message, MessageId};

    pub(super) trait BoxedCoordinator: Send + Sync {
        fn state(&self) -> NodeState;
        fn mode(&self) -> ClusterMode;
        fn send_queue_message(
            &self,
            queue: EntityName,
            message: Message,
        ) -> BoxFuture<'_, Result<(), ClusterError>>;
        fn send_put_back(
            &self,
            queue: EntityName,
            message: Message,
            priority: bool,
        ) -> BoxFuture<'_, Result<(), ClusterError>>;
        fn send_message_removal(
            &self,
            queue: EntityName,
            message_id: MessageId,
        ) -> BoxFuture<'_, Result<(), ClusterError>>;
        fn send_queue_updated(&self, queue: EntityName) -> BoxFuture<'_, Result<(), ClusterError>>;
        fn send_queue_removed(&self, queue: EntityName) -> BoxFuture<'_, Result<(), ClusterError>>;
    }

    impl<T> BoxedCoordinator for T
    where
        T: ClusterCoordinator,
    {
        fn state(&self) -> NodeState {
            ClusterCoordinator::state(self)
        }
        fn mode(&self) -> ClusterMode {
            ClusterCoordinator::mode(self)
        }
        fn send_queue_message(
            &self,
            queue: EntityName,
            message: Message,
        ) -> BoxFuture<'_, Result<(), ClusterError>> {
            Box::pin(ClusterCoordinator::send_queue_message(self, queue, message))
        }
        fn send_put_back(
            &self,
            queue: EntityName,
            message: Message,
            priority: bool,
        ) -> BoxFuture<'_, Result<(), ClusterError>> {
            Box::pin(ClusterCoordinator::send_put_back(
                self, queue, message, priority,
            ))
        }
        fn send_message_removal(
            &self,
            queue: EntityName,
            message_id: MessageId,
        ) -> BoxFuture<'_, Result<(), ClusterError>> {
            Box::pin(ClusterCoordinator::send_message_removal(
                self, queue, message_id,
            ))
        }
        fn send_queue_updated(&self, queue: EntityName) -> BoxFuture<'_, Result<(), ClusterError>> {
            Box::pin(ClusterCoordinator::send_queue_updated(self, queue))
        }
        fn send_queue_removed(&self, queue: EntityName) -> BoxFuture<'_, Result<(), ClusterError>> {
            Box::pin(ClusterCoordinator::send_queue_removed(self, queue))
        }
    }
}
