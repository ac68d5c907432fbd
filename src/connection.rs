use std::{
    borrow::Cow,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::protocol::Message;

/// Outbound half of a client link. The accept loop, framing and TLS live in
/// the hosting process; the engine only needs to hand frames to a sink and
/// ask whether the peer is still there.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, frame: Message) -> impl Future<Output = Result<(), crate::Error>> + Send;
    fn is_connected(&self) -> bool;
    fn close(&self);
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<dyn sealed::BoxedTransport>,
    source: Cow<'static, str>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("source", &self.source)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    pub fn new<T: Transport>(inner: T) -> Self {
        Self {
            inner: Arc::new(inner),
            source: std::any::type_name::<T>().into(),
        }
    }
    /// A link that was never connected. Useful as a placeholder target.
    pub fn closed() -> Self {
        Self::new(ClosedTransport)
    }
    /// An in-process link backed by an unbounded flume channel; the
    /// receiver side is what an embedded consumer polls.
    pub fn channel() -> (Self, flume::Receiver<Message>) {
        let (tx, rx) = flume::unbounded();
        (
            Self::new(ChannelTransport {
                tx,
                connected: AtomicBool::new(true),
            }),
            rx,
        )
    }
    pub async fn send(&self, frame: Message) -> Result<(), crate::Error> {
        self.inner.send(frame).await
    }
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
    pub fn close(&self) {
        self.inner.close()
    }
}

struct ClosedTransport;

impl Transport for ClosedTransport {
    async fn send(&self, _frame: Message) -> Result<(), crate::Error> {
        Err(crate::Error::new(
            "closed transport",
            crate::error::ErrorKind::Offline,
        ))
    }
    fn is_connected(&self) -> bool {
        false
    }
    fn close(&self) {}
}

struct ChannelTransport {
    tx: flume::Sender<Message>,
    connected: AtomicBool,
}

impl Transport for ChannelTransport {
    async fn send(&self, frame: Message) -> Result<(), crate::Error> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(crate::Error::new(
                "channel transport",
                crate::error::ErrorKind::Offline,
            ));
        }
        self.tx.send_async(frame).await.map_err(|_| {
            self.connected.store(false, Ordering::Release);
            crate::Error::new("channel transport", crate::error::ErrorKind::Offline)
        })
    }
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.tx.is_disconnected()
    }
    fn close(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

mod sealed {
    use futures_util::future::BoxFuture;

    use super::Transport;
    use crate::protocol::Message;

    pub(super) trait BoxedTransport: Send + Sync {
        fn send(&self, frame: Message) -> BoxFuture<'_, Result<(), crate::Error>>;
        fn is_connected(&self) -> bool;
        fn close(&self);
    }

    impl<T> BoxedTransport for T
    where
        T: Transport,
    {
        fn send(&self, frame: Message) -> BoxFuture<'_, Result<(), crate::Error>> {
            Box::pin(Transport::send(self, frame))
        }
        fn is_connected(&self) -> bool {
            Transport::is_connected(self)
        }
        fn close(&self) {
            Transport::close(self)
        }
    }
}
