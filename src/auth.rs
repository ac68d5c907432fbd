use std::{borrow::Cow, future::Future, sync::Arc};

use crate::{client::Client, protocol::Message};

/// An async allow/deny hook. The dispatcher consults every registered hook
/// and all of them must allow for the operation to proceed.
pub trait Authorization: Send + Sync + 'static {
    fn allow(&self, client: &Client, request: &Message) -> impl Future<Output = bool> + Send;
}

#[derive(Clone)]
pub struct AuthorizationService {
    inner: Arc<dyn sealed::BoxedAuthorization>,
    source: Cow<'static, str>,
}

impl std::fmt::Debug for AuthorizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationService")
            .field("source", &self.source)
            .finish()
    }
}

impl AuthorizationService {
    pub fn new<T>(inner: T) -> Self
    where
        T: Authorization,
    {
        Self {
            inner: Arc::new(inner),
            source: std::any::type_name::<T>().into(),
        }
    }
    pub async fn allow(&self, client: &Client, request: &Message) -> bool {
        self.inner.allow(client, request).await
    }
}

/// All-must-pass across a hook set; an empty set allows everything.
pub async fn allow_all(hooks: &[AuthorizationService], client: &Client, request: &Message) -> bool {
    for hook in hooks {
        if !hook.allow(client, request).await {
            tracing::debug!(source = %hook.source, "authorization denied");
            return false;
        }
    }
    true
}

mod sealed {
    use futures_util::future::BoxFuture;

    use super::Authorization;
    use crate::{client::Client, protocol::Message};

    pub(super) trait BoxedAuthorization: Send + Sync {
        fn allow<'r>(&'r self, client: &'r Client, request: &'r Message) -> BoxFuture<'r, bool>;
    }

    impl<T> BoxedAuthorization for T
    where
        T: Authorization,
    {
        fn allow<'r>(&'r self, client: &'r Client, request: &'r Message) -> BoxFuture<'r, bool> {
            Box::pin(Authorization::allow(self, client, request))
        }
    }
}
