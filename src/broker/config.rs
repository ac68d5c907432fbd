//! Persisted topology: a queues-file and a routers-file, written
//! best-effort on every mutation and read back at startup. Failures are a
//! log line, never a pipeline error.

use std::{borrow::Cow, future::Future, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::{queue::QueueOptions, router::RouterDefinition};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[typeshare]
pub struct QueueDefinition {
    pub name: String,
    pub options: QueueOptions,
}

pub trait ConfigRepository: Send + Sync + 'static {
    fn save_queues(
        &self,
        queues: Vec<QueueDefinition>,
    ) -> impl Future<Output = crate::Result<()>> + Send;
    fn save_routers(
        &self,
        routers: Vec<RouterDefinition>,
    ) -> impl Future<Output = crate::Result<()>> + Send;
    fn load_queues(&self) -> impl Future<Output = crate::Result<Vec<QueueDefinition>>> + Send;
    fn load_routers(&self) -> impl Future<Output = crate::Result<Vec<RouterDefinition>>> + Send;
}

#[derive(Clone)]
pub struct ConfigRepositoryService {
    provider: Cow<'static, str>,
    inner: Arc<dyn sealed::BoxedConfigRepository>,
}

impl std::fmt::Debug for ConfigRepositoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigRepositoryService")
            .field("provider", &self.provider)
            .finish()
    }
}

impl ConfigRepositoryService {
    pub fn new<T>(inner: T) -> Self
    where
        T: ConfigRepository,
    {
        Self {
            provider: std::any::type_name::<T>().into(),
            inner: Arc::new(inner),
        }
    }
    pub async fn save_queues(&self, queues: Vec<QueueDefinition>) -> crate::Result<()> {
        self.inner.save_queues(queues).await
    }
    pub async fn save_routers(&self, routers: Vec<RouterDefinition>) -> crate::Result<()> {
        self.inner.save_routers(routers).await
    }
    pub async fn load_queues(&self) -> crate::Result<Vec<QueueDefinition>> {
        self.inner.load_queues().await
    }
    pub async fn load_routers(&self) -> crate::Result<Vec<RouterDefinition>> {
        self.inner.load_routers().await
    }
}

/// JSON files in a directory: `queues.json` and `routers.json`.
#[derive(Debug, Clone)]
pub struct FileConfigRepository {
    directory: PathBuf,
}

impl FileConfigRepository {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
    fn queues_file(&self) -> PathBuf {
        self.directory.join("queues.json")
    }
    fn routers_file(&self) -> PathBuf {
        self.directory.join("routers.json")
    }

    async fn write<T: Serialize>(&self, path: PathBuf, value: &T) -> crate::Result<()> {
        let json =
            serde_json::to_vec_pretty(value).map_err(crate::Error::contextual("encode config"))?;
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(crate::Error::contextual("create config directory"))?;
        tokio::fs::write(path, json)
            .await
            .map_err(crate::Error::contextual("write config file"))?;
        Ok(())
    }

    async fn read<T: for<'de> Deserialize<'de>>(&self, path: PathBuf) -> crate::Result<Vec<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(crate::Error::contextual("decode config"))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(crate::Error::contextual("read config file")(e)),
        }
    }
}

impl ConfigRepository for FileConfigRepository {
    async fn save_queues(&self, queues: Vec<QueueDefinition>) -> crate::Result<()> {
        self.write(self.queues_file(), &queues).await
    }
    async fn save_routers(&self, routers: Vec<RouterDefinition>) -> crate::Result<()> {
        self.write(self.routers_file(), &routers).await
    }
    async fn load_queues(&self) -> crate::Result<Vec<QueueDefinition>> {
        self.read(self.queues_file()).await
    }
    async fn load_routers(&self) -> crate::Result<Vec<RouterDefinition>> {
        self.read(self.routers_file()).await
    }
}

mod sealed {
    use futures_util::future::BoxFuture;

    use super::{ConfigRepository, QueueDefinition};
    use crate::router::RouterDefinition;

    pub(super) trait BoxedConfigRepository: Send + Sync {
        fn save_queues(&self, queues: Vec<QueueDefinition>) -> BoxFuture<'_, crate::Result<()>>;
        fn save_routers(&self, routers: Vec<RouterDefinition>)
            -> BoxFuture<'_, crate::Result<()>>;
        fn load_queues(&self) -> BoxFuture<'_, crate::Result<Vec<QueueDefinition>>>;
        fn load_routers(&self) -> BoxFuture<'_, crate::Result<Vec<RouterDefinition>>>;
    }

    impl<T> BoxedConfigRepository for T
    where
        T: ConfigRepository,
    {
        fn save_queues(&self, queues: Vec<QueueDefinition>) -> BoxFuture<'_, crate::Result<()>> {
            Box::pin(ConfigRepository::save_queues(self, queues))
        }
        fn save_routers(
            &self,
            routers: Vec<RouterDefinition>,
        ) -> BoxFuture<'_, crate::Result<()>> {
            Box::pin(ConfigRepository::save_routers(self, routers))
        }
        fn load_queues(&self) -> BoxFuture<'_, crate::Result<Vec<QueueDefinition>>> {
            Box::pin(ConfigRepository::load_queues(self))
        }
        fn load_routers(&self) -> BoxFuture<'_, crate::Result<Vec<RouterDefinition>>> {
            Box::pin(ConfigRepository::load_routers(self))
        }
    }
}
