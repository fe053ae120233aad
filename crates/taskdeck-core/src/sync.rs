pub mod http;
pub mod local;

use std::future::Future;

pub use http::HttpSyncClient;
pub use local::LocalSyncClient;

use crate::error::SyncResult;
use crate::task::{NewTask, Task, TaskChanges, TaskId};

/// Transport over the persistent task collection. Implementations perform
/// the call and report the outcome; they never touch the store's state.
pub trait SyncClient: Send + Sync {
    fn fetch_all(&self) -> impl Future<Output = SyncResult<Vec<Task>>> + Send;

    fn fetch_one(&self, id: &TaskId) -> impl Future<Output = SyncResult<Task>> + Send;

    fn create(&self, task: &NewTask) -> impl Future<Output = SyncResult<Task>> + Send;

    fn update(
        &self,
        id: &TaskId,
        changes: &TaskChanges,
    ) -> impl Future<Output = SyncResult<Task>> + Send;

    fn remove(&self, id: &TaskId) -> impl Future<Output = SyncResult<()>> + Send;
}

/// Remote API when one is configured, the on-disk collection otherwise.
#[derive(Debug)]
pub enum Backend {
    Remote(HttpSyncClient),
    Local(LocalSyncClient),
}

impl Backend {
    pub fn mode(&self) -> &'static str {
        match self {
            Backend::Remote(_) => "remote",
            Backend::Local(_) => "local",
        }
    }
}

impl SyncClient for Backend {
    async fn fetch_all(&self) -> SyncResult<Vec<Task>> {
        match self {
            Backend::Remote(client) => client.fetch_all().await,
            Backend::Local(client) => client.fetch_all().await,
        }
    }

    async fn fetch_one(&self, id: &TaskId) -> SyncResult<Task> {
        match self {
            Backend::Remote(client) => client.fetch_one(id).await,
            Backend::Local(client) => client.fetch_one(id).await,
        }
    }

    async fn create(&self, task: &NewTask) -> SyncResult<Task> {
        match self {
            Backend::Remote(client) => client.create(task).await,
            Backend::Local(client) => client.create(task).await,
        }
    }

    async fn update(&self, id: &TaskId, changes: &TaskChanges) -> SyncResult<Task> {
        match self {
            Backend::Remote(client) => client.update(id, changes).await,
            Backend::Local(client) => client.update(id, changes).await,
        }
    }

    async fn remove(&self, id: &TaskId) -> SyncResult<()> {
        match self {
            Backend::Remote(client) => client.remove(id).await,
            Backend::Local(client) => client.remove(id).await,
        }
    }
}
