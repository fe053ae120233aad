use parking_lot::Mutex;
use tracing::{debug, error, info, instrument};

use super::SyncClient;
use crate::datastore::DataStore;
use crate::error::{SyncError, SyncResult};
use crate::task::{IdClock, NewTask, Task, TaskChanges, TaskId};

/// Fallback used when no remote API is configured: the collection lives in
/// the data directory as a single JSON array, rewritten after every
/// successful mutation.
#[derive(Debug)]
pub struct LocalSyncClient {
    datastore: DataStore,
    tasks: Mutex<Vec<Task>>,
    ids: IdClock,
}

impl LocalSyncClient {
    #[instrument(skip(datastore))]
    pub fn open(datastore: DataStore) -> anyhow::Result<Self> {
        let tasks = datastore.load_tasks()?;
        info!(count = tasks.len(), "opened local task collection");
        Ok(Self {
            datastore,
            tasks: Mutex::new(tasks),
            ids: IdClock::default(),
        })
    }

    fn persist(&self, tasks: &[Task]) -> SyncResult<()> {
        self.datastore.save_tasks(tasks).map_err(|err| {
            error!(error = %format!("{err:#}"), "failed to persist local tasks");
            SyncError::Network(format!("local storage: {err:#}"))
        })
    }

    fn next_id(&self, tasks: &[Task]) -> TaskId {
        loop {
            let candidate = TaskId::new(self.ids.next().to_string());
            if !tasks.iter().any(|task| task.id == candidate) {
                return candidate;
            }
        }
    }
}

impl SyncClient for LocalSyncClient {
    async fn fetch_all(&self) -> SyncResult<Vec<Task>> {
        Ok(self.tasks.lock().clone())
    }

    async fn fetch_one(&self, id: &TaskId) -> SyncResult<Task> {
        self.tasks
            .lock()
            .iter()
            .find(|task| &task.id == id)
            .cloned()
            .ok_or(SyncError::NotFound)
    }

    #[instrument(skip(self, task))]
    async fn create(&self, task: &NewTask) -> SyncResult<Task> {
        let mut tasks = self.tasks.lock();
        let id = self.next_id(&tasks);
        let created = task.clone().into_task(id);

        tasks.push(created.clone());
        if let Err(err) = self.persist(&tasks) {
            tasks.pop();
            return Err(err);
        }

        debug!(id = %created.id, "created local task");
        Ok(created)
    }

    #[instrument(skip(self, changes), fields(id = %id))]
    async fn update(&self, id: &TaskId, changes: &TaskChanges) -> SyncResult<Task> {
        let mut tasks = self.tasks.lock();
        let idx = tasks
            .iter()
            .position(|task| &task.id == id)
            .ok_or(SyncError::NotFound)?;

        let before = tasks[idx].clone();
        changes.apply_to(&mut tasks[idx]);
        if let Err(err) = self.persist(&tasks) {
            tasks[idx] = before;
            return Err(err);
        }

        Ok(tasks[idx].clone())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn remove(&self, id: &TaskId) -> SyncResult<()> {
        let mut tasks = self.tasks.lock();
        let idx = tasks
            .iter()
            .position(|task| &task.id == id)
            .ok_or(SyncError::NotFound)?;

        let removed = tasks.remove(idx);
        if let Err(err) = self.persist(&tasks) {
            tasks.insert(idx, removed);
            return Err(err);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::LocalSyncClient;
    use crate::datastore::DataStore;
    use crate::error::SyncError;
    use crate::sync::SyncClient;
    use crate::task::{TaskChanges, TaskDraft, TaskId, TaskStatus};

    #[tokio::test]
    async fn mutations_are_written_through() {
        let temp = tempdir().expect("tempdir");
        let datastore = DataStore::open(temp.path()).expect("open datastore");
        let client = LocalSyncClient::open(datastore.clone()).expect("open client");

        let now = Utc::now();
        let draft = TaskDraft::new("Call plumber", "kitchen sink")
            .validate(now.date_naive(), now)
            .expect("valid draft");
        let created = client.create(&draft).await.expect("create");
        assert_eq!(datastore.load_tasks().expect("load").len(), 1);

        let updated = client
            .update(&created.id, &TaskChanges::status(TaskStatus::Completed))
            .await
            .expect("update");
        assert_eq!(updated.status, TaskStatus::Completed);
        assert_eq!(updated.created_at, created.created_at);

        let reopened = LocalSyncClient::open(datastore.clone()).expect("reopen");
        let fetched = reopened.fetch_one(&created.id).await.expect("fetch");
        assert_eq!(fetched.status, TaskStatus::Completed);

        reopened.remove(&created.id).await.expect("remove");
        assert!(datastore.load_tasks().expect("load").is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let temp = tempdir().expect("tempdir");
        let datastore = DataStore::open(temp.path()).expect("open datastore");
        let client = LocalSyncClient::open(datastore).expect("open client");

        let missing = TaskId::new("nope");
        assert_eq!(client.fetch_one(&missing).await, Err(SyncError::NotFound));
        assert_eq!(client.remove(&missing).await, Err(SyncError::NotFound));
        assert_eq!(
            client.update(&missing, &TaskChanges::default()).await,
            Err(SyncError::NotFound)
        );
    }
}
