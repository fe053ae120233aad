use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::auth::SessionToken;
use crate::task::Task;

pub const TASKS_KEY: &str = "tasks.json";
pub const TOKEN_KEY: &str = "session.token";

/// One file per key inside the data directory. Writes go through a temp file
/// and a rename so a crash never leaves a half-written blob behind.
#[derive(Debug, Clone)]
pub struct DataStore {
    pub data_dir: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened datastore");
        Ok(Self { data_dir })
    }

    #[tracing::instrument(skip(self))]
    pub fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(file = %path.display(), "no blob stored for key");
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("failed reading {}", path.display())),
        }
    }

    #[tracing::instrument(skip(self, contents), fields(bytes = contents.len()))]
    pub fn write(&self, key: &str, contents: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        debug!(file = %path.display(), "writing blob atomically");

        let mut temp = NamedTempFile::new_in(&self.data_dir)?;
        temp.write_all(contents.as_bytes())?;
        temp.flush()?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed removing {}", path.display())),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn load_tasks(&self) -> anyhow::Result<Vec<Task>> {
        let Some(raw) = self.read(TASKS_KEY)? else {
            return Ok(vec![]);
        };
        if raw.trim().is_empty() {
            return Ok(vec![]);
        }

        let tasks: Vec<Task> =
            serde_json::from_str(&raw).with_context(|| format!("failed parsing {TASKS_KEY}"))?;
        debug!(count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub fn save_tasks(&self, tasks: &[Task]) -> anyhow::Result<()> {
        let serialized = serde_json::to_string_pretty(tasks)?;
        self.write(TASKS_KEY, &serialized)
            .with_context(|| format!("failed to save {TASKS_KEY}"))
    }

    pub fn load_token(&self) -> anyhow::Result<Option<SessionToken>> {
        Ok(self.read(TOKEN_KEY)?.and_then(SessionToken::new))
    }

    pub fn save_token(&self, token: &SessionToken) -> anyhow::Result<()> {
        self.write(TOKEN_KEY, token.expose())
    }

    pub fn clear_token(&self) -> anyhow::Result<()> {
        self.remove(TOKEN_KEY)
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'));
        if !valid {
            return Err(anyhow!("invalid datastore key: {key:?}"));
        }
        Ok(self.data_dir.join(key))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::{DataStore, TASKS_KEY};
    use crate::auth::SessionToken;
    use crate::task::{TaskId, TaskStatus, TaskDraft};

    #[test]
    fn missing_blobs_read_as_empty() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");

        assert!(store.load_tasks().expect("load tasks").is_empty());
        assert!(store.load_token().expect("load token").is_none());
    }

    #[test]
    fn tasks_roundtrip_through_json_array() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");

        let now = Utc::now();
        let task = TaskDraft::new("Water plants", "balcony")
            .validate(now.date_naive(), now)
            .expect("valid draft")
            .into_task(TaskId::new("1"));
        store.save_tasks(&[task.clone()]).expect("save tasks");

        let raw = store.read(TASKS_KEY).expect("read").expect("blob present");
        assert!(raw.trim_start().starts_with('['));

        let loaded = store.load_tasks().expect("load tasks");
        assert_eq!(loaded, vec![task]);
        assert_eq!(loaded[0].status, TaskStatus::Pending);
    }

    #[test]
    fn token_can_be_cleared_twice() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");

        let token = SessionToken::new("abc123").expect("token");
        store.save_token(&token).expect("save token");
        assert_eq!(store.load_token().expect("load"), Some(token));

        store.clear_token().expect("clear");
        store.clear_token().expect("clear again");
        assert!(store.load_token().expect("load").is_none());
    }

    #[test]
    fn rejects_path_like_keys() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");

        assert!(store.write("../escape", "x").is_err());
        assert!(store.read(".hidden").is_err());
    }
}
