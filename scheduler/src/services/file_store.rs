//! File-backed state store
//!
//! Layout per context: `<base_dir>/<context>/backlog.json` and
//! `<base_dir>/<context>/state.json`. Every write goes to a temp file first
//! and is renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use shared::{ContextId, WorkItem};
use crate::error::{SchedulerError, SchedulerResult};
use crate::traits::StateStore;
use crate::types::PersistedState;

const BACKLOG_FILE: &str = "backlog.json";
const STATE_FILE: &str = "state.json";

pub struct RealStateStore {
    base_dir: PathBuf,
}

impl RealStateStore {
    /// Store under `./state`
    pub fn new() -> Self {
        Self::with_base_dir(PathBuf::from("./state"))
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn context_dir(&self, context: &ContextId) -> PathBuf {
        self.base_dir.join(context.as_str())
    }

    fn backlog_path(&self, context: &ContextId) -> PathBuf {
        self.context_dir(context).join(BACKLOG_FILE)
    }

    fn state_path(&self, context: &ContextId) -> PathBuf {
        self.context_dir(context).join(STATE_FILE)
    }

    async fn write_atomic<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> SchedulerResult<()> {
        let content = serde_json::to_vec_pretty(value)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SchedulerError::persistence("create_dir", parent.display().to_string(), e))?;
        }

        let tmp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| SchedulerError::persistence("create", tmp_path.display().to_string(), e))?;
        file.write_all(&content)
            .await
            .map_err(|e| SchedulerError::persistence("write", tmp_path.display().to_string(), e))?;
        file.sync_all()
            .await
            .map_err(|e| SchedulerError::persistence("sync", tmp_path.display().to_string(), e))?;
        drop(file);

        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| SchedulerError::persistence("rename", path.display().to_string(), e))?;
        debug!(path = %path.display(), bytes = content.len(), "Persisted snapshot");
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> SchedulerResult<Option<T>> {
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SchedulerError::persistence("read", path.display().to_string(), e)),
        };
        let value = serde_json::from_slice(&content)
            .map_err(|e| SchedulerError::persistence("parse", path.display().to_string(), e))?;
        Ok(Some(value))
    }
}

impl Default for RealStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for RealStateStore {
    async fn save_backlog(&self, context: &ContextId, items: &[WorkItem]) -> SchedulerResult<()> {
        self.write_atomic(&self.backlog_path(context), items).await
    }

    async fn load_backlog(&self, context: &ContextId) -> SchedulerResult<Vec<WorkItem>> {
        Ok(self.read_json(&self.backlog_path(context)).await?.unwrap_or_default())
    }

    async fn save_state(&self, context: &ContextId, state: &PersistedState) -> SchedulerResult<()> {
        self.write_atomic(&self.state_path(context), state).await
    }

    async fn load_state(&self, context: &ContextId) -> SchedulerResult<Option<PersistedState>> {
        self.read_json(&self.state_path(context)).await
    }

    async fn purge(&self, context: &ContextId) -> SchedulerResult<()> {
        let dir = self.context_dir(context);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SchedulerError::persistence("remove_dir", dir.display().to_string(), e)),
        }
    }
}
