//! In-memory state store for embedding without a disk and for tests

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use shared::{ContextId, WorkItem};
use crate::error::SchedulerResult;
use crate::traits::StateStore;
use crate::types::PersistedState;

#[derive(Default)]
pub struct MemoryStateStore {
    backlogs: Mutex<HashMap<ContextId, Vec<WorkItem>>>,
    states: Mutex<HashMap<ContextId, PersistedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a backlog as if a previous run had persisted it
    pub async fn seed_backlog(&self, context: &ContextId, items: Vec<WorkItem>) {
        self.backlogs.lock().await.insert(context.clone(), items);
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save_backlog(&self, context: &ContextId, items: &[WorkItem]) -> SchedulerResult<()> {
        self.backlogs.lock().await.insert(context.clone(), items.to_vec());
        Ok(())
    }

    async fn load_backlog(&self, context: &ContextId) -> SchedulerResult<Vec<WorkItem>> {
        Ok(self.backlogs.lock().await.get(context).cloned().unwrap_or_default())
    }

    async fn save_state(&self, context: &ContextId, state: &PersistedState) -> SchedulerResult<()> {
        self.states.lock().await.insert(context.clone(), state.clone());
        Ok(())
    }

    async fn load_state(&self, context: &ContextId) -> SchedulerResult<Option<PersistedState>> {
        Ok(self.states.lock().await.get(context).cloned())
    }

    async fn purge(&self, context: &ContextId) -> SchedulerResult<()> {
        self.backlogs.lock().await.remove(context);
        self.states.lock().await.remove(context);
        Ok(())
    }
}
