//! Scheduler trait definitions for dependency injection

use async_trait::async_trait;

use shared::{ContextId, EventEnvelope, WorkItem};
use crate::error::{ClientError, SchedulerResult};
use crate::types::{AddResultCode, PersistedState};

/// External membership capability (the protocol client lives outside the core)
#[mockall::automock]
#[async_trait]
pub trait MembershipClient: Send + Sync {
    /// Current member handles of a group
    async fn fetch_group_members(&self, group: &str) -> Result<Vec<String>, ClientError>;

    /// Add exactly one identifier to a group
    async fn add_member(&self, group: &str, identifier: &str) -> Result<AddResultCode, ClientError>;
}

/// Durable per-context storage for the backlog and run/pacing snapshot
#[mockall::automock]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Replace the persisted backlog with `items`, in order
    async fn save_backlog(&self, context: &ContextId, items: &[WorkItem]) -> SchedulerResult<()>;

    /// Load the persisted backlog; empty when nothing was saved
    async fn load_backlog(&self, context: &ContextId) -> SchedulerResult<Vec<WorkItem>>;

    async fn save_state(&self, context: &ContextId, state: &PersistedState) -> SchedulerResult<()>;

    async fn load_state(&self, context: &ContextId) -> SchedulerResult<Option<PersistedState>>;

    /// Remove everything stored for a context
    async fn purge(&self, context: &ContextId) -> SchedulerResult<()>;
}

/// Push-layer hand-off point for scheduler events
#[mockall::automock]
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: EventEnvelope);
}
