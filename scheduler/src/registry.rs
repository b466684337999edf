//! Registry of independent scheduler contexts
//!
//! One context per linked account. Contexts share the state store and the
//! event sink, nothing else.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use shared::{context_info, ContextId, SchedulerConfig, StatusSnapshot};
use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::Scheduler;
use crate::traits::{EventSink, MembershipClient, StateStore};

pub struct SchedulerRegistry {
    config: SchedulerConfig,
    store: Arc<dyn StateStore>,
    events: Arc<dyn EventSink>,
    contexts: RwLock<HashMap<ContextId, Scheduler>>,
}

impl SchedulerRegistry {
    pub fn new(config: SchedulerConfig, store: Arc<dyn StateStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            store,
            events,
            contexts: RwLock::new(HashMap::new()),
        }
    }

    /// Register a context and restore whatever it persisted before
    pub async fn create(
        &self,
        context: ContextId,
        client: Arc<dyn MembershipClient>,
    ) -> SchedulerResult<Scheduler> {
        let scheduler = {
            let mut contexts = self.contexts.write().await;
            if contexts.contains_key(&context) {
                return Err(SchedulerError::ContextExists { context });
            }
            let scheduler = Scheduler::new(
                context.clone(),
                self.config.clone(),
                client,
                self.store.clone(),
                self.events.clone(),
            )?;
            contexts.insert(context.clone(), scheduler.clone());
            scheduler
        };

        if let Err(e) = scheduler.restore().await {
            self.contexts.write().await.remove(&context);
            return Err(e);
        }
        context_info!(context, "Context registered");
        Ok(scheduler)
    }

    pub async fn get(&self, context: &ContextId) -> Option<Scheduler> {
        self.contexts.read().await.get(context).cloned()
    }

    /// Tear a context down
    ///
    /// With `purge` (logout) the backlog is discarded and persisted files are
    /// removed; without it the pending work stays on disk for a later `create`.
    pub async fn remove(&self, context: &ContextId, purge: bool) -> SchedulerResult<()> {
        let scheduler = self
            .contexts
            .write()
            .await
            .remove(context)
            .ok_or_else(|| SchedulerError::ContextNotFound {
                context: context.clone(),
            })?;

        if purge {
            scheduler.stop().await;
            scheduler.purge().await?;
        } else {
            scheduler.shutdown().await;
        }
        context_info!(context, purge, "Context removed");
        Ok(())
    }

    /// Status of every registered context, ordered by id
    pub async fn list(&self) -> Vec<StatusSnapshot> {
        let schedulers: Vec<Scheduler> = self.contexts.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(schedulers.len());
        for scheduler in schedulers {
            statuses.push(scheduler.status().await);
        }
        statuses.sort_by(|a, b| a.context.cmp(&b.context));
        statuses
    }

    /// Shut every context down, keeping their persisted work
    pub async fn shutdown_all(&self) {
        let schedulers: Vec<Scheduler> = self.contexts.write().await.drain().map(|(_, s)| s).collect();
        for scheduler in schedulers {
            scheduler.shutdown().await;
        }
    }
}
