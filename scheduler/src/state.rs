//! Per-context state management
//!
//! `ContextState` is everything the enqueue API and the drain loop share. It
//! lives behind one tokio mutex, which is never held across a remote call.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use shared::{
    context_info, context_warn, ContextId, DelayRange, EventEnvelope, SchedulerConfig,
    SchedulerEvent, SchedulerPhase, StatusSnapshot, Totals, WorkItem,
};
use crate::core::{Backlog, MembershipCache, PacingChange, PacingPolicy};
use crate::traits::{EventSink, MembershipClient, StateStore};
use crate::types::PersistedState;

pub struct ContextState {
    pub backlog: Backlog,
    /// Drained slice items not yet resolved, in execution order
    pub in_flight: Vec<WorkItem>,
    pub pacing: PacingPolicy,
    pub totals: Totals,
    pub phase: SchedulerPhase,
    /// True exactly while a drain loop task is alive
    pub is_processing: bool,
    pub is_paused: bool,
    pub connected: bool,
    /// Token of the current (or last) drain loop
    pub cancel: CancellationToken,
    /// Start another loop as soon as the winding-down one exits
    pub resume_after_exit: bool,
    /// Source of per-loop seeds
    pub rng: StdRng,
}

impl ContextState {
    pub fn new(config: &SchedulerConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            backlog: Backlog::new(config.identifiers),
            in_flight: Vec::new(),
            pacing: PacingPolicy::new(config.pacing.clone()),
            totals: Totals::default(),
            phase: SchedulerPhase::Idle,
            is_processing: false,
            is_paused: false,
            connected: true,
            cancel: CancellationToken::new(),
            resume_after_exit: false,
            rng,
        }
    }

    /// Everything not yet resolved: the in-flight slice followed by the backlog
    pub fn pending_items(&self) -> Vec<WorkItem> {
        self.in_flight.iter().chain(self.backlog.iter()).cloned().collect()
    }

    pub fn remaining(&self) -> usize {
        self.in_flight.len() + self.backlog.len()
    }

    /// Move unresolved in-flight items back to the head of the backlog
    pub fn restore_in_flight(&mut self) {
        let items = std::mem::take(&mut self.in_flight);
        self.backlog.restore_front(items);
    }

    /// Drop a resolved item from the in-flight slice
    pub fn complete_in_flight(&mut self, item: &WorkItem) {
        if let Some(index) = self.in_flight.iter().position(|pending| pending.same_target(item)) {
            self.in_flight.remove(index);
        }
    }

    /// Carry the attempt counter of an interrupted item back into the slice
    pub fn sync_attempts(&mut self, item: &WorkItem) {
        if let Some(pending) = self.in_flight.iter_mut().find(|pending| pending.same_target(item)) {
            pending.attempt_count = item.attempt_count;
        }
    }

    /// Phase to report once no loop is running
    pub fn resting_phase(&self) -> SchedulerPhase {
        if self.is_paused {
            SchedulerPhase::Paused
        } else {
            SchedulerPhase::Idle
        }
    }

    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            pacing: self.pacing.state().clone(),
            pacing_config: Some(self.pacing.config().clone()),
            totals: self.totals,
            paused: self.is_paused,
        }
    }

    pub fn status(&self, context: &ContextId) -> StatusSnapshot {
        let pacing = self.pacing.state();
        StatusSnapshot {
            context: context.clone(),
            phase: self.phase,
            backlog_size: self.backlog.len(),
            in_flight: self.in_flight.len(),
            is_processing: self.is_processing,
            is_paused: self.is_paused,
            connected: self.connected,
            totals: self.totals,
            pacing: self.pacing.config().clone(),
            consecutive_failures: pacing.consecutive_failures,
            backoff_level: pacing.backoff_level,
            successes_today: pacing.successes_today,
        }
    }
}

/// Shared core of one context, owned by the `Scheduler` handle and its loop task
pub(crate) struct SchedulerInner {
    pub context: ContextId,
    pub config: SchedulerConfig,
    pub state: Mutex<ContextState>,
    pub cache: Mutex<MembershipCache>,
    pub client: Arc<dyn MembershipClient>,
    pub store: Arc<dyn StateStore>,
    pub events: Arc<dyn EventSink>,
    /// Serializes snapshot writes so they land in the order they were taken
    persist_lock: Mutex<()>,
}

impl SchedulerInner {
    pub fn new(
        context: ContextId,
        config: SchedulerConfig,
        client: Arc<dyn MembershipClient>,
        store: Arc<dyn StateStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let state = ContextState::new(&config);
        let cache = MembershipCache::new(Duration::from_secs(config.cache_ttl_secs));
        Self {
            context,
            config,
            state: Mutex::new(state),
            cache: Mutex::new(cache),
            client,
            store,
            events,
            persist_lock: Mutex::new(()),
        }
    }

    pub fn emit(&self, event: SchedulerEvent) {
        self.events.emit(EventEnvelope::new(self.context.clone(), event));
    }

    /// Log and emit a backoff level transition
    pub fn report_pacing_change(
        &self,
        change: PacingChange,
        item_bounds: DelayRange,
        batch_bounds: DelayRange,
    ) {
        match change {
            PacingChange::Unchanged => {}
            PacingChange::Engaged { level, consecutive_failures } => {
                context_warn!(
                    self.context,
                    level,
                    consecutive_failures,
                    "Backoff engaged, delays widened to {:.1}s / {:.0}s",
                    item_bounds.max_secs,
                    batch_bounds.max_secs
                );
                self.emit(SchedulerEvent::BackoffEngaged {
                    level,
                    consecutive_failures,
                    inter_item_max_secs: item_bounds.max_secs,
                    inter_batch_max_secs: batch_bounds.max_secs,
                });
            }
            PacingChange::Relaxed { level } => {
                context_info!(self.context, level, "Backoff relaxed");
                self.emit(SchedulerEvent::BackoffRelaxed { level });
            }
        }
    }

    pub async fn set_phase(&self, phase: SchedulerPhase) {
        self.state.lock().await.phase = phase;
    }

    /// Write the pending items; failures are logged and otherwise ignored
    pub async fn persist_backlog(&self) {
        let _guard = self.persist_lock.lock().await;
        let items = self.state.lock().await.pending_items();
        if let Err(e) = self.store.save_backlog(&self.context, &items).await {
            context_warn!(self.context, error = %e, "Failed to persist backlog");
        }
    }

    /// Write pacing, totals and the paused flag; failures are logged and otherwise ignored
    pub async fn persist_state(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.state.lock().await.persisted_state();
        if let Err(e) = self.store.save_state(&self.context, &snapshot).await {
            context_warn!(self.context, error = %e, "Failed to persist run state");
        }
    }

    pub async fn persist_all(&self) {
        self.persist_backlog().await;
        self.persist_state().await;
    }
}
