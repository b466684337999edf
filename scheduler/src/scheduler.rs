//! Per-context scheduler handle
//!
//! `Scheduler` is a cheap clonable handle over one context's shared core. All
//! operational calls lock the context state briefly and never wait on the
//! drain loop itself.

use std::sync::Arc;

use shared::{
    context_info, ContextId, PacingConfig, PacingConfigPatch, SchedulerConfig, SchedulerEvent,
    SchedulerPhase, StatusSnapshot,
};
use crate::core::batch_loop::try_start;
use crate::core::{Backlog, PacingPolicy};
use crate::error::SchedulerResult;
use crate::state::SchedulerInner;
use crate::traits::{EventSink, MembershipClient, StateStore};
use crate::types::EnqueueReport;

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a context; the configuration is validated up front
    pub fn new(
        context: ContextId,
        config: SchedulerConfig,
        client: Arc<dyn MembershipClient>,
        store: Arc<dyn StateStore>,
        events: Arc<dyn EventSink>,
    ) -> SchedulerResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(SchedulerInner::new(context, config, client, store, events)),
        })
    }

    pub fn context(&self) -> &ContextId {
        &self.inner.context
    }

    /// Load the persisted backlog and run state, then start draining if eligible
    ///
    /// Returns the number of restored work items.
    pub async fn restore(&self) -> SchedulerResult<usize> {
        let items = self.inner.store.load_backlog(&self.inner.context).await?;
        let persisted = self.inner.store.load_state(&self.inner.context).await?;
        let restored = items.len();

        {
            let mut state = self.inner.state.lock().await;
            state.backlog = Backlog::from_items(self.inner.config.identifiers, items);
            state.in_flight.clear();
            if let Some(persisted) = persisted {
                let pacing_config = match persisted.pacing_config {
                    Some(config) if config.validate().is_ok() => config,
                    _ => self.inner.config.pacing.clone(),
                };
                state.pacing = PacingPolicy::with_state(pacing_config, persisted.pacing);
                state.totals = persisted.totals;
                state.is_paused = persisted.paused;
            }
            if !state.is_processing {
                state.phase = state.resting_phase();
            }
        }

        context_info!(self.inner.context, restored, "Restored persisted backlog");
        try_start(&self.inner).await;
        Ok(restored)
    }

    /// Validate and queue identifiers for a group, then start draining if eligible
    pub async fn enqueue(&self, group: &str, identifiers: &[String]) -> SchedulerResult<EnqueueReport> {
        let report = {
            let mut state = self.inner.state.lock().await;
            let state = &mut *state;
            state.backlog.enqueue(group, identifiers, &state.in_flight)?
        };

        context_info!(
            self.inner.context,
            group = %group.trim(),
            accepted = report.accepted,
            duplicates = report.rejected_duplicates.len(),
            invalid = report.rejected_invalid.len(),
            "Enqueued identifiers"
        );

        if report.accepted > 0 {
            self.inner.persist_backlog().await;
            try_start(&self.inner).await;
        }
        Ok(report)
    }

    /// Interrupt the running loop and keep the backlog; in-flight items go back to its head
    pub async fn pause(&self) {
        let remaining = {
            let mut state = self.inner.state.lock().await;
            if state.is_paused {
                return;
            }
            state.is_paused = true;
            state.resume_after_exit = false;
            state.cancel.cancel();
            if !state.is_processing {
                state.phase = SchedulerPhase::Paused;
            }
            state.remaining()
        };

        self.inner.persist_all().await;
        context_info!(self.inner.context, remaining, "Paused");
        self.inner.emit(SchedulerEvent::Paused { remaining });
    }

    /// Clear the paused flag and start draining if eligible; returns whether a loop started
    ///
    /// When not paused this still restarts an idle context with queued work,
    /// e.g. after a loop fault.
    pub async fn resume(&self) -> bool {
        let remaining = {
            let mut state = self.inner.state.lock().await;
            if !state.is_paused {
                drop(state);
                return try_start(&self.inner).await;
            }
            state.is_paused = false;
            if !state.is_processing {
                state.phase = SchedulerPhase::Idle;
            }
            state.remaining()
        };

        self.inner.persist_state().await;
        context_info!(self.inner.context, remaining, "Resumed");
        self.inner.emit(SchedulerEvent::Resumed { remaining });
        try_start(&self.inner).await
    }

    /// Interrupt the running loop and discard all queued work
    pub async fn stop(&self) {
        let (discarded, totals) = {
            let mut state = self.inner.state.lock().await;
            let discarded = state.backlog.clear() + state.in_flight.len();
            state.in_flight.clear();
            state.is_paused = false;
            state.resume_after_exit = false;
            state.cancel.cancel();
            if !state.is_processing {
                state.phase = SchedulerPhase::Idle;
            }
            (discarded, state.totals)
        };

        self.inner.persist_all().await;
        context_info!(self.inner.context, discarded, "Stopped");
        self.inner.emit(SchedulerEvent::Stopped { discarded, totals });
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.inner.state.lock().await.status(&self.inner.context)
    }

    /// Hot-apply a partial pacing update; takes effect on the next delay drawn
    ///
    /// A lowered failure threshold applies to the streak already under way.
    pub async fn set_pacing_config(&self, patch: &PacingConfigPatch) -> SchedulerResult<PacingConfig> {
        let (config, change, item_bounds, batch_bounds) = {
            let mut state = self.inner.state.lock().await;
            let (config, change) = state.pacing.apply_patch(patch)?;
            (config, change, state.pacing.inter_item_bounds(), state.pacing.inter_batch_bounds())
        };
        self.inner.persist_state().await;
        context_info!(self.inner.context, "Pacing configuration updated");
        self.inner.report_pacing_change(change, item_bounds, batch_bounds);
        Ok(config)
    }

    /// Report connectivity of the underlying client
    ///
    /// Losing the connection interrupts the loop and restores in-flight items.
    /// Regaining it invalidates the membership cache and resumes draining.
    pub async fn set_connected(&self, connected: bool) {
        {
            let mut state = self.inner.state.lock().await;
            if state.connected == connected {
                return;
            }
            state.connected = connected;
            if !connected {
                state.resume_after_exit = false;
                state.cancel.cancel();
            }
        }

        context_info!(self.inner.context, connected, "Connectivity changed");
        self.inner.emit(SchedulerEvent::ConnectivityChanged { connected });
        if connected {
            self.inner.cache.lock().await.invalidate_all();
            try_start(&self.inner).await;
        }
    }

    /// Interrupt the loop without touching queued work, e.g. on process exit
    ///
    /// The pending items, in-flight slice included, are persisted so the next
    /// `restore` picks them up.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.resume_after_exit = false;
            state.cancel.cancel();
        }
        self.inner.persist_all().await;
    }

    /// Remove everything this context persisted
    pub async fn purge(&self) -> SchedulerResult<()> {
        self.inner.store.purge(&self.inner.context).await
    }
}
