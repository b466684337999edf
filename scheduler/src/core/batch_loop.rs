//! Drain loop and its supervisor
//!
//! The loop runs in a child task. A parent task awaits the child's
//! `JoinHandle` so every exit, including a panic, goes through `finish`,
//! which resets `is_processing` and puts unresolved items back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shared::{
    context_debug, context_error, context_info, SchedulerEvent, SchedulerPhase, WorkItem,
};
use crate::error::SchedulerResult;
use crate::state::SchedulerInner;
use crate::types::{Execution, Outcome, SubBurst};
use super::executor::{AttemptObserver, ItemExecutor};
use super::pacing::{cancellable_sleep, PacingChange};
use super::partitioner::Partitioner;

/// How a drain loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// Backlog empty
    Completed,
    /// Cancelled by pause, stop, disconnect or shutdown
    Interrupted,
}

/// Start a drain loop if every guard holds; returns whether one was spawned
///
/// When a cancelled loop is still winding down the start is deferred until it
/// exits instead of spawning a second loop.
pub(crate) async fn try_start(inner: &Arc<SchedulerInner>) -> bool {
    let mut state = inner.state.lock().await;
    if state.is_processing {
        if state.cancel.is_cancelled() && state.connected && !state.is_paused {
            state.resume_after_exit = true;
        }
        return false;
    }
    if !state.connected || state.is_paused || state.backlog.is_empty() {
        return false;
    }
    if let Some(resume_at) = state.pacing.cap_reset_at(Utc::now()) {
        let cap = state.pacing.config().daily_success_cap.unwrap_or_default();
        drop(state);
        context_info!(inner.context, cap, "Daily success cap reached, not starting");
        inner.emit(SchedulerEvent::DailyCapReached { cap, resume_at });
        return false;
    }

    state.is_processing = true;
    state.resume_after_exit = false;
    state.phase = SchedulerPhase::Draining;
    state.cancel = CancellationToken::new();
    let cancel = state.cancel.clone();
    drop(state);

    tokio::spawn(supervise(inner.clone(), cancel));
    true
}

async fn supervise(inner: Arc<SchedulerInner>, mut cancel: CancellationToken) {
    loop {
        let worker = tokio::spawn(run_loop(inner.clone(), cancel));
        let result = worker.await;
        match finish(&inner, result).await {
            Some(next) => cancel = next,
            None => break,
        }
    }
}

/// Clean up after a loop exit; returns a fresh token when a deferred resume is due
async fn finish(
    inner: &SchedulerInner,
    result: Result<SchedulerResult<LoopExit>, JoinError>,
) -> Option<CancellationToken> {
    let fault = match result {
        Ok(Ok(exit)) => {
            context_debug!(inner.context, ?exit, "Drain loop exited");
            None
        }
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) if e.is_panic() => Some(format!("drain loop panicked: {e}")),
        Err(e) => Some(format!("drain loop aborted: {e}")),
    };

    let (restart, remaining) = {
        let mut state = inner.state.lock().await;
        state.restore_in_flight();
        let restart = fault.is_none()
            && state.resume_after_exit
            && state.connected
            && !state.is_paused
            && !state.backlog.is_empty();
        state.resume_after_exit = false;
        let next = if restart {
            state.phase = SchedulerPhase::Draining;
            state.cancel = CancellationToken::new();
            Some(state.cancel.clone())
        } else {
            state.is_processing = false;
            state.phase = state.resting_phase();
            None
        };
        (next, state.backlog.len())
    };

    if let Some(reason) = fault {
        context_error!(inner.context, reason = %reason, remaining, "Drain loop fault");
        inner.emit(SchedulerEvent::SchedulerFault { reason, remaining });
    }
    if restart.is_some() {
        context_info!(inner.context, remaining, "Resuming deferred drain");
    }
    inner.persist_backlog().await;
    restart
}

/// Pacing and retry bookkeeping for the items of one batch
struct BatchObserver<'a> {
    inner: &'a SchedulerInner,
    batch_id: Uuid,
}

#[async_trait]
impl<'a> AttemptObserver for BatchObserver<'a> {
    async fn on_attempt(&self, _item: &WorkItem, outcome: &Outcome) {
        let (change, item_bounds, batch_bounds) = {
            let mut state = self.inner.state.lock().await;
            let change = state.pacing.record_outcome(outcome);
            (change, state.pacing.inter_item_bounds(), state.pacing.inter_batch_bounds())
        };

        if change == PacingChange::Unchanged {
            return;
        }
        self.inner.report_pacing_change(change, item_bounds, batch_bounds);
        self.inner.persist_state().await;
    }

    async fn on_retry(&self, item: &WorkItem, attempt: u32, max_attempts: u32, delay: Duration, reason: &str) {
        self.inner.emit(SchedulerEvent::ItemRetry {
            batch_id: self.batch_id,
            identifier: item.target_identifier.clone(),
            attempt,
            max_attempts,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            reason: reason.to_string(),
        });
    }
}

/// One drained slice, already partitioned
struct Batch {
    id: Uuid,
    group: String,
    count: usize,
    bursts: Vec<SubBurst>,
}

enum SliceEnd {
    Done { processed: usize },
    CapReached,
    Interrupted,
}

pub(crate) async fn run_loop(
    inner: Arc<SchedulerInner>,
    cancel: CancellationToken,
) -> SchedulerResult<LoopExit> {
    let executor = ItemExecutor::new(inner.client.clone(), inner.config.retry.clone());
    let partitioner = Partitioner::new(inner.config.bursts.clone());
    let mut rng = {
        let mut state = inner.state.lock().await;
        StdRng::seed_from_u64(state.rng.r#gen())
    };

    loop {
        if cancel.is_cancelled() {
            return Ok(LoopExit::Interrupted);
        }
        if !wait_for_daily_cap(&inner, &cancel).await {
            return Ok(LoopExit::Interrupted);
        }

        let Some(batch) = drain_next(&inner, &partitioner, &mut rng).await else {
            let totals = inner.state.lock().await.totals;
            inner.emit(SchedulerEvent::QueueCompleted { totals });
            return Ok(LoopExit::Completed);
        };
        let batch_id = batch.id;

        let processed = match run_slice(&inner, &executor, batch, &cancel, &mut rng).await {
            SliceEnd::Done { processed } => processed,
            SliceEnd::CapReached => continue,
            SliceEnd::Interrupted => return Ok(LoopExit::Interrupted),
        };

        // Cooldown
        let (remaining, totals, next_delay) = {
            let mut state = inner.state.lock().await;
            state.in_flight.clear();
            let remaining = state.backlog.len();
            let next_delay = if remaining > 0 {
                Some(state.pacing.next_inter_batch_delay(&mut rng))
            } else {
                None
            };
            (remaining, state.totals, next_delay)
        };
        inner.persist_all().await;

        context_info!(
            inner.context,
            batch_id = %batch_id,
            processed,
            remaining,
            "Batch done"
        );
        inner.emit(SchedulerEvent::BatchDone {
            batch_id,
            processed,
            totals,
            remaining,
            next_batch_in_ms: next_delay.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        });

        let Some(delay) = next_delay else {
            inner.emit(SchedulerEvent::QueueCompleted { totals });
            return Ok(LoopExit::Completed);
        };

        inner.set_phase(SchedulerPhase::Cooldown).await;
        if !cancellable_sleep(delay, &cancel).await {
            return Ok(LoopExit::Interrupted);
        }
    }
}

/// Draw the next slice, mark it in flight and announce it
async fn drain_next(
    inner: &SchedulerInner,
    partitioner: &Partitioner,
    rng: &mut StdRng,
) -> Option<Batch> {
    let (batch, remaining) = {
        let mut state = inner.state.lock().await;
        let slice = state
            .backlog
            .drain_slice(inner.config.slice_size, inner.config.group_affinity);
        let group = slice.first()?.target_group.clone();
        state.in_flight = slice.clone();
        state.phase = SchedulerPhase::Draining;
        let batch = Batch {
            id: Uuid::new_v4(),
            group,
            count: slice.len(),
            bursts: partitioner.partition(slice, rng),
        };
        (batch, state.backlog.len())
    };

    inner.persist_backlog().await;
    inner.cache.lock().await.begin_slice();

    context_info!(
        inner.context,
        batch_id = %batch.id,
        group = %batch.group,
        count = batch.count,
        sub_bursts = batch.bursts.len(),
        "Batch start"
    );
    inner.emit(SchedulerEvent::BatchStart {
        batch_id: batch.id,
        group: batch.group.clone(),
        count: batch.count,
        sub_bursts: batch.bursts.len(),
        remaining,
    });
    Some(batch)
}

async fn run_slice(
    inner: &SchedulerInner,
    executor: &ItemExecutor,
    batch: Batch,
    cancel: &CancellationToken,
    rng: &mut StdRng,
) -> SliceEnd {
    let observer = BatchObserver {
        inner,
        batch_id: batch.id,
    };
    let total_bursts = batch.bursts.len();
    let mut processed = 0;

    for (burst_index, SubBurst { items, pause_after }) in batch.bursts.into_iter().enumerate() {
        inner.emit(SchedulerEvent::SubBurstStart {
            batch_id: batch.id,
            burst_index: burst_index + 1,
            total_bursts,
            identifiers: items.iter().map(|item| item.target_identifier.clone()).collect(),
        });
        for (position, mut item) in items.into_iter().enumerate() {
            if position > 0 {
                let delay = inner.state.lock().await.pacing.next_inter_item_delay(rng);
                if !cancellable_sleep(delay, cancel).await {
                    return SliceEnd::Interrupted;
                }
            }
            if cancel.is_cancelled() {
                return SliceEnd::Interrupted;
            }

            {
                let mut state = inner.state.lock().await;
                if state.pacing.cap_reset_at(Utc::now()).is_some() {
                    state.restore_in_flight();
                    drop(state);
                    inner.persist_backlog().await;
                    return SliceEnd::CapReached;
                }
                state.phase = SchedulerPhase::Executing;
            }

            match executor
                .execute(&mut item, &inner.cache, cancel, rng, &observer)
                .await
            {
                Execution::Interrupted => {
                    inner.state.lock().await.sync_attempts(&item);
                    return SliceEnd::Interrupted;
                }
                Execution::Done(outcome) => {
                    record_result(inner, batch.id, &item, &outcome).await;
                    processed += 1;
                }
            }
        }

        let last = burst_index + 1 == total_bursts;
        if !last && !pause_after.is_zero() {
            inner.set_phase(SchedulerPhase::Waiting).await;
            if !countdown(inner, batch.id, burst_index, total_bursts, pause_after, cancel).await {
                return SliceEnd::Interrupted;
            }
        }
    }

    SliceEnd::Done { processed }
}

async fn record_result(inner: &SchedulerInner, batch_id: Uuid, item: &WorkItem, outcome: &Outcome) {
    {
        let mut state = inner.state.lock().await;
        state.complete_in_flight(item);
        outcome.tally(&mut state.totals);
    }

    context_debug!(
        inner.context,
        group = %item.target_group,
        identifier = %item.target_identifier,
        attempts = item.attempt_count,
        "Item resolved: {:?}",
        outcome
    );
    inner.emit(SchedulerEvent::ItemResult {
        batch_id,
        group: item.target_group.clone(),
        identifier: item.target_identifier.clone(),
        status: outcome.status(),
        reason: outcome.reason().map(str::to_string),
        attempts: item.attempt_count,
    });
}

/// Pause between sub-bursts, announcing the time left every countdown interval
async fn countdown(
    inner: &SchedulerInner,
    batch_id: Uuid,
    burst_index: usize,
    total_bursts: usize,
    pause: Duration,
    cancel: &CancellationToken,
) -> bool {
    let interval = Duration::from_secs(inner.config.countdown_interval_secs.max(1));
    let deadline = Instant::now() + pause;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        inner.emit(SchedulerEvent::SubBurstWait {
            batch_id,
            burst_index: burst_index + 1,
            total_bursts,
            remaining_secs: remaining.as_secs_f64().ceil() as u64,
        });
        if !cancellable_sleep(remaining.min(interval), cancel).await {
            return false;
        }
    }
}

/// Hold while the daily success cap is reached; false when cancelled
async fn wait_for_daily_cap(inner: &SchedulerInner, cancel: &CancellationToken) -> bool {
    loop {
        let (resume_at, cap) = {
            let mut state = inner.state.lock().await;
            let resume_at = state.pacing.cap_reset_at(Utc::now());
            (resume_at, state.pacing.config().daily_success_cap.unwrap_or_default())
        };
        let Some(resume_at) = resume_at else {
            return true;
        };

        context_info!(inner.context, cap, resume_at = %resume_at, "Daily success cap reached");
        inner.emit(SchedulerEvent::DailyCapReached { cap, resume_at });
        inner.set_phase(SchedulerPhase::Waiting).await;

        let wait = (resume_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if !cancellable_sleep(wait.max(Duration::from_secs(1)), cancel).await {
            return false;
        }
    }
}
