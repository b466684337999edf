//! End-to-end drain scenarios
//!
//! Every test runs on a paused tokio clock, so minute-long pacing delays
//! elapse instantly while keeping their order.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{RecordingEventSink, SchedulerBuilder, TestFixtures, TestHelpers};
use scheduler::services::MemoryStateStore;
use scheduler::{AddResultCode, ClientError, MembershipClient, Scheduler, StateStore};
use shared::{ItemStatus, SchedulerEvent, SchedulerPhase};

/// Five identifiers, one already in the group: one skip, four adds
#[tokio::test(start_paused = true)]
async fn test_already_present_member_is_skipped() {
    let identifiers = TestFixtures::identifiers(5);
    let existing = format!("{}@host", identifiers[2]);

    let (scheduler, events) = SchedulerBuilder::new()
        .with_client(move |client| {
            client
                .expect_fetch_group_members()
                .times(1)
                .returning(move |_| Ok(vec![existing.clone()]));
            client
                .expect_add_member()
                .times(4)
                .returning(|_, _| Ok(AddResultCode::Success));
        })
        .build();

    let report = scheduler.enqueue(TestFixtures::GROUP, &identifiers).await.unwrap();
    assert_eq!(report.accepted, 5);

    let done = events.wait_for("batch_done").await;
    let SchedulerEvent::BatchDone { totals, processed, remaining, next_batch_in_ms, .. } = done else {
        unreachable!()
    };
    assert_eq!(processed, 5);
    assert_eq!(remaining, 0);
    assert_eq!(next_batch_in_ms, None);
    assert_eq!(totals.already_present, 1);
    assert_eq!(totals.succeeded, 4);

    events.wait_for("queue_completed").await;
    let already: Vec<_> = events
        .item_statuses()
        .into_iter()
        .filter(|(status, _)| *status == ItemStatus::AlreadyPresent)
        .collect();
    assert_eq!(already.len(), 1);
}

/// Rate limited twice, then accepted
#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let (scheduler, events) = SchedulerBuilder::new()
        .with_client(move |client| {
            client.expect_fetch_group_members().returning(|_| Ok(vec![]));
            client.expect_add_member().times(3).returning(move |_, _| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(AddResultCode::RateLimited)
                } else {
                    Ok(AddResultCode::Success)
                }
            });
        })
        .build();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(1))
        .await
        .unwrap();
    events.wait_for("queue_completed").await;

    assert_eq!(events.count("item_retry"), 2);
    let SchedulerEvent::ItemRetry { attempt, delay_ms, .. } = events.wait_for("item_retry").await else {
        unreachable!()
    };
    assert_eq!(attempt, 2);
    // 5s base with ±35% jitter
    assert!((3_249..=6_750).contains(&delay_ms));
    assert_eq!(events.item_statuses(), vec![(ItemStatus::Success, None)]);
    let SchedulerEvent::ItemResult { attempts, .. } = events.wait_for("item_result").await else {
        unreachable!()
    };
    assert_eq!(attempts, 3);

    let status = scheduler.status().await;
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.backoff_level, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// A failed member fetch fails the whole slice without a single add
#[tokio::test(start_paused = true)]
async fn test_unreachable_group_fails_slice() {
    let (scheduler, events) = SchedulerBuilder::new()
        .with_client(|client| {
            client
                .expect_fetch_group_members()
                .times(1)
                .returning(|_| Err(ClientError::Timeout));
            client.expect_add_member().times(0);
        })
        .build();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(3))
        .await
        .unwrap();
    events.wait_for("queue_completed").await;

    let statuses = events.item_statuses();
    assert_eq!(statuses.len(), 3);
    for (status, reason) in statuses {
        assert_eq!(status, ItemStatus::Error);
        assert_eq!(reason.as_deref(), Some("group unreachable"));
    }
    assert_eq!(scheduler.status().await.totals.failed, 3);
    assert_eq!(events.count("item_retry"), 0);
}

/// Items persisted by a previous run are processed exactly once after restore
#[tokio::test(start_paused = true)]
async fn test_restore_processes_persisted_items() {
    let store = Arc::new(MemoryStateStore::new());
    store
        .seed_backlog(&TestFixtures::context(), TestFixtures::work_items(TestFixtures::GROUP, 3))
        .await;

    let (scheduler, events) = SchedulerBuilder::new()
        .with_store(store.clone())
        .with_client(|client| {
            client.expect_fetch_group_members().returning(|_| Ok(vec![]));
            client
                .expect_add_member()
                .times(3)
                .returning(|_, _| Ok(AddResultCode::Success));
        })
        .build();

    assert_eq!(scheduler.restore().await.unwrap(), 3);
    events.wait_for("queue_completed").await;

    assert_eq!(scheduler.status().await.totals.succeeded, 3);
    assert!(store.load_backlog(&TestFixtures::context()).await.unwrap().is_empty());
}

/// Pausing during a sub-burst wait stops the loop at once and keeps the rest
#[tokio::test(start_paused = true)]
async fn test_pause_during_sub_burst_wait() {
    let (scheduler, events) = SchedulerBuilder::new()
        .with_client(TestHelpers::accepting_client)
        .build();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(5))
        .await
        .unwrap();
    events.wait_for("sub_burst_wait").await;

    scheduler.pause().await;
    TestHelpers::settle().await;

    let status = scheduler.status().await;
    assert!(!status.is_processing);
    assert_eq!(status.phase, SchedulerPhase::Paused);
    let processed = events.count("item_result");
    assert!(processed >= 2 && processed < 5);
    assert_eq!(status.backlog_size, 5 - processed);
    assert_eq!(status.in_flight, 0);
    assert_eq!(events.count("paused"), 1);

    assert!(scheduler.resume().await);
    events.wait_for("queue_completed").await;
    assert_eq!(scheduler.status().await.totals.succeeded, 5);
}

/// Pause immediately followed by resume never runs two loops
#[tokio::test(start_paused = true)]
async fn test_resume_while_winding_down_is_deferred() {
    let (scheduler, events) = SchedulerBuilder::new()
        .with_quick_pacing()
        .with_client(|client| {
            client.expect_fetch_group_members().returning(|_| Ok(vec![]));
            client
                .expect_add_member()
                .times(5)
                .returning(|_, _| Ok(AddResultCode::Success));
        })
        .build();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(5))
        .await
        .unwrap();
    events.wait_for("item_result").await;

    scheduler.pause().await;
    // The cancelled loop has not exited yet
    assert!(!scheduler.resume().await);

    events.wait_for("queue_completed").await;
    assert_eq!(events.count("queue_completed"), 1);
    assert_eq!(scheduler.status().await.totals.succeeded, 5);
    TestHelpers::settle().await;
    TestHelpers::assert_idle(&scheduler).await;
}

/// Three transient failures in a row widen the delay bounds
#[tokio::test(start_paused = true)]
async fn test_backoff_engages_after_threshold() {
    let (scheduler, events) = SchedulerBuilder::new()
        .with_quick_pacing()
        .with_client(|client| {
            client.expect_fetch_group_members().returning(|_| Ok(vec![]));
            client
                .expect_add_member()
                .returning(|_, _| Ok(AddResultCode::ServerError));
        })
        .build();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(1))
        .await
        .unwrap();

    let SchedulerEvent::BackoffEngaged { level, consecutive_failures, inter_item_max_secs, .. } =
        events.wait_for("backoff_engaged").await
    else {
        unreachable!()
    };
    assert_eq!(level, 1);
    assert_eq!(consecutive_failures, 3);
    assert!(inter_item_max_secs > 1.0);

    events.wait_for("queue_completed").await;
    let status = scheduler.status().await;
    assert_eq!(status.backoff_level, 1);
    assert_eq!(status.totals.failed, 1);
}

/// A later success resets the failure streak
#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_streak() {
    let (scheduler, events) = SchedulerBuilder::new()
        .with_quick_pacing()
        .with_client(|client| {
            client.expect_fetch_group_members().returning(|_| Ok(vec![]));
            client
                .expect_add_member()
                .returning(|_, identifier| {
                    if identifier.ends_with('1') {
                        Ok(AddResultCode::Timeout)
                    } else {
                        Ok(AddResultCode::Success)
                    }
                });
        })
        .build();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(2))
        .await
        .unwrap();

    events.wait_for_nth("item_result", 1).await;
    assert_eq!(scheduler.status().await.consecutive_failures, 3);

    events.wait_for("queue_completed").await;
    assert_eq!(scheduler.status().await.consecutive_failures, 0);
}

/// Stop discards queued work and reports what was lost
#[tokio::test(start_paused = true)]
async fn test_stop_discards_backlog() {
    let (scheduler, events) = SchedulerBuilder::new()
        .with_client(TestHelpers::accepting_client)
        .build();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(5))
        .await
        .unwrap();
    events.wait_for("item_result").await;

    scheduler.stop().await;
    let SchedulerEvent::Stopped { discarded, totals } = events.wait_for("stopped").await else {
        unreachable!()
    };
    assert_eq!(discarded, 4);
    assert_eq!(totals.succeeded, 1);

    TestHelpers::settle().await;
    let status = scheduler.status().await;
    assert!(!status.is_processing);
    assert_eq!(status.phase, SchedulerPhase::Idle);
    assert_eq!(status.backlog_size, 0);
    assert_eq!(events.count("item_result"), 1);
}

/// Disconnect puts in-flight items back, reconnect refetches and resumes
#[tokio::test(start_paused = true)]
async fn test_reconnect_resumes_with_fresh_cache() {
    let (scheduler, events) = SchedulerBuilder::new()
        .with_quick_pacing()
        .with_client(|client| {
            client
                .expect_fetch_group_members()
                .times(2)
                .returning(|_| Ok(vec![]));
            client
                .expect_add_member()
                .times(5)
                .returning(|_, _| Ok(AddResultCode::Success));
        })
        .build();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(5))
        .await
        .unwrap();
    events.wait_for("item_result").await;

    scheduler.set_connected(false).await;
    TestHelpers::settle().await;
    let status = scheduler.status().await;
    assert!(!status.is_processing);
    assert!(!status.connected);
    assert_eq!(status.backlog_size, 4);
    assert_eq!(status.in_flight, 0);

    // Resume is refused while offline
    scheduler.pause().await;
    assert!(!scheduler.resume().await);
    TestHelpers::assert_idle(&scheduler).await;

    scheduler.set_connected(true).await;
    events.wait_for("queue_completed").await;
    assert_eq!(scheduler.status().await.totals.succeeded, 5);
    assert_eq!(events.count("connectivity_changed"), 2);
}

/// Slices follow group affinity and cool down between batches
#[tokio::test(start_paused = true)]
async fn test_multiple_slices_with_cooldown() {
    let (scheduler, events) = SchedulerBuilder::new()
        .with_quick_pacing()
        .with_config(|config| config.slice_size = 2)
        .with_client(TestHelpers::accepting_client)
        .build();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(3))
        .await
        .unwrap();
    scheduler
        .enqueue(TestFixtures::OTHER_GROUP, &TestFixtures::identifiers(1))
        .await
        .unwrap();

    events.wait_for("queue_completed").await;
    let groups: Vec<String> = events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            SchedulerEvent::BatchStart { group, count, .. } => Some(format!("{group}:{count}")),
            _ => None,
        })
        .collect();
    assert_eq!(
        groups,
        vec![
            format!("{}:2", TestFixtures::GROUP),
            format!("{}:1", TestFixtures::GROUP),
            format!("{}:1", TestFixtures::OTHER_GROUP),
        ]
    );

    let SchedulerEvent::BatchDone { next_batch_in_ms, remaining, .. } =
        events.wait_for_nth("batch_done", 1).await
    else {
        unreachable!()
    };
    assert_eq!(remaining, 2);
    assert_eq!(next_batch_in_ms, Some(5_000));
}

/// Sub-burst countdown announces the remaining wait every interval
#[tokio::test(start_paused = true)]
async fn test_sub_burst_countdown_events() {
    let (scheduler, events) = SchedulerBuilder::new()
        .with_config(|config| {
            config.bursts.plans.insert(
                2,
                vec![shared::BurstPlan::new(vec![1, 1], vec![30, 0])],
            );
        })
        .with_client(TestHelpers::accepting_client)
        .build();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(2))
        .await
        .unwrap();
    events.wait_for("queue_completed").await;

    let countdown: Vec<u64> = events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            SchedulerEvent::SubBurstWait { remaining_secs, burst_index, total_bursts, .. } => {
                assert_eq!((burst_index, total_bursts), (1, 2));
                Some(remaining_secs)
            }
            _ => None,
        })
        .collect();
    assert_eq!(countdown, vec![30, 20, 10]);

    let mut announced = Vec::new();
    for event in events.events() {
        if let SchedulerEvent::SubBurstStart { burst_index, total_bursts, identifiers, .. } = event {
            assert_eq!((burst_index, total_bursts), (announced.len() + 1, 2));
            assert_eq!(identifiers.len(), 1);
            announced.extend(identifiers);
        }
    }
    announced.sort();
    assert_eq!(announced, TestFixtures::identifiers(2));
}

/// Client whose first `panics` add calls panic, later ones succeed
struct PanickingClient {
    panics: AtomicU32,
}

impl PanickingClient {
    fn new(panics: u32) -> Self {
        Self {
            panics: AtomicU32::new(panics),
        }
    }
}

#[async_trait]
impl MembershipClient for PanickingClient {
    async fn fetch_group_members(&self, _group: &str) -> Result<Vec<String>, ClientError> {
        Ok(vec![])
    }

    async fn add_member(&self, _group: &str, _identifier: &str) -> Result<AddResultCode, ClientError> {
        let left = self.panics.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if left.is_ok() {
            panic!("client exploded");
        }
        Ok(AddResultCode::Success)
    }
}

/// A panicking client is contained: fault event, loop reset, backlog kept
#[tokio::test(start_paused = true)]
async fn test_panic_in_loop_is_reported_as_fault() {
    let events = Arc::new(RecordingEventSink::default());
    let scheduler = Scheduler::new(
        TestFixtures::context(),
        TestFixtures::config(),
        Arc::new(PanickingClient::new(u32::MAX)),
        Arc::new(MemoryStateStore::new()),
        events.clone(),
    )
    .unwrap();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(2))
        .await
        .unwrap();

    let SchedulerEvent::SchedulerFault { reason, remaining } = events.wait_for("scheduler_fault").await
    else {
        unreachable!()
    };
    assert!(reason.contains("panicked"));
    assert_eq!(remaining, 2);

    let status = scheduler.status().await;
    assert!(!status.is_processing);
    assert_eq!(status.phase, SchedulerPhase::Idle);
    assert_eq!(status.backlog_size, 2);
    assert_eq!(events.count("item_result"), 0);
}

/// Hitting the daily cap between two items of a slice holds the rest of it
#[tokio::test(start_paused = true)]
async fn test_daily_cap_reached_mid_slice() {
    let store = Arc::new(MemoryStateStore::new());
    let (scheduler, events) = SchedulerBuilder::new()
        .with_quick_pacing()
        .with_config(|config| config.pacing.daily_success_cap = Some(1))
        .with_store(store.clone())
        .with_client(|client| {
            client.expect_fetch_group_members().returning(|_| Ok(vec![]));
            client
                .expect_add_member()
                .times(1)
                .returning(|_, _| Ok(AddResultCode::Success));
        })
        .build();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(3))
        .await
        .unwrap();
    let SchedulerEvent::DailyCapReached { cap, .. } = events.wait_for("daily_cap_reached").await else {
        unreachable!()
    };
    assert_eq!(cap, 1);
    TestHelpers::settle().await;

    let status = scheduler.status().await;
    assert!(status.is_processing);
    assert_eq!(status.phase, SchedulerPhase::Waiting);
    assert_eq!(status.successes_today, 1);
    assert_eq!(status.backlog_size, 2);
    assert_eq!(status.in_flight, 0);
    assert_eq!(events.count("item_result"), 1);
    assert_eq!(events.count("batch_done"), 0);
    assert_eq!(store.load_backlog(&TestFixtures::context()).await.unwrap().len(), 2);

    // Pausing aborts the hold until midnight
    scheduler.pause().await;
    TestHelpers::settle().await;
    let status = scheduler.status().await;
    assert!(!status.is_processing);
    assert_eq!(status.phase, SchedulerPhase::Paused);
    assert_eq!(status.backlog_size, 2);
}

/// After a fault the preserved backlog is restarted by `resume`
#[tokio::test(start_paused = true)]
async fn test_resume_restarts_backlog_after_fault() {
    let events = Arc::new(RecordingEventSink::default());
    let scheduler = Scheduler::new(
        TestFixtures::context(),
        TestFixtures::quick_config(),
        Arc::new(PanickingClient::new(1)),
        Arc::new(MemoryStateStore::new()),
        events.clone(),
    )
    .unwrap();

    let identifiers = TestFixtures::identifiers(2);
    scheduler.enqueue(TestFixtures::GROUP, &identifiers).await.unwrap();
    events.wait_for("scheduler_fault").await;
    TestHelpers::settle().await;

    // Re-enqueueing the same work is all duplicates and starts nothing
    let report = scheduler.enqueue(TestFixtures::GROUP, &identifiers).await.unwrap();
    assert_eq!(report.accepted, 0);
    TestHelpers::assert_idle(&scheduler).await;
    assert_eq!(scheduler.status().await.backlog_size, 2);

    assert!(scheduler.resume().await);
    events.wait_for("queue_completed").await;
    assert_eq!(events.count("resumed"), 0);
    let status = scheduler.status().await;
    assert_eq!(status.totals.succeeded, 2);
    assert_eq!(status.backlog_size, 0);
}

/// The persisted snapshot holds the in-flight slice while it runs
#[tokio::test(start_paused = true)]
async fn test_in_flight_slice_is_persisted() {
    let store = Arc::new(MemoryStateStore::new());
    let (scheduler, events) = SchedulerBuilder::new()
        .with_store(store.clone())
        .with_client(TestHelpers::accepting_client)
        .build();

    scheduler
        .enqueue(TestFixtures::GROUP, &TestFixtures::identifiers(5))
        .await
        .unwrap();
    events.wait_for("batch_start").await;
    TestHelpers::settle().await;

    let persisted = store.load_backlog(&TestFixtures::context()).await.unwrap();
    assert_eq!(persisted.len(), 5);

    events.wait_for("queue_completed").await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(store.load_backlog(&TestFixtures::context()).await.unwrap().is_empty());
}
