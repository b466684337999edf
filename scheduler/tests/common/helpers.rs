//! Test helpers and builder patterns for scheduler tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use scheduler::services::MemoryStateStore;
use scheduler::{AddResultCode, EventSink, MockMembershipClient, Scheduler, StateStore};
use shared::{ContextId, EventEnvelope, ItemStatus, SchedulerConfig, SchedulerEvent};
use super::fixtures::TestFixtures;

/// Upper bound of virtual time a test waits for an event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(6 * 3600);

/// Event sink that keeps every envelope and wakes waiters on each emit
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<EventEnvelope>>,
    notify: Notify,
}

impl EventSink for RecordingEventSink {
    fn emit(&self, envelope: EventEnvelope) {
        self.events.lock().unwrap().push(envelope);
        self.notify.notify_waiters();
    }
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|envelope| envelope.event.clone())
            .collect()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(SchedulerEvent::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    /// Statuses of every `item_result` so far, in emission order
    pub fn item_statuses(&self) -> Vec<(ItemStatus, Option<String>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SchedulerEvent::ItemResult { status, reason, .. } => Some((status, reason)),
                _ => None,
            })
            .collect()
    }

    /// Wait (in virtual time) until the `nth` event of `kind` has been emitted
    pub async fn wait_for_nth(&self, kind: &str, nth: usize) -> SchedulerEvent {
        let waiting = async {
            loop {
                let notified = self.notify.notified();
                if let Some(event) = self
                    .events()
                    .into_iter()
                    .filter(|event| event.kind() == kind)
                    .nth(nth - 1)
                {
                    return event;
                }
                notified.await;
            }
        };
        tokio::time::timeout(EVENT_TIMEOUT, waiting)
            .await
            .unwrap_or_else(|_| panic!("no {kind} event #{nth}; saw {:?}", self.kinds()))
    }

    pub async fn wait_for(&self, kind: &str) -> SchedulerEvent {
        self.wait_for_nth(kind, 1).await
    }
}

/// Builder for schedulers wired to mocks with sensible defaults
pub struct SchedulerBuilder {
    context: ContextId,
    config: SchedulerConfig,
    client: MockMembershipClient,
    store: Arc<dyn StateStore>,
    sink: Arc<RecordingEventSink>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            context: TestFixtures::context(),
            config: TestFixtures::config(),
            client: MockMembershipClient::new(),
            store: Arc::new(MemoryStateStore::new()),
            sink: Arc::new(RecordingEventSink::default()),
        }
    }

    pub fn with_config<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut SchedulerConfig),
    {
        setup(&mut self.config);
        self
    }

    pub fn with_quick_pacing(mut self) -> Self {
        self.config = TestFixtures::quick_config();
        self
    }

    /// Configure the membership client mock with a setup function
    pub fn with_client<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut MockMembershipClient),
    {
        setup(&mut self.client);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn build(self) -> (Scheduler, Arc<RecordingEventSink>) {
        let scheduler = Scheduler::new(
            self.context,
            self.config,
            Arc::new(self.client),
            self.store,
            self.sink.clone(),
        )
        .expect("valid test scheduler");
        (scheduler, self.sink)
    }
}

/// Common test helper functions
pub struct TestHelpers;

impl TestHelpers {
    /// Client whose group is empty and whose adds always succeed
    pub fn accepting_client(client: &mut MockMembershipClient) {
        client.expect_fetch_group_members().returning(|_| Ok(vec![]));
        client
            .expect_add_member()
            .returning(|_, _| Ok(AddResultCode::Success));
    }

    /// Let spawned tasks settle without moving virtual time meaningfully
    pub async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    pub async fn assert_idle(scheduler: &Scheduler) {
        let status = scheduler.status().await;
        assert!(!status.is_processing, "loop should have exited: {:?}", status.phase);
    }
}
