//! Test fixtures with reusable data

use shared::{BurstPlan, BurstTable, ContextId, DelayRange, SchedulerConfig, WorkItem};

pub struct TestFixtures;

impl TestFixtures {
    pub const CONTEXT: &'static str = "acct-test";
    pub const GROUP: &'static str = "group-a";
    pub const OTHER_GROUP: &'static str = "group-b";
    pub const SEED: u64 = 42;

    pub fn context() -> ContextId {
        ContextId::parse(Self::CONTEXT).expect("valid fixture context")
    }

    pub fn context_named(name: &str) -> ContextId {
        ContextId::parse(name).expect("valid fixture context")
    }

    /// `count` distinct eight-digit identifiers
    pub fn identifiers(count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("5511{:04}", i)).collect()
    }

    pub fn work_items(group: &str, count: usize) -> Vec<WorkItem> {
        Self::identifiers(count)
            .into_iter()
            .map(|id| WorkItem::new(group, id))
            .collect()
    }

    /// Default pacing shape with a fixed seed so draws are reproducible
    pub fn config() -> SchedulerConfig {
        SchedulerConfig {
            rng_seed: Some(Self::SEED),
            ..SchedulerConfig::default()
        }
    }

    /// Short delays and a single burst per slice, for tests that only care about outcomes
    pub fn quick_config() -> SchedulerConfig {
        let mut config = Self::config();
        config.pacing.inter_item = DelayRange::new(1.0, 1.0);
        config.pacing.inter_batch = DelayRange::new(5.0, 5.0);
        config.retry.base_delay_secs = 1.0;
        let mut bursts = BurstTable::default();
        for size in 1..=5 {
            bursts
                .plans
                .insert(size, vec![BurstPlan::new(vec![size], vec![0])]);
        }
        config.bursts = bursts;
        config
    }
}
