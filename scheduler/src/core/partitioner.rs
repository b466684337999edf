//! Slice → sub-burst partitioning driven by the configured burst table

use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;

use shared::{BurstTable, WorkItem};
use crate::types::SubBurst;

pub struct Partitioner {
    table: BurstTable,
}

impl Partitioner {
    pub fn new(table: BurstTable) -> Self {
        Self { table }
    }

    /// Split a slice into sub-bursts using one randomly drawn plan
    ///
    /// Sizes without a plan run as a single burst. The final burst never
    /// carries a pause since the inter-batch cooldown follows it.
    pub fn partition<R: Rng + ?Sized>(&self, items: Vec<WorkItem>, rng: &mut R) -> Vec<SubBurst> {
        if items.is_empty() {
            return Vec::new();
        }

        let plan = self
            .table
            .candidates(items.len())
            .choose(rng)
            .filter(|plan| plan.total() == items.len());

        let Some(plan) = plan else {
            return vec![SubBurst {
                items,
                pause_after: Duration::ZERO,
            }];
        };

        let mut remaining = items.into_iter();
        let last = plan.sizes.len() - 1;
        plan.sizes
            .iter()
            .zip(&plan.pauses_secs)
            .enumerate()
            .map(|(index, (size, pause))| SubBurst {
                items: remaining.by_ref().take(*size).collect(),
                pause_after: if index == last {
                    Duration::ZERO
                } else {
                    Duration::from_secs(*pause)
                },
            })
            .collect()
    }
}
