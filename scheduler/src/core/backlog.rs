//! FIFO backlog of pending work items
//!
//! Validation and deduplication happen at enqueue time so nothing malformed
//! ever reaches the drain loop.

use std::collections::{HashSet, VecDeque};

use shared::{IdentifierRules, WorkItem};
use crate::error::{SchedulerError, SchedulerResult};
use crate::types::EnqueueReport;

/// Characters stripped from identifiers before validation
const SEPARATORS: [char; 6] = [' ', '+', '-', '.', '(', ')'];

/// Strip formatting separators from a raw identifier
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().chars().filter(|c| !SEPARATORS.contains(c)).collect()
}

/// Canonical comparison handle: the digits of the local part before any `@`
pub fn canonical_handle(raw: &str) -> String {
    let local = raw.split('@').next().unwrap_or_default();
    local.chars().filter(char::is_ascii_digit).collect()
}

/// Normalized identifier if it satisfies `rules`
pub fn validate_identifier(raw: &str, rules: &IdentifierRules) -> Option<String> {
    let normalized = normalize_identifier(raw);
    let valid = (rules.min_len..=rules.max_len).contains(&normalized.len())
        && normalized.chars().all(|c| c.is_ascii_digit());
    valid.then_some(normalized)
}

pub struct Backlog {
    items: VecDeque<WorkItem>,
    rules: IdentifierRules,
}

impl Backlog {
    pub fn new(rules: IdentifierRules) -> Self {
        Self {
            items: VecDeque::new(),
            rules,
        }
    }

    /// Rebuild from a persisted snapshot, preserving order
    pub fn from_items(rules: IdentifierRules, items: Vec<WorkItem>) -> Self {
        Self {
            items: items.into(),
            rules,
        }
    }

    /// Validate and append identifiers for `group`
    ///
    /// `in_flight` holds items already drained into the running slice; they
    /// count as present for deduplication.
    pub fn enqueue(
        &mut self,
        group: &str,
        identifiers: &[String],
        in_flight: &[WorkItem],
    ) -> SchedulerResult<EnqueueReport> {
        let group = group.trim();
        if group.is_empty() {
            return Err(SchedulerError::validation("target group must not be empty"));
        }

        let known: HashSet<&str> = self
            .items
            .iter()
            .chain(in_flight.iter())
            .filter(|item| item.target_group == group)
            .map(|item| item.target_identifier.as_str())
            .collect();

        let mut report = EnqueueReport::default();
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for raw in identifiers {
            let Some(identifier) = validate_identifier(raw, &self.rules) else {
                report.rejected_invalid.push(raw.clone());
                continue;
            };
            if known.contains(identifier.as_str()) || !seen.insert(identifier.clone()) {
                report.rejected_duplicates.push(identifier);
                continue;
            }
            accepted.push(WorkItem::new(group, identifier));
        }

        report.accepted = accepted.len();
        self.items.extend(accepted);
        Ok(report)
    }

    /// Remove the next slice of at most `max_size` items
    ///
    /// With `group_affinity` the slice holds only items sharing the front
    /// item's group, taken in FIFO order from anywhere in the backlog.
    pub fn drain_slice(&mut self, max_size: usize, group_affinity: bool) -> Vec<WorkItem> {
        if !group_affinity {
            let take = max_size.min(self.items.len());
            return self.items.drain(..take).collect();
        }

        let Some(group) = self.items.front().map(|item| item.target_group.clone()) else {
            return Vec::new();
        };

        let mut slice = Vec::with_capacity(max_size);
        let mut rest = VecDeque::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if slice.len() < max_size && item.target_group == group {
                slice.push(item);
            } else {
                rest.push_back(item);
            }
        }
        self.items = rest;
        slice
    }

    /// Put unprocessed items back at the head, keeping their order
    pub fn restore_front(&mut self, items: Vec<WorkItem>) {
        for item in items.into_iter().rev() {
            self.items.push_front(item);
        }
    }

    /// Drop every item, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.items.len();
        self.items.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter()
    }
}
