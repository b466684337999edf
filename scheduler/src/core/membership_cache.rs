//! Per-group membership cache with TTL and per-slice unreachable marks

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use super::backlog::canonical_handle;

struct CacheEntry {
    members: HashSet<String>,
    fetched_at: Instant,
}

pub struct MembershipCache {
    entries: HashMap<String, CacheEntry>,
    /// Groups whose fetch failed during the current slice
    unreachable: HashSet<String>,
    ttl: Duration,
}

impl MembershipCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            unreachable: HashSet::new(),
            ttl,
        }
    }

    /// Membership of `handle` in `group`, or `None` when the group must be fetched
    pub fn contains(&self, group: &str, handle: &str) -> Option<bool> {
        let entry = self.entries.get(group)?;
        if entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.members.contains(handle))
    }

    /// Store a freshly fetched member list, canonicalizing every handle
    pub fn populate(&mut self, group: &str, members: &[String]) {
        let members = members
            .iter()
            .map(|member| canonical_handle(member))
            .filter(|handle| !handle.is_empty())
            .collect();
        self.entries.insert(
            group.to_string(),
            CacheEntry {
                members,
                fetched_at: Instant::now(),
            },
        );
        self.unreachable.remove(group);
    }

    /// Record a member added (or found) by the scheduler itself
    pub fn record_member(&mut self, group: &str, handle: &str) {
        if let Some(entry) = self.entries.get_mut(group) {
            entry.members.insert(handle.to_string());
        }
    }

    pub fn mark_unreachable(&mut self, group: &str) {
        self.unreachable.insert(group.to_string());
    }

    pub fn is_unreachable(&self, group: &str) -> bool {
        self.unreachable.contains(group)
    }

    /// Unreachable marks only last for one slice
    pub fn begin_slice(&mut self) {
        self.unreachable.clear();
    }

    /// Forget everything, e.g. after a reconnect
    pub fn invalidate_all(&mut self) {
        self.entries.clear();
        self.unreachable.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let mut cache = MembershipCache::new(Duration::from_secs(600));
        assert_eq!(cache.contains("g", "11111111"), None);

        cache.populate("g", &["11111111@host".to_string(), "+22 222 222".to_string()]);
        assert_eq!(cache.contains("g", "11111111"), Some(true));
        assert_eq!(cache.contains("g", "22222222"), Some(true));
        assert_eq!(cache.contains("g", "33333333"), Some(false));

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(cache.contains("g", "11111111"), None);
    }

    #[test]
    fn test_record_member_only_updates_known_groups() {
        let mut cache = MembershipCache::new(Duration::from_secs(600));
        cache.record_member("missing", "11111111");
        assert_eq!(cache.contains("missing", "11111111"), None);

        cache.populate("g", &[]);
        cache.record_member("g", "11111111");
        assert_eq!(cache.contains("g", "11111111"), Some(true));
    }

    #[test]
    fn test_unreachable_marks_reset_per_slice() {
        let mut cache = MembershipCache::new(Duration::from_secs(600));
        cache.mark_unreachable("g");
        assert!(cache.is_unreachable("g"));
        cache.begin_slice();
        assert!(!cache.is_unreachable("g"));

        cache.populate("g", &["11111111".to_string()]);
        cache.mark_unreachable("h");
        cache.invalidate_all();
        assert_eq!(cache.contains("g", "11111111"), None);
        assert!(!cache.is_unreachable("h"));
    }
}
