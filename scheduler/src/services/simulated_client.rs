//! Simulated membership client
//!
//! Keeps group memberships in memory and injects random transient failures,
//! so the scheduler can be exercised end to end without a real protocol
//! client. Unknown groups behave like groups the account cannot see.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;

use crate::core::canonical_handle;
use crate::error::ClientError;
use crate::traits::MembershipClient;
use crate::types::AddResultCode;

pub struct SimulatedMembershipClient {
    groups: Mutex<HashMap<String, HashSet<String>>>,
    /// Probability that one add call fails transiently
    failure_rate: f64,
    latency: Duration,
    rng: Mutex<StdRng>,
}

impl SimulatedMembershipClient {
    pub fn new(groups: HashMap<String, Vec<String>>, failure_rate: f64, seed: Option<u64>) -> Self {
        let groups = groups
            .into_iter()
            .map(|(group, members)| {
                let members = members.iter().map(|m| canonical_handle(m)).collect();
                (group, members)
            })
            .collect();
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            groups: Mutex::new(groups),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency: Duration::from_millis(150),
            rng: Mutex::new(rng),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make sure a group exists, empty if it was unknown
    pub async fn ensure_group(&self, group: &str) {
        self.groups.lock().await.entry(group.to_string()).or_default();
    }

    pub async fn members(&self, group: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .groups
            .lock()
            .await
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl MembershipClient for SimulatedMembershipClient {
    async fn fetch_group_members(&self, group: &str) -> Result<Vec<String>, ClientError> {
        self.simulate_latency().await;
        self.groups
            .lock()
            .await
            .get(group)
            .map(|members| members.iter().map(|m| format!("{m}@sim")).collect())
            .ok_or_else(|| ClientError::Rejected(format!("unknown group {group}")))
    }

    async fn add_member(&self, group: &str, identifier: &str) -> Result<AddResultCode, ClientError> {
        self.simulate_latency().await;

        let roll: f64 = self.rng.lock().await.r#gen();
        if roll < self.failure_rate {
            // Split injected failures between the two transient codes
            return Ok(if roll < self.failure_rate / 2.0 {
                AddResultCode::RateLimited
            } else {
                AddResultCode::ServerError
            });
        }

        let mut groups = self.groups.lock().await;
        let Some(members) = groups.get_mut(group) else {
            return Ok(AddResultCode::NotFound);
        };
        if members.insert(canonical_handle(identifier)) {
            Ok(AddResultCode::Success)
        } else {
            Ok(AddResultCode::AlreadyMember)
        }
    }
}
