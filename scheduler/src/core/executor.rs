//! Single-item execution with membership check, classification and retry

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::rngs::StdRng;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use shared::{delay_from_secs, RetryConfig, WorkItem};
use crate::error::ClientError;
use crate::traits::MembershipClient;
use crate::types::{AddResultCode, Execution, Outcome};
use super::backlog::{canonical_handle, normalize_identifier};
use super::membership_cache::MembershipCache;
use super::pacing::cancellable_sleep;

pub const GROUP_UNREACHABLE: &str = "group unreachable";

/// Callbacks fired while an item is being worked
#[async_trait]
pub trait AttemptObserver: Send + Sync {
    /// Called once per attempt outcome, including intermediate transient ones
    async fn on_attempt(&self, item: &WorkItem, outcome: &Outcome);

    /// Called before sleeping ahead of a retry
    async fn on_retry(&self, item: &WorkItem, attempt: u32, max_attempts: u32, delay: Duration, reason: &str);
}

/// Map a raw add result onto an outcome
pub fn classify(result: Result<AddResultCode, ClientError>) -> Outcome {
    match result {
        Ok(AddResultCode::Success) => Outcome::Success,
        Ok(AddResultCode::AlreadyMember) => Outcome::AlreadyPresent,
        Ok(AddResultCode::Forbidden) => Outcome::PermanentFailure("forbidden".to_string()),
        Ok(AddResultCode::NotFound) => Outcome::PermanentFailure("not found".to_string()),
        Ok(AddResultCode::RateLimited) => Outcome::TransientFailure("rate limited".to_string()),
        Ok(AddResultCode::ServerError) => Outcome::TransientFailure("server error".to_string()),
        Ok(AddResultCode::Timeout) => Outcome::TransientFailure("timeout".to_string()),
        Err(error) if error.is_transient() => Outcome::TransientFailure(error.to_string()),
        Err(error) => Outcome::PermanentFailure(error.to_string()),
    }
}

/// Jittered exponential delay before retry number `retry` (1-based)
pub fn retry_delay<R: Rng + ?Sized>(config: &RetryConfig, retry: u32, rng: &mut R) -> Duration {
    let exponent = retry.saturating_sub(1) as i32;
    let base = config.base_delay_secs * config.multiplier.powi(exponent);
    let factor = if config.jitter > 0.0 {
        rng.gen_range((1.0 - config.jitter)..=(1.0 + config.jitter))
    } else {
        1.0
    };
    delay_from_secs(base * factor)
}

enum Membership {
    Member,
    NotMember,
    Unreachable,
}

pub struct ItemExecutor {
    client: Arc<dyn MembershipClient>,
    retry: RetryConfig,
}

impl ItemExecutor {
    pub fn new(client: Arc<dyn MembershipClient>, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Work one item to a terminal outcome, or stop early when cancelled
    ///
    /// `item.attempt_count` accumulates across executions of the same item.
    pub async fn execute(
        &self,
        item: &mut WorkItem,
        cache: &Mutex<MembershipCache>,
        cancel: &CancellationToken,
        rng: &mut StdRng,
        observer: &dyn AttemptObserver,
    ) -> Execution {
        let identifier = normalize_identifier(&item.target_identifier);
        let handle = canonical_handle(&identifier);
        let group = item.target_group.clone();

        match self.membership(&group, &handle, cache).await {
            Membership::Unreachable => {
                let outcome = Outcome::PermanentFailure(GROUP_UNREACHABLE.to_string());
                observer.on_attempt(item, &outcome).await;
                return Execution::Done(outcome);
            }
            Membership::Member => {
                observer.on_attempt(item, &Outcome::AlreadyPresent).await;
                return Execution::Done(Outcome::AlreadyPresent);
            }
            Membership::NotMember => {}
        }

        let max_attempts = self.retry.max_retries + 1;
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Execution::Interrupted;
            }
            attempt += 1;
            item.attempt_count += 1;

            let outcome = classify(self.client.add_member(&group, &identifier).await);
            observer.on_attempt(item, &outcome).await;

            match outcome {
                Outcome::TransientFailure(reason) if attempt < max_attempts => {
                    let delay = retry_delay(&self.retry, attempt, rng);
                    debug!(
                        group = %group,
                        identifier = %identifier,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Retrying after transient failure: {}",
                        reason
                    );
                    observer.on_retry(item, attempt + 1, max_attempts, delay, &reason).await;
                    if !cancellable_sleep(delay, cancel).await {
                        return Execution::Interrupted;
                    }
                }
                outcome => {
                    if outcome.is_success() {
                        cache.lock().await.record_member(&group, &handle);
                    }
                    return Execution::Done(outcome);
                }
            }
        }
    }

    async fn membership(&self, group: &str, handle: &str, cache: &Mutex<MembershipCache>) -> Membership {
        {
            let cache = cache.lock().await;
            if cache.is_unreachable(group) {
                return Membership::Unreachable;
            }
            if let Some(known) = cache.contains(group, handle) {
                return if known { Membership::Member } else { Membership::NotMember };
            }
        }

        // The cache lock is not held across the remote call
        match self.client.fetch_group_members(group).await {
            Ok(members) => {
                let mut cache = cache.lock().await;
                cache.populate(group, &members);
                match cache.contains(group, handle) {
                    Some(true) => Membership::Member,
                    _ => Membership::NotMember,
                }
            }
            Err(error) => {
                debug!(group = %group, error = %error, "Group member fetch failed");
                cache.lock().await.mark_unreachable(group);
                Membership::Unreachable
            }
        }
    }
}
