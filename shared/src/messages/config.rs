//! Configuration types
//!
//! Everything tunable about pacing, retry and burst shaping lives here so the
//! operational API can expose and patch it without a restart.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{SharedError, SharedResult};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "SCHEDULER_";

/// Longest delay any pacing or retry setting may produce, one week
pub const MAX_DELAY_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Seconds to a `Duration`, clamped to `0..=MAX_DELAY_SECS`
pub fn delay_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_DELAY_SECS)).unwrap_or_default()
}

/// Whether `secs` grown by `factor` over `steps` escalations leaves the ceiling
fn exceeds_ceiling(secs: f64, factor: f64, steps: u32) -> bool {
    if secs <= 0.0 {
        return false;
    }
    let grown = secs * factor.powi(steps.min(i32::MAX as u32) as i32);
    grown.is_nan() || grown > MAX_DELAY_SECS
}

/// Closed range of delays, in seconds
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayRange {
    pub fn new(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }

    /// Stretch both bounds by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.min_secs * factor, self.max_secs * factor)
    }

    pub fn min(&self) -> Duration {
        delay_from_secs(self.min_secs)
    }

    fn validate(&self, field: &str) -> SharedResult<()> {
        if !self.min_secs.is_finite() || !self.max_secs.is_finite() || self.min_secs < 0.0 {
            return Err(SharedError::config(field, format!("{}..{}", self.min_secs, self.max_secs)));
        }
        if self.min_secs > self.max_secs {
            return Err(SharedError::config(
                field,
                format!("min {} exceeds max {}", self.min_secs, self.max_secs),
            ));
        }
        Ok(())
    }
}

/// Pacing policy configuration (base values, before any backoff is applied)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Delay between two items of the same sub-burst
    pub inter_item: DelayRange,
    /// Cooldown between two slices
    pub inter_batch: DelayRange,
    /// Consecutive failures that raise the backoff level by one
    pub failure_threshold: u32,
    pub item_backoff_factor: f64,
    pub batch_backoff_factor: f64,
    pub max_backoff_level: u32,
    /// Consecutive successes needed to step the backoff level down by one
    pub recovery_successes: u32,
    /// Whether permanent failures also count towards the failure streak
    pub count_permanent_failures: bool,
    /// Optional ceiling of successful additions per UTC day
    pub daily_success_cap: Option<u32>,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            inter_item: DelayRange::new(2.0, 6.0),
            inter_batch: DelayRange::new(600.0, 900.0),
            failure_threshold: 3,
            item_backoff_factor: 1.8,
            batch_backoff_factor: 2.0,
            max_backoff_level: 3,
            recovery_successes: 5,
            count_permanent_failures: false,
            daily_success_cap: None,
        }
    }
}

impl PacingConfig {
    pub fn validate(&self) -> SharedResult<()> {
        self.inter_item.validate("pacing.inter_item")?;
        self.inter_batch.validate("pacing.inter_batch")?;
        if self.failure_threshold == 0 {
            return Err(SharedError::config("pacing.failure_threshold", 0));
        }
        if !self.item_backoff_factor.is_finite() || self.item_backoff_factor <= 1.0 {
            return Err(SharedError::config("pacing.item_backoff_factor", self.item_backoff_factor));
        }
        if !self.batch_backoff_factor.is_finite() || self.batch_backoff_factor <= 1.0 {
            return Err(SharedError::config("pacing.batch_backoff_factor", self.batch_backoff_factor));
        }
        if self.max_backoff_level == 0 {
            return Err(SharedError::config("pacing.max_backoff_level", 0));
        }
        // Bounds at the highest backoff level must stay below the delay ceiling
        let level = self.max_backoff_level;
        if exceeds_ceiling(self.inter_item.max_secs, self.item_backoff_factor, level) {
            let value = format!(
                "{}s at level {level} exceeds {MAX_DELAY_SECS}s",
                self.inter_item.max_secs
            );
            return Err(SharedError::config("pacing.inter_item", value));
        }
        if exceeds_ceiling(self.inter_batch.max_secs, self.batch_backoff_factor, level) {
            let value = format!(
                "{}s at level {level} exceeds {MAX_DELAY_SECS}s",
                self.inter_batch.max_secs
            );
            return Err(SharedError::config("pacing.inter_batch", value));
        }
        if self.recovery_successes == 0 {
            return Err(SharedError::config("pacing.recovery_successes", 0));
        }
        Ok(())
    }

    /// Apply a partial update, returning the candidate without touching `self`
    pub fn patched(&self, patch: &PacingConfigPatch) -> SharedResult<PacingConfig> {
        let mut next = self.clone();
        if let Some(range) = patch.inter_item {
            next.inter_item = range;
        }
        if let Some(range) = patch.inter_batch {
            next.inter_batch = range;
        }
        if let Some(threshold) = patch.failure_threshold {
            next.failure_threshold = threshold;
        }
        if let Some(factor) = patch.item_backoff_factor {
            next.item_backoff_factor = factor;
        }
        if let Some(factor) = patch.batch_backoff_factor {
            next.batch_backoff_factor = factor;
        }
        if let Some(level) = patch.max_backoff_level {
            next.max_backoff_level = level;
        }
        if let Some(successes) = patch.recovery_successes {
            next.recovery_successes = successes;
        }
        if let Some(flag) = patch.count_permanent_failures {
            next.count_permanent_failures = flag;
        }
        // Zero clears the cap
        if let Some(cap) = patch.daily_success_cap {
            next.daily_success_cap = (cap > 0).then_some(cap);
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial pacing update accepted by `set_pacing_config`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfigPatch {
    pub inter_item: Option<DelayRange>,
    pub inter_batch: Option<DelayRange>,
    pub failure_threshold: Option<u32>,
    pub item_backoff_factor: Option<f64>,
    pub batch_backoff_factor: Option<f64>,
    pub max_backoff_level: Option<u32>,
    pub recovery_successes: Option<u32>,
    pub count_permanent_failures: Option<bool>,
    /// `Some(0)` removes the cap
    pub daily_success_cap: Option<u32>,
}

/// Retry policy for transient item failures
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay_secs: f64,
    /// Relative jitter applied to each delay, e.g. 0.35 for ±35%
    pub jitter: f64,
    /// Growth of the delay per retry
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_secs: 5.0,
            jitter: 0.35,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> SharedResult<()> {
        if !self.base_delay_secs.is_finite() || self.base_delay_secs < 0.0 {
            return Err(SharedError::config("retry.base_delay_secs", self.base_delay_secs));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(SharedError::config("retry.jitter", self.jitter));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(SharedError::config("retry.multiplier", self.multiplier));
        }
        let longest = self.base_delay_secs * (1.0 + self.jitter);
        if exceeds_ceiling(longest, self.multiplier, self.max_retries.saturating_sub(1)) {
            let value = format!(
                "{}s over {} retries exceeds {MAX_DELAY_SECS}s",
                self.base_delay_secs, self.max_retries
            );
            return Err(SharedError::config("retry.base_delay_secs", value));
        }
        Ok(())
    }
}

/// One way of splitting a slice into sub-bursts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstPlan {
    pub sizes: Vec<usize>,
    /// Pause after each burst, same length as `sizes`
    pub pauses_secs: Vec<u64>,
}

impl BurstPlan {
    pub fn new(sizes: Vec<usize>, pauses_secs: Vec<u64>) -> Self {
        Self { sizes, pauses_secs }
    }

    pub fn total(&self) -> usize {
        self.sizes.iter().sum()
    }
}

/// Candidate burst plans indexed by slice size
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BurstTable {
    pub plans: BTreeMap<usize, Vec<BurstPlan>>,
}

impl Default for BurstTable {
    fn default() -> Self {
        let mut plans = BTreeMap::new();
        plans.insert(1, vec![BurstPlan::new(vec![1], vec![0])]);
        plans.insert(2, vec![BurstPlan::new(vec![1, 1], vec![60, 0])]);
        plans.insert(
            3,
            vec![
                BurstPlan::new(vec![2, 1], vec![90, 0]),
                BurstPlan::new(vec![1, 2], vec![60, 0]),
            ],
        );
        plans.insert(
            4,
            vec![
                BurstPlan::new(vec![2, 1, 1], vec![90, 45, 0]),
                BurstPlan::new(vec![2, 2], vec![120, 0]),
            ],
        );
        plans.insert(
            5,
            vec![
                BurstPlan::new(vec![2, 1, 1, 1], vec![120, 60, 30, 0]),
                BurstPlan::new(vec![2, 2, 1], vec![120, 60, 0]),
                BurstPlan::new(vec![3, 2], vec![180, 0]),
            ],
        );
        Self { plans }
    }
}

impl BurstTable {
    pub fn candidates(&self, slice_size: usize) -> &[BurstPlan] {
        self.plans.get(&slice_size).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn validate(&self) -> SharedResult<()> {
        for (size, plans) in &self.plans {
            for plan in plans {
                let field = format!("bursts.{size}");
                if plan.sizes.iter().any(|s| *s == 0) {
                    return Err(SharedError::config(field, "zero-sized burst"));
                }
                if plan.total() != *size {
                    return Err(SharedError::config(
                        field,
                        format!("burst sizes sum to {}", plan.total()),
                    ));
                }
                if plan.pauses_secs.len() != plan.sizes.len() {
                    return Err(SharedError::config(field, "pause count differs from burst count"));
                }
            }
        }
        Ok(())
    }
}

/// Accepted identifier shape
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierRules {
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for IdentifierRules {
    fn default() -> Self {
        Self { min_len: 8, max_len: 15 }
    }
}

/// Complete scheduler configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum items drained per slice
    pub slice_size: usize,
    /// Only draw slices whose items share one target group
    pub group_affinity: bool,
    pub cache_ttl_secs: u64,
    pub countdown_interval_secs: u64,
    pub pacing: PacingConfig,
    pub retry: RetryConfig,
    pub bursts: BurstTable,
    pub identifiers: IdentifierRules,
    /// Fixed seed for delay draws (tests and reproducible runs)
    pub rng_seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slice_size: 5,
            group_affinity: true,
            cache_ttl_secs: 600,
            countdown_interval_secs: 10,
            pacing: PacingConfig::default(),
            retry: RetryConfig::default(),
            bursts: BurstTable::default(),
            identifiers: IdentifierRules::default(),
            rng_seed: None,
        }
    }
}

impl SchedulerConfig {
    /// Load from a JSON file; missing fields fall back to defaults
    pub fn from_file(path: &Path) -> SharedResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SharedError::SerializationError {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        serde_json::from_str(&content).map_err(|e| SharedError::SerializationError {
            message: format!("failed to parse {}: {e}", path.display()),
        })
    }

    /// Apply `SCHEDULER_*` overrides from the process environment
    pub fn apply_env(&mut self) -> SharedResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> SharedResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "SLICE_SIZE")? {
            self.slice_size = v;
        }
        if let Some(v) = parse_var(&lookup, "GROUP_AFFINITY")? {
            self.group_affinity = v;
        }
        if let Some(v) = parse_var(&lookup, "CACHE_TTL_SECS")? {
            self.cache_ttl_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "COUNTDOWN_INTERVAL_SECS")? {
            self.countdown_interval_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "INTER_ITEM_MIN_SECS")? {
            self.pacing.inter_item.min_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "INTER_ITEM_MAX_SECS")? {
            self.pacing.inter_item.max_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "INTER_BATCH_MIN_SECS")? {
            self.pacing.inter_batch.min_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "INTER_BATCH_MAX_SECS")? {
            self.pacing.inter_batch.max_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "FAILURE_THRESHOLD")? {
            self.pacing.failure_threshold = v;
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "DAILY_SUCCESS_CAP")? {
            self.pacing.daily_success_cap = (v > 0).then_some(v);
        }
        if let Some(v) = parse_var(&lookup, "MAX_RETRIES")? {
            self.retry.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "RETRY_BASE_DELAY_SECS")? {
            self.retry.base_delay_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "RNG_SEED")? {
            self.rng_seed = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> SharedResult<()> {
        if self.slice_size == 0 {
            return Err(SharedError::config("slice_size", 0));
        }
        if self.countdown_interval_secs == 0 {
            return Err(SharedError::config("countdown_interval_secs", 0));
        }
        let rules = self.identifiers;
        if rules.min_len == 0 || rules.min_len > rules.max_len {
            return Err(SharedError::config(
                "identifiers",
                format!("{}..{}", rules.min_len, rules.max_len),
            ));
        }
        self.pacing.validate()?;
        self.retry.validate()?;
        self.bursts.validate()
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> SharedResult<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{ENV_PREFIX}{name}");
    match lookup(&key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SharedError::config(key, raw)),
        None => Ok(None),
    }
}
