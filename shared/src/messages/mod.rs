//! Message types exchanged between the scheduler core and outer layers
//!
//! - `events`: scheduler → push layer notifications
//! - `config`: pacing, retry and burst configuration

pub mod config;
pub mod events;

pub use config::{
    delay_from_secs, BurstPlan, BurstTable, DelayRange, IdentifierRules, PacingConfig,
    PacingConfigPatch, RetryConfig, SchedulerConfig, MAX_DELAY_SECS,
};

pub use events::{EventEnvelope, SchedulerEvent};
