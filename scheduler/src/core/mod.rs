//! Core scheduling logic
//!
//! Backlog, cache, partitioner and pacing are pure and synchronous. The
//! executor and batch loop drive them against the injected capabilities.

pub mod backlog;
pub mod batch_loop;
pub mod executor;
pub mod membership_cache;
pub mod pacing;
pub mod partitioner;

pub use backlog::{canonical_handle, normalize_identifier, validate_identifier, Backlog};
pub use executor::{classify, retry_delay, AttemptObserver, ItemExecutor, GROUP_UNREACHABLE};
pub use membership_cache::MembershipCache;
pub use pacing::{cancellable_sleep, PacingChange, PacingPolicy};
pub use partitioner::Partitioner;
