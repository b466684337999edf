//! Rate-adaptive batch membership scheduler
//!
//! Queues "add identifier to group" work per context, drains it in paced
//! sub-bursts against an injected membership capability, adapts pacing to
//! failure streaks, persists its progress and reports every transition as an
//! event.

pub mod core;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use core::{Backlog, MembershipCache, PacingChange, PacingPolicy, Partitioner};
pub use error::{ClientError, SchedulerError, SchedulerResult};
pub use registry::SchedulerRegistry;
pub use scheduler::Scheduler;
pub use traits::{
    EventSink, MembershipClient, MockEventSink, MockMembershipClient, MockStateStore, StateStore,
};
pub use types::{AddResultCode, EnqueueReport, Execution, Outcome, PacingState, PersistedState, SubBurst};
