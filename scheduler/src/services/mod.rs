//! Service implementations
//!
//! Concrete implementations of the scheduler's injected traits.

pub mod event_broadcaster;
pub mod file_store;
pub mod memory_store;
pub mod simulated_client;

#[cfg(test)]
mod tests;

pub use event_broadcaster::BroadcastEventSink;
pub use file_store::RealStateStore;
pub use memory_store::MemoryStateStore;
pub use simulated_client::SimulatedMembershipClient;
