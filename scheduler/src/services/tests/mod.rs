//! Service-specific tests
//!
//! Each service has its own test file.


/// Common test utilities for services
pub mod common {
    use shared::{ContextId, WorkItem};

    pub fn context(name: &str) -> ContextId {
        ContextId::parse(name).expect("valid test context id")
    }

    pub fn items(group: &str, identifiers: &[&str]) -> Vec<WorkItem> {
        identifiers.iter().map(|id| WorkItem::new(group, *id)).collect()
    }
}
