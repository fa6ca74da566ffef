//! Live session status for UIs.
//!
//! A single record keyed by session id holds everything a frontend polls
//! for: lifecycle status, current stage, the research structure as it
//! emerges, per-aspect metadata, errors and artifact versions. Parallel
//! workers buffer their contributions through the thread-safe
//! [`StatusPublisher`]; barrier stages flush the buffers as one atomic
//! write.
//!
//! Published research results carry only metadata (word count, source
//! count); full content belongs in the memory event log.

mod publisher;
mod store;

pub use publisher::{StatusProbe, StatusPublisher};
pub use store::{DynamoStatusStore, InMemoryStatusStore, StatusStore};

/// Lifecycle states of a research session.
pub mod status {
    /// Workflow is running.
    pub const PROCESSING: &str = "processing";
    /// Workflow finished successfully.
    pub const COMPLETED: &str = "completed";
    /// Workflow finished with fatal errors.
    pub const FAILED: &str = "failed";
    /// A cancellation was requested and is being observed.
    pub const CANCELLING: &str = "cancelling";
    /// The workflow stopped on a cancellation observation.
    pub const CANCELLED: &str = "cancelled";
}
