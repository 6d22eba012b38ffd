pub mod job;
pub mod registry;
pub mod store;

pub use job::{Job, JobParams, JobStatus};
pub use registry::{JobRegistry, SubmitOutcome};
pub use store::JobStore;
