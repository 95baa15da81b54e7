pub mod cleanup;
pub mod router;
pub mod scheduler;

pub use cleanup::{CleanupJob, CleanupSummary};
pub use router::{ConfidenceRouter, JobSummary, MatchingJob};
pub use scheduler::Scheduler;
