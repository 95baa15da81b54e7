pub mod combinations;
pub mod orchestrator;
pub mod search;

pub use orchestrator::{MatchingOrchestrator, RunOutcome, RunState};
pub use search::{bundle_id, score_singles, search_bundles, BundleSearch, Candidate};
