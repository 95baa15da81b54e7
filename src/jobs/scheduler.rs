use std::time::Duration;

use tracing::{error, info};

use crate::config::JobConfig;
use crate::jobs::cleanup::CleanupJob;
use crate::jobs::router::MatchingJob;

/// Runs the matching and cleanup jobs on fixed periods until shutdown.
pub struct Scheduler {
    matching: MatchingJob,
    cleanup: CleanupJob,
    config: JobConfig,
}

impl Scheduler {
    pub fn new(matching: MatchingJob, cleanup: CleanupJob, config: JobConfig) -> Self {
        Self {
            matching,
            cleanup,
            config,
        }
    }

    pub async fn run(self) {
        info!(
            match_interval_secs = self.config.match_interval.as_secs(),
            cleanup_interval_secs = self.config.cleanup_interval.as_secs(),
            "Scheduler started"
        );
        let matching = self.matching;
        let cleanup = self.cleanup;
        tokio::join!(
            every(self.config.match_interval, "matching", move || {
                let job = matching.clone();
                async move { job.run_once(None).await.map(|_| ()) }
            }),
            every(self.config.cleanup_interval, "cleanup", move || {
                let job = cleanup.clone();
                async move { job.run_once(None).await.map(|_| ()) }
            }),
        );
    }
}

/// Calls `task` once per `period`, skipping the immediate first tick.
/// Errors are logged and the next tick runs as usual.
async fn every<F, Fut>(period: Duration, name: &'static str, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<()>>,
{
    let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // consume immediate first tick

    loop {
        interval.tick().await;
        if let Err(e) = task().await {
            error!(job = name, "Scheduled job failed: {e}");
        }
    }
}
