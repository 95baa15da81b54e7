use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::info;

use crate::db::{BundleRepository, MatchRepository};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub retention_days: i64,
    pub bundles_deleted: u64,
    pub proposals_deleted: u64,
    pub match_alerts_deleted: u64,
}

/// Deletes bundles, proposals and participant alerts past the retention window.
#[derive(Clone)]
pub struct CleanupJob {
    bundles: BundleRepository,
    matches: MatchRepository,
    retention_days: i64,
}

impl CleanupJob {
    pub fn new(bundles: BundleRepository, matches: MatchRepository, retention_days: i64) -> Self {
        Self {
            bundles,
            matches,
            retention_days,
        }
    }

    pub async fn run_once(&self, retention_days: Option<i64>) -> Result<CleanupSummary> {
        let retention_days = retention_days.unwrap_or(self.retention_days).max(0);
        let cutoff = Duration::try_days(retention_days)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or_else(|| AppError::Config(format!("retention of {retention_days} days is out of range")))?
            .timestamp_millis();

        let (proposals_deleted, match_alerts_deleted) = self.matches.delete_older_than(cutoff).await?;
        let bundles_deleted = self.bundles.delete_older_than(cutoff).await?;

        let summary = CleanupSummary {
            retention_days,
            bundles_deleted,
            proposals_deleted,
            match_alerts_deleted,
        };
        info!(
            retention_days,
            bundles = bundles_deleted,
            proposals = proposals_deleted,
            match_alerts = match_alerts_deleted,
            "Cleanup complete"
        );
        Ok(summary)
    }
}
