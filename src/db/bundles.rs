use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::models::BundleRow;
use crate::error::{AppError, Result};
use crate::types::{Bundle, BundleStatus};

#[derive(Clone)]
pub struct BundleRepository {
    pool: SqlitePool,
}

impl BundleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a bundle, or on a repeated `bundle_id` refresh only the
    /// presentation and scoring columns. Identity columns and status are
    /// never touched by a conflict, and accepted or rejected rows are left
    /// exactly as reviewed.
    pub async fn upsert(&self, bundle: &Bundle) -> Result<()> {
        let m = &bundle.metrics;
        let now = Utc::now().timestamp_millis();
        let analysis = json!({ "criteria_met": bundle.criteria_met, "warnings": bundle.warnings });

        sqlx::query(
            r#"
            INSERT INTO bundles (
                bundle_id, match_type, bundle_name, bundle_description,
                opportunity_ids, opportunity_count, funder_id,
                cities, countries, regions, primary_sector,
                total_investment, blended_roi, compatibility_score, confidence_level,
                bundle_metrics, criteria, bundling_rationale, status,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bundle_id) DO UPDATE SET
                bundle_name = excluded.bundle_name,
                bundle_description = excluded.bundle_description,
                cities = excluded.cities,
                compatibility_score = excluded.compatibility_score,
                confidence_level = excluded.confidence_level,
                bundle_metrics = excluded.bundle_metrics,
                criteria = excluded.criteria,
                bundling_rationale = excluded.bundling_rationale,
                updated_at = excluded.updated_at
            WHERE bundles.status NOT IN ('accepted', 'rejected')
            "#,
        )
        .bind(&bundle.bundle_id)
        .bind(bundle.match_type.to_string())
        .bind(&bundle.name)
        .bind(&bundle.description)
        .bind(serde_json::to_string(&bundle.opportunity_ids)?)
        .bind(bundle.opportunity_ids.len() as i64)
        .bind(&bundle.funder_id)
        .bind(serde_json::to_string(&m.cities)?)
        .bind(serde_json::to_string(&m.countries)?)
        .bind(serde_json::to_string(&m.regions)?)
        .bind(&bundle.primary_sector)
        .bind(m.total_investment)
        .bind(m.blended_roi)
        .bind(bundle.compatibility_score)
        .bind(bundle.confidence_level.to_string())
        .bind(serde_json::to_string(m)?)
        .bind(analysis.to_string())
        .bind(&bundle.rationale)
        .bind(bundle.status.to_string())
        .bind(bundle.created_at.timestamp_millis())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, bundle_id: &str) -> Result<Option<BundleRow>> {
        let row = sqlx::query_as(
            r#"
            SELECT id, bundle_id, match_type, bundle_name, bundle_description,
                   opportunity_ids, opportunity_count, funder_id, cities, primary_sector,
                   total_investment, blended_roi, compatibility_score, confidence_level,
                   bundle_metrics, criteria, bundling_rationale, status, reviewed_by,
                   created_at, updated_at
            FROM bundles WHERE bundle_id = ?
            "#,
        )
        .bind(bundle_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Advance a bundle through proposed -> reviewed -> accepted|rejected.
    /// Re-applying the current status is a no-op so redelivered
    /// status-change messages succeed. Returns the status before the call.
    pub async fn transition_status(
        &self,
        bundle_id: &str,
        next: BundleStatus,
        reviewed_by: Option<&str>,
    ) -> Result<BundleStatus> {
        let current: Option<(String,)> = sqlx::query_as("SELECT status FROM bundles WHERE bundle_id = ?")
            .bind(bundle_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some((current,)) = current else {
            return Err(AppError::Handler(format!("bundle {bundle_id} not found")));
        };
        let current = BundleStatus::parse(&current)
            .ok_or_else(|| AppError::Handler(format!("bundle {bundle_id} has unknown status {current}")))?;

        if current == next {
            return Ok(current);
        }
        if !current.can_transition_to(next) {
            return Err(AppError::InvalidStatusTransition {
                bundle_id: bundle_id.to_string(),
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        // Compare-and-set on the status read above.
        let result = sqlx::query(
            r#"
            UPDATE bundles
            SET status = ?, reviewed_by = COALESCE(?, reviewed_by), updated_at = ?
            WHERE bundle_id = ? AND status = ?
            "#,
        )
        .bind(next.to_string())
        .bind(reviewed_by)
        .bind(Utc::now().timestamp_millis())
        .bind(bundle_id)
        .bind(current.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Handler(format!(
                "bundle {bundle_id} changed status concurrently"
            )));
        }
        info!(bundle_id, from = %current, to = %next, "Bundle status changed");
        Ok(current)
    }

    pub async fn delete_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM bundles WHERE created_at < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::types::fixtures;

    #[tokio::test]
    async fn repeated_upsert_keeps_one_row_and_updates_scoring_fields() {
        let pool = test_pool().await;
        let repo = BundleRepository::new(pool.clone());
        let mut bundle = fixtures::bundle("bundle-20260105100000-2opp-abcd1234", 0.82);
        repo.upsert(&bundle).await.unwrap();

        bundle.compatibility_score = 0.91;
        bundle.funder_id = "someone-else".to_string();
        bundle.rationale = "refreshed".to_string();
        repo.upsert(&bundle).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bundles").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 1);
        let row = repo.get(&bundle.bundle_id).await.unwrap().unwrap();
        assert_eq!(row.compatibility_score, 0.91);
        assert_eq!(row.bundling_rationale, "refreshed");
        assert_eq!(row.funder_id, "fund-1");
    }

    #[tokio::test]
    async fn status_moves_forward_and_terminal_is_final() {
        let repo = BundleRepository::new(test_pool().await);
        let bundle = fixtures::bundle("b-1", 0.7);
        repo.upsert(&bundle).await.unwrap();

        let before = repo.transition_status("b-1", BundleStatus::Reviewed, Some("analyst")).await.unwrap();
        assert_eq!(before, BundleStatus::Proposed);
        repo.transition_status("b-1", BundleStatus::Accepted, None).await.unwrap();

        // Redelivered status change.
        assert_eq!(
            repo.transition_status("b-1", BundleStatus::Accepted, None).await.unwrap(),
            BundleStatus::Accepted
        );
        assert!(matches!(
            repo.transition_status("b-1", BundleStatus::Rejected, None).await,
            Err(AppError::InvalidStatusTransition { .. })
        ));

        let row = repo.get("b-1").await.unwrap().unwrap();
        assert_eq!(row.status, "accepted");
        assert_eq!(row.reviewed_by.as_deref(), Some("analyst"));
    }

    #[tokio::test]
    async fn upsert_does_not_reset_status() {
        let repo = BundleRepository::new(test_pool().await);
        let bundle = fixtures::bundle("b-2", 0.7);
        repo.upsert(&bundle).await.unwrap();
        repo.transition_status("b-2", BundleStatus::Rejected, None).await.unwrap();
        repo.upsert(&bundle).await.unwrap();
        assert_eq!(repo.get("b-2").await.unwrap().unwrap().status, "rejected");
    }

    #[tokio::test]
    async fn reviewed_outcome_is_frozen_against_redelivered_upsert() {
        let repo = BundleRepository::new(test_pool().await);
        let mut bundle = fixtures::bundle("b-3", 0.85);
        repo.upsert(&bundle).await.unwrap();
        repo.transition_status("b-3", BundleStatus::Accepted, Some("analyst")).await.unwrap();
        let accepted = repo.get("b-3").await.unwrap().unwrap();

        bundle.compatibility_score = 0.61;
        bundle.confidence_level = crate::types::ConfidenceLevel::Medium;
        bundle.rationale = "rescored on redelivery".to_string();
        repo.upsert(&bundle).await.unwrap();

        let row = repo.get("b-3").await.unwrap().unwrap();
        assert_eq!(row.status, "accepted");
        assert_eq!(row.compatibility_score, 0.85);
        assert_eq!(row.confidence_level, accepted.confidence_level);
        assert_eq!(row.bundling_rationale, accepted.bundling_rationale);
        assert_eq!(row.updated_at, accepted.updated_at);
    }

    #[tokio::test]
    async fn unknown_bundle_is_a_handler_error() {
        let repo = BundleRepository::new(test_pool().await);
        assert!(matches!(
            repo.transition_status("missing", BundleStatus::Reviewed, None).await,
            Err(AppError::Handler(_))
        ));
    }

    #[tokio::test]
    async fn delete_older_than_removes_only_old_rows() {
        let pool = test_pool().await;
        let repo = BundleRepository::new(pool.clone());
        repo.upsert(&fixtures::bundle("old", 0.7)).await.unwrap();
        repo.upsert(&fixtures::bundle("new", 0.7)).await.unwrap();
        sqlx::query("UPDATE bundles SET created_at = 0 WHERE bundle_id = 'old'")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(repo.delete_older_than(1).await.unwrap(), 1);
        assert!(repo.get("new").await.unwrap().is_some());
    }
}
