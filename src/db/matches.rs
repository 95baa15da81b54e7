use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::MatchProposalRow;
use crate::error::Result;
use crate::types::Bundle;

#[derive(Clone)]
pub struct MatchRepository {
    pool: SqlitePool,
}

impl MatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a routed match. The match id is the bundle id, so routing the
    /// same bundle again updates the existing proposal.
    pub async fn upsert_proposal(&self, bundle: &Bundle, requires_approval: bool) -> Result<String> {
        let now = Utc::now().timestamp_millis();
        let approval_status = if requires_approval { "queued" } else { "not_required" };
        sqlx::query(
            r#"
            INSERT INTO match_proposals (
                match_id, match_type, funder_id, opportunity_ids,
                compatibility_score, confidence_level, total_investment,
                requires_approval, approval_status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(match_id) DO UPDATE SET
                compatibility_score = excluded.compatibility_score,
                confidence_level = excluded.confidence_level,
                requires_approval = excluded.requires_approval,
                approval_status = CASE
                    WHEN match_proposals.approval_status = 'pending_review' THEN 'pending_review'
                    ELSE excluded.approval_status
                END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&bundle.bundle_id)
        .bind(bundle.match_type.to_string())
        .bind(&bundle.funder_id)
        .bind(serde_json::to_string(&bundle.opportunity_ids)?)
        .bind(bundle.compatibility_score)
        .bind(bundle.confidence_level.to_string())
        .bind(bundle.metrics.total_investment)
        .bind(i64::from(requires_approval))
        .bind(approval_status)
        .bind(bundle.created_at.timestamp_millis())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(bundle.bundle_id.clone())
    }

    /// One alert per participant (every opportunity plus the funder).
    /// Returns the number of participants recorded.
    pub async fn create_match_alerts(&self, bundle: &Bundle, auto_notify: bool) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let participants = bundle
            .opportunity_ids
            .iter()
            .map(|id| (id.as_str(), "opportunity"))
            .chain(std::iter::once((bundle.funder_id.as_str(), "funder")));

        let mut recorded = 0;
        for (participant_id, role) in participants {
            let result = sqlx::query(
                r#"
                INSERT INTO match_alerts (match_id, participant_id, participant_role, auto_notify, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(match_id, participant_id) DO UPDATE SET auto_notify = excluded.auto_notify
                "#,
            )
            .bind(&bundle.bundle_id)
            .bind(participant_id)
            .bind(role)
            .bind(i64::from(auto_notify))
            .bind(now)
            .execute(&self.pool)
            .await?;
            recorded += result.rows_affected() as usize;
        }
        Ok(recorded)
    }

    /// Marks a queued proposal as awaiting human review. `false` when the
    /// proposal no longer exists.
    pub async fn mark_pending_review(&self, match_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE match_proposals
            SET approval_status = 'pending_review', updated_at = ?
            WHERE match_id = ? AND requires_approval = 1
            "#,
        )
        .bind(Utc::now().timestamp_millis())
        .bind(match_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_proposal(&self, match_id: &str) -> Result<Option<MatchProposalRow>> {
        let row = sqlx::query_as(
            r#"
            SELECT match_id, match_type, funder_id, opportunity_ids, compatibility_score,
                   confidence_level, total_investment, requires_approval, approval_status,
                   created_at, updated_at
            FROM match_proposals WHERE match_id = ?
            "#,
        )
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Deletes proposals and their participant alerts created before the cutoff.
    /// Returns `(proposals, alerts)` removed.
    pub async fn delete_older_than(&self, cutoff_ms: i64) -> Result<(u64, u64)> {
        let alerts = sqlx::query(
            r#"
            DELETE FROM match_alerts
            WHERE created_at < ?
               OR match_id IN (SELECT match_id FROM match_proposals WHERE created_at < ?)
            "#,
        )
        .bind(cutoff_ms)
        .bind(cutoff_ms)
        .execute(&self.pool)
        .await?;
        let proposals = sqlx::query("DELETE FROM match_proposals WHERE created_at < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok((proposals.rows_affected(), alerts.rows_affected()))
    }
}
