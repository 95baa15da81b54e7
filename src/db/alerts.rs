use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;

use crate::config::MAX_LOOKBACK_DAYS;
use crate::db::models::AlertRow;
use crate::error::Result;
use crate::queue::message::{AlertPayload, ResearchPayload};
use crate::types::{Alert, AlertStatus};

const DAY_MS: i64 = 86_400_000;

#[derive(Clone)]
pub struct AlertRepository {
    pool: SqlitePool,
}

impl AlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Active alerts created within `lookback_days` of `now_ms`, newest
    /// first, with the research record's location and sector attached.
    /// The lookback comes from request payloads, so it is clamped to
    /// `0..=MAX_LOOKBACK_DAYS` before any arithmetic.
    pub async fn fetch_active(&self, lookback_days: i64, now_ms: i64) -> Result<Vec<Alert>> {
        let window_ms = lookback_days.clamp(0, MAX_LOOKBACK_DAYS).saturating_mul(DAY_MS);
        let cutoff = now_ms.saturating_sub(window_ms);
        let rows: Vec<AlertRow> = sqlx::query_as(
            r#"
            SELECT a.id, a.alert_id, a.alert_type, a.research_id, a.criteria,
                   a.status, a.created_at, a.updated_at,
                   r.city, r.country, r.country_code, r.sector
            FROM alerts a
            LEFT JOIN research_records r ON r.id = a.research_id
            WHERE a.status = 'active' AND a.created_at >= ?
            ORDER BY a.created_at DESC, a.id DESC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(AlertRow::into_alert).collect())
    }

    /// Insert an alert, or refresh its criteria on redelivery. An existing
    /// alert's status is left alone.
    pub async fn upsert(&self, alert: &AlertPayload) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let criteria = serde_json::to_string(&alert.criteria)?;
        let status = alert.status.unwrap_or(AlertStatus::Active).to_string();
        sqlx::query(
            r#"
            INSERT INTO alerts (alert_id, alert_type, research_id, criteria, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(alert_id) DO UPDATE SET
                research_id = COALESCE(excluded.research_id, alerts.research_id),
                criteria = excluded.criteria,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&alert.alert_id)
        .bind(alert.alert_type.to_string())
        .bind(&alert.research_id)
        .bind(criteria)
        .bind(status)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_research(&self, research_id: &str, research: &ResearchPayload) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO research_records (id, city, country, country_code, sector, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                city = excluded.city,
                country = excluded.country,
                country_code = excluded.country_code,
                sector = excluded.sector
            "#,
        )
        .bind(research_id)
        .bind(&research.city)
        .bind(&research.country)
        .bind(&research.country_code)
        .bind(&research.sector)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Moves active alerts whose `timeline.deadline` date is before `today`
    /// to `expired`. Missing or unparseable deadlines never expire.
    pub async fn expire_past_deadline(&self, today: NaiveDate) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET status = 'expired', updated_at = ?
            WHERE status = 'active'
              AND json_valid(criteria)
              AND date(json_extract(criteria, '$.timeline.deadline')) < ?
            "#,
        )
        .bind(Utc::now().timestamp_millis())
        .bind(today.format("%Y-%m-%d").to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
