//! Visibility-timeout queue stored in the shared SQLite file.
//!
//! A receive claims rows with a single `UPDATE ... RETURNING`, so two worker
//! processes polling the same queue never both get a visible message. A
//! claimed row is hidden until `visible_at`; if nobody deletes it by then it
//! is claimed again with a new receipt handle.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{MAX_RECEIVE_BATCH, RECEIVE_POLL_INTERVAL_MS};
use crate::error::{AppError, Result};
use crate::queue::message::{Envelope, PeekedMessage, ReceivedMessage};
use crate::queue::transport::{QueueAttributes, QueueTransport};

pub struct SqliteQueue {
    pool: SqlitePool,
    retention: Duration,
}

#[derive(sqlx::FromRow)]
struct ClaimedRow {
    id: i64,
    message_id: String,
    receipt_handle: String,
    body: String,
    receive_count: i64,
}

#[derive(sqlx::FromRow)]
struct VisibleRow {
    message_id: String,
    body: String,
    receive_count: i64,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool, retention: Duration) -> Self {
        Self { pool, retention }
    }

    async fn drop_expired(&self, queue: &str, now: i64) -> Result<()> {
        let cutoff = now - self.retention.as_millis() as i64;
        let result = sqlx::query("DELETE FROM queue_messages WHERE queue = ? AND sent_at < ?")
            .bind(queue)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(transport_err)?;
        if result.rows_affected() > 0 {
            warn!(queue, dropped = result.rows_affected(), "Dropped messages past retention");
        }
        Ok(())
    }

    async fn claim(&self, queue: &str, max: usize, visibility: Duration) -> Result<Vec<ReceivedMessage>> {
        let now = now_ms();
        self.drop_expired(queue, now).await?;

        let handle_prefix = uuid::Uuid::new_v4().to_string();
        let visible_at = now + visibility.as_millis() as i64;

        let mut rows: Vec<ClaimedRow> = sqlx::query_as(
            r#"
            UPDATE queue_messages
            SET receipt_handle = ? || '.' || id,
                visible_at = ?,
                receive_count = receive_count + 1
            WHERE id IN (
                SELECT id FROM queue_messages
                WHERE queue = ? AND visible_at <= ?
                ORDER BY id
                LIMIT ?
            )
            RETURNING id, message_id, receipt_handle, body, receive_count
            "#,
        )
        .bind(&handle_prefix)
        .bind(visible_at)
        .bind(queue)
        .bind(now)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(transport_err)?;
        rows.sort_by_key(|r| r.id);

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<Envelope>(&row.body) {
                Ok(envelope) => messages.push(ReceivedMessage {
                    message_id: row.message_id,
                    receipt_handle: row.receipt_handle,
                    receive_count: row.receive_count as u32,
                    envelope,
                }),
                // Stays claimed; retention eventually drops it.
                Err(e) => warn!(queue, message_id = %row.message_id, "Unreadable message body: {e}"),
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl QueueTransport for SqliteQueue {
    async fn send(&self, queue: &str, envelope: &Envelope) -> Result<String> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::to_string(envelope)?;
        let now = now_ms();
        sqlx::query(
            r#"
            INSERT INTO queue_messages (queue, message_id, body, sent_at, visible_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(queue)
        .bind(&message_id)
        .bind(body)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(transport_err)?;
        Ok(message_id)
    }

    async fn receive(
        &self,
        queue: &str,
        max: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let max = max.clamp(1, MAX_RECEIVE_BATCH);
        let deadline = Instant::now() + wait;
        let poll_interval = Duration::from_millis(RECEIVE_POLL_INTERVAL_MS);

        loop {
            let batch = self.claim(queue, max, visibility).await?;
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE queue = ? AND receipt_handle = ?")
            .bind(queue)
            .bind(receipt_handle)
            .execute(&self.pool)
            .await
            .map_err(transport_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn peek(&self, queue: &str, max: usize) -> Result<Vec<PeekedMessage>> {
        let rows: Vec<VisibleRow> = sqlx::query_as(
            r#"
            SELECT message_id, body, receive_count
            FROM queue_messages
            WHERE queue = ? AND visible_at <= ?
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(queue)
        .bind(now_ms())
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(transport_err)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<Envelope>(&row.body) {
                Ok(envelope) => messages.push(PeekedMessage {
                    message_id: row.message_id,
                    receive_count: row.receive_count as u32,
                    envelope,
                }),
                Err(e) => debug!(queue, message_id = %row.message_id, "Skipping unreadable body: {e}"),
            }
        }
        Ok(messages)
    }

    async fn attributes(&self, queue: &str) -> Result<QueueAttributes> {
        let now = now_ms();
        let (visible, not_visible, oldest): (i64, i64, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN visible_at <= ? THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN visible_at > ? THEN 1 ELSE 0 END), 0),
                MIN(sent_at)
            FROM queue_messages
            WHERE queue = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .map_err(transport_err)?;

        Ok(QueueAttributes {
            approximate_number_of_messages: visible,
            approximate_number_of_messages_not_visible: not_visible,
            approximate_age_of_oldest_message: oldest.map_or(0, |t| ((now - t) / 1000).max(0)),
        })
    }

    async fn purge(&self, queue: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE queue = ?")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(transport_err)?;
        Ok(result.rows_affected())
    }
}

fn transport_err(e: sqlx::Error) -> AppError {
    AppError::Transport(e.to_string())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
