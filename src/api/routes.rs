use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::api::health::{HealthState, LoopHealth};
use crate::api::latency::LatencyStats;
use crate::error::AppError;
use crate::queue::{QueueAttributes, QueueClient, QueueName};

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub queue: QueueClient,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/queues", get(get_queues))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    /// "ok" when the database answers, "degraded" otherwise.
    pub status: &'static str,
    pub database: bool,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub loops: BTreeMap<String, LoopHealth>,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let database = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
        messages_processed: state.health.processed(),
        messages_failed: state.health.failed(),
        loops: state.health.loops(),
    })
}

async fn get_queues(
    State(state): State<ApiState>,
) -> Result<Json<BTreeMap<String, QueueAttributes>>, AppError> {
    let mut queues = BTreeMap::new();
    for queue in QueueName::ALL {
        let attributes = state.queue.attributes(queue).await?;
        queues.insert(state.queue.name(queue), attributes);
    }
    Ok(Json(queues))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let latency = state.latency.snapshot();
    let ms = |us: Option<u64>| us.map(|v| v as f64 / 1_000.0);
    Json(LatencyResponse {
        samples: latency.samples,
        p50_ms: ms(latency.p50_us),
        p95_ms: ms(latency.p95_us),
        p99_ms: ms(latency.p99_us),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::db::test_pool;
    use crate::queue::SqliteQueue;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn state() -> ApiState {
        let pool = test_pool().await;
        let queue = QueueClient::new(
            Arc::new(SqliteQueue::new(pool.clone(), Duration::from_secs(3600))),
            QueueConfig {
                prefix: "api".to_string(),
                ..QueueConfig::default()
            },
        );
        ApiState {
            pool,
            queue,
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new().unwrap()),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_database_and_loops() {
        let state = state().await;
        state.health.record_poll("api-match-requests");
        state.health.record_processed("api-match-requests");

        let (status, body) = get_json(router(state), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["messages_processed"], 1);
        assert_eq!(body["loops"]["api-match-requests"]["processed"], 1);
    }

    #[tokio::test]
    async fn queues_lists_every_queue_with_attributes() {
        let state = state().await;
        state
            .queue
            .send_match_request(serde_json::from_str("{}").unwrap())
            .await
            .unwrap();

        let (status, body) = get_json(router(state), "/queues").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_object().unwrap().len(), QueueName::ALL.len());
        assert_eq!(body["api-match-requests"]["ApproximateNumberOfMessages"], 1);
        assert_eq!(body["api-match-approvals"]["ApproximateNumberOfMessages"], 0);
    }

    #[tokio::test]
    async fn latency_is_null_until_recorded() {
        let state = state().await;
        let (_, body) = get_json(router(state.clone()), "/stats/latency").await;
        assert_eq!(body["samples"], 0);
        assert!(body["p50_ms"].is_null());

        state.latency.record(Duration::from_millis(20));
        let (_, body) = get_json(router(state), "/stats/latency").await;
        assert_eq!(body["samples"], 1);
        let p50 = body["p50_ms"].as_f64().unwrap();
        assert!((19.9..=20.1).contains(&p50), "p50 was {p50}");
    }
}
