//! One matching run: fetch active alerts, bucket opportunities by sector,
//! score singles and search bundles per funder, persist, then emit.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, info, warn};

use crate::config::MatchingConfig;
use crate::db::{AlertRepository, BundleRepository};
use crate::error::Result;
use crate::matcher::search::{score_singles, search_bundles, Candidate};
use crate::queue::message::{MatchFoundPayload, MatchRequestPayload, MatchResultPayload};
use crate::queue::{MessageBody, QueueClient, QueueName};
use crate::types::{AlertType, Bundle, ConfidenceLevel, Funder, Opportunity};

/// Bucket for opportunities that carry no sector at all.
const UNKNOWN_SECTOR: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    FetchingAlerts,
    GroupingBySector,
    ScoringSingles,
    SearchingBundles,
    Persisting,
    NotifyingAndEmitting,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::FetchingAlerts => "fetching_alerts",
            RunState::GroupingBySector => "grouping_by_sector",
            RunState::ScoringSingles => "scoring_singles",
            RunState::SearchingBundles => "searching_bundles",
            RunState::Persisting => "persisting",
            RunState::NotifyingAndEmitting => "notifying_and_emitting",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Bundles written this run, in candidate order.
    pub persisted: Vec<Bundle>,
    pub summary: MatchResultPayload,
    /// Candidates lost to a failed write. Recomputed on the next run.
    pub dropped: usize,
}

#[derive(Clone)]
pub struct MatchingOrchestrator {
    alerts: AlertRepository,
    bundles: BundleRepository,
    queue: QueueClient,
    config: MatchingConfig,
}

impl MatchingOrchestrator {
    pub fn new(
        alerts: AlertRepository,
        bundles: BundleRepository,
        queue: QueueClient,
        config: MatchingConfig,
    ) -> Self {
        Self {
            alerts,
            bundles,
            queue,
            config,
        }
    }

    /// Runs the full pipeline once. Only the alert fetch is fatal; a failed
    /// bundle write drops that candidate and the run carries on.
    pub async fn run(&self, request: &MatchRequestPayload) -> Result<RunOutcome> {
        let started = Utc::now();
        let reference = reference_time(request.requested_at.unwrap_or(started));
        let lookback_days = request.lookback_days.unwrap_or(self.config.lookback_days);
        info!(
            trigger_source = %request.trigger_source,
            lookback_days,
            "Matching run started"
        );

        // --- FetchingAlerts ---
        enter(RunState::FetchingAlerts);
        match self.alerts.expire_past_deadline(started.date_naive()).await {
            Ok(0) => {}
            Ok(n) => info!(expired = n, "Expired alerts past their deadline"),
            Err(e) => warn!("Failed to expire past-deadline alerts: {e}"),
        }
        let alerts = self.alerts.fetch_active(lookback_days, started.timestamp_millis()).await?;

        let mut opportunities = Vec::new();
        let mut funders = Vec::new();
        for alert in alerts {
            match alert.alert_type {
                AlertType::Investment => opportunities.push(Opportunity::new(alert)),
                AlertType::Funding => funders.push(Funder::new(alert)),
            }
        }
        debug!(
            investment = opportunities.len(),
            funding = funders.len(),
            "Fetched active alerts"
        );

        // --- GroupingBySector ---
        enter(RunState::GroupingBySector);
        let buckets = group_by_sector(&opportunities);

        // --- ScoringSingles ---
        enter(RunState::ScoringSingles);
        let mut candidates: Vec<(&Funder, Candidate)> = Vec::new();
        for funder in &funders {
            let Some(bucket) = bucket_for(&buckets, funder) else {
                continue;
            };
            candidates.extend(score_singles(funder, bucket).into_iter().map(|c| (funder, c)));
        }

        // --- SearchingBundles ---
        enter(RunState::SearchingBundles);
        for funder in &funders {
            let Some(bucket) = bucket_for(&buckets, funder) else {
                continue;
            };
            let search = search_bundles(funder, bucket, self.config.max_bundle_size);
            if !search.evaluated.is_empty() || search.pruned > 0 {
                debug!(
                    funder = %funder.reference(),
                    bucket = bucket.len(),
                    evaluated = ?search.evaluated,
                    pruned = search.pruned,
                    found = search.best.len(),
                    "Bundle search finished"
                );
            }
            candidates.extend(search.best.into_iter().map(|c| (funder, c)));
        }

        // --- Persisting ---
        enter(RunState::Persisting);
        let mut outcome = RunOutcome::default();
        for (funder, candidate) in candidates {
            let bundle = candidate.into_bundle(funder, reference);
            match self.bundles.upsert(&bundle).await {
                Ok(()) => {
                    debug!(
                        bundle_id = %bundle.bundle_id,
                        score = bundle.compatibility_score,
                        confidence = %bundle.confidence_level,
                        "Persisted bundle"
                    );
                    outcome.persisted.push(bundle);
                }
                Err(e) => {
                    warn!(bundle_id = %bundle.bundle_id, "Failed to persist bundle, dropping: {e}");
                    outcome.dropped += 1;
                }
            }
        }

        // --- NotifyingAndEmitting ---
        enter(RunState::NotifyingAndEmitting);
        let high: Vec<&Bundle> = outcome
            .persisted
            .iter()
            .filter(|b| b.confidence_level == ConfidenceLevel::High)
            .collect();
        for bundle in &high {
            let found = MatchFoundPayload {
                bundle_id: bundle.bundle_id.clone(),
                opportunities: bundle.opportunity_ids.len(),
                score: bundle.compatibility_score,
                match_type: bundle.match_type,
            };
            self.queue
                .send_message(QueueName::MatchResults, &MessageBody::MatchFound(found))
                .await;
        }

        outcome.summary = MatchResultPayload {
            total_matches: outcome.persisted.len(),
            high_confidence: high.len(),
            medium_confidence: outcome
                .persisted
                .iter()
                .filter(|b| b.confidence_level == ConfidenceLevel::Medium)
                .count(),
            investment_alerts_processed: opportunities.len(),
            funding_alerts_processed: funders.len(),
        };
        self.queue
            .send_message(QueueName::Results, &MessageBody::MatchResult(outcome.summary.clone()))
            .await;

        enter(RunState::Idle);
        info!(
            total_matches = outcome.summary.total_matches,
            high = outcome.summary.high_confidence,
            medium = outcome.summary.medium_confidence,
            dropped = outcome.dropped,
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "Matching run complete"
        );
        Ok(outcome)
    }
}

fn enter(state: RunState) {
    debug!(state = %state, "Matching run state");
}

/// Request time truncated to whole seconds, the granularity of a bundle id.
fn reference_time(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_nanosecond(0).unwrap_or(at)
}

fn group_by_sector(opportunities: &[Opportunity]) -> HashMap<String, Vec<Opportunity>> {
    let mut buckets: HashMap<String, Vec<Opportunity>> = HashMap::new();
    for opp in opportunities {
        let sector = opp.sector().unwrap_or_else(|| UNKNOWN_SECTOR.to_string());
        buckets.entry(sector).or_default().push(opp.clone());
    }
    buckets
}

/// The funder's sector bucket. Funders without a sector are never matched.
fn bucket_for<'a>(buckets: &'a HashMap<String, Vec<Opportunity>>, funder: &Funder) -> Option<&'a [Opportunity]> {
    let Some(sector) = funder.primary_sector() else {
        debug!(funder = %funder.reference(), "Funder has no sector; skipping");
        return None;
    };
    buckets.get(&sector).map(Vec::as_slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::db::test_pool;
    use crate::queue::message::AlertPayload;
    use crate::queue::SqliteQueue;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use sqlx::SqlitePool;
    use std::sync::Arc;
    use std::time::Duration;

    async fn setup() -> (SqlitePool, MatchingOrchestrator, QueueClient) {
        let pool = test_pool().await;
        let transport = Arc::new(SqliteQueue::new(pool.clone(), Duration::from_secs(3600)));
        let queue = QueueClient::new(
            transport,
            QueueConfig {
                receive_wait: Duration::ZERO,
                ..QueueConfig::default()
            },
        );
        let orchestrator = MatchingOrchestrator::new(
            AlertRepository::new(pool.clone()),
            BundleRepository::new(pool.clone()),
            queue.clone(),
            MatchingConfig::default(),
        );
        (pool, orchestrator, queue)
    }

    async fn insert(pool: &SqlitePool, id: &str, alert_type: AlertType, criteria: Value) {
        AlertRepository::new(pool.clone())
            .upsert(&AlertPayload {
                alert_id: id.to_string(),
                alert_type,
                research_id: None,
                criteria,
                status: None,
            })
            .await
            .unwrap();
    }

    async fn seed_solar(pool: &SqlitePool) {
        insert(
            pool,
            "fund-1",
            AlertType::Funding,
            json!({ "sector": { "primary": "solar_energy" },
                    "financial": { "minimum_required": 1_000_000.0, "roi_expected": 10.0 } }),
        )
        .await;
        insert(
            pool,
            "opp-1",
            AlertType::Investment,
            json!({ "sector": { "primary": "solar_energy" },
                    "financial": { "amount": 500_000.0, "roi_expected": 18.0 },
                    "timeline": { "execution_start": "2026-03-01" } }),
        )
        .await;
        insert(
            pool,
            "opp-2",
            AlertType::Investment,
            json!({ "sector": { "primary": "Solar_Energy" },
                    "financial": { "amount": 600_000.0, "roi_expected": 17.0 },
                    "timeline": { "execution_start": "2026-07-15" } }),
        )
        .await;
    }

    fn request_at(at: DateTime<Utc>) -> MatchRequestPayload {
        MatchRequestPayload {
            lookback_days: Some(30),
            trigger_source: "test".to_string(),
            requested_at: Some(at),
        }
    }

    async fn bundle_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM bundles")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn finds_high_confidence_bundle_and_emits() {
        let (pool, orchestrator, queue) = setup().await;
        seed_solar(&pool).await;

        let outcome = orchestrator.run(&request_at(Utc::now())).await.unwrap();

        assert_eq!(outcome.persisted.len(), 1);
        let bundle = &outcome.persisted[0];
        assert_eq!(bundle.opportunity_ids.len(), 2);
        assert_eq!(bundle.confidence_level, ConfidenceLevel::High);
        assert_eq!(bundle.metrics.total_investment, 1_100_000.0);
        assert_eq!(
            outcome.summary,
            MatchResultPayload {
                total_matches: 1,
                high_confidence: 1,
                medium_confidence: 0,
                investment_alerts_processed: 2,
                funding_alerts_processed: 1,
            }
        );

        let found = queue.peek(QueueName::MatchResults, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].envelope.kind, "match_found");
        assert_eq!(found[0].envelope.payload["bundle_id"], json!(bundle.bundle_id));
        assert_eq!(found[0].envelope.payload["type"], json!("bundled"));

        let results = queue.peek(QueueName::Results, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].envelope.kind, "match_result");
        assert_eq!(results[0].envelope.payload["total_matches"], json!(1));
    }

    #[tokio::test]
    async fn redelivered_request_does_not_duplicate_rows() {
        let (pool, orchestrator, _queue) = setup().await;
        seed_solar(&pool).await;
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();

        let first = orchestrator.run(&request_at(at)).await.unwrap();
        let second = orchestrator.run(&request_at(at)).await.unwrap();

        assert_eq!(first.persisted[0].bundle_id, second.persisted[0].bundle_id);
        assert_eq!(bundle_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn redelivery_after_review_leaves_the_decision_intact() {
        let (pool, orchestrator, _queue) = setup().await;
        seed_solar(&pool).await;
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let bundles = BundleRepository::new(pool.clone());

        let first = orchestrator.run(&request_at(at)).await.unwrap();
        let bundle_id = first.persisted[0].bundle_id.clone();
        bundles
            .transition_status(&bundle_id, crate::types::BundleStatus::Accepted, Some("analyst"))
            .await
            .unwrap();
        let accepted = bundles.get(&bundle_id).await.unwrap().unwrap();

        // The opportunity changes before the request is delivered again.
        insert(
            &pool,
            "opp-1",
            AlertType::Investment,
            json!({ "sector": { "primary": "solar_energy" },
                    "financial": { "amount": 450_000.0, "roi_expected": 12.0 },
                    "timeline": { "execution_start": "2026-03-01" } }),
        )
        .await;
        orchestrator.run(&request_at(at)).await.unwrap();

        let row = bundles.get(&bundle_id).await.unwrap().unwrap();
        assert_eq!(bundle_count(&pool).await, 1);
        assert_eq!(row.status, "accepted");
        assert_eq!(row.compatibility_score, accepted.compatibility_score);
        assert_eq!(row.bundle_metrics, accepted.bundle_metrics);
        assert_eq!(row.updated_at, accepted.updated_at);
    }

    #[tokio::test]
    async fn huge_lookback_from_a_request_still_runs() {
        let (pool, orchestrator, _queue) = setup().await;
        seed_solar(&pool).await;

        for lookback in [i64::MAX, 1_000_000_000_000_000] {
            let request = MatchRequestPayload {
                lookback_days: Some(lookback),
                trigger_source: "test".to_string(),
                requested_at: None,
            };
            let outcome = orchestrator.run(&request).await.unwrap();
            assert_eq!(outcome.summary.funding_alerts_processed, 1, "lookback {lookback}");
        }
    }

    #[tokio::test]
    async fn empty_store_still_emits_a_summary() {
        let (_pool, orchestrator, queue) = setup().await;

        let outcome = orchestrator.run(&request_at(Utc::now())).await.unwrap();

        assert!(outcome.persisted.is_empty());
        assert_eq!(outcome.summary, MatchResultPayload::default());
        assert!(queue.peek(QueueName::MatchResults, 10).await.unwrap().is_empty());
        assert_eq!(queue.peek(QueueName::Results, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn other_sectors_and_sectorless_funders_are_not_matched() {
        let (pool, orchestrator, _queue) = setup().await;
        insert(
            &pool,
            "fund-wind",
            AlertType::Funding,
            json!({ "sector": { "primary": "wind_energy" }, "financial": { "roi_expected": 5.0 } }),
        )
        .await;
        insert(&pool, "fund-none", AlertType::Funding, json!({ "financial": { "roi_expected": 5.0 } })).await;
        insert(
            &pool,
            "opp-solar",
            AlertType::Investment,
            json!({ "sector": { "primary": "solar_energy" }, "financial": { "amount": 10.0, "roi_expected": 9.0 } }),
        )
        .await;
        insert(&pool, "opp-blank", AlertType::Investment, json!({ "financial": { "amount": 10.0 } })).await;

        let outcome = orchestrator.run(&request_at(Utc::now())).await.unwrap();

        assert!(outcome.persisted.is_empty());
        assert_eq!(outcome.summary.funding_alerts_processed, 2);
        assert_eq!(outcome.summary.investment_alerts_processed, 2);
    }

    #[tokio::test]
    async fn medium_single_is_persisted_without_match_found() {
        let (pool, orchestrator, queue) = setup().await;
        // No minimum (financial 0.8), single start (0.7), ROI 5 vs 10 (0.3): 0.785.
        insert(
            &pool,
            "fund-1",
            AlertType::Funding,
            json!({ "sector": { "primary": "solar_energy" }, "financial": { "roi_expected": 10.0 } }),
        )
        .await;
        insert(
            &pool,
            "opp-1",
            AlertType::Investment,
            json!({ "sector": { "primary": "solar_energy" }, "financial": { "amount": 50_000.0, "roi_expected": 5.0 } }),
        )
        .await;

        let outcome = orchestrator.run(&request_at(Utc::now())).await.unwrap();

        assert_eq!(outcome.persisted.len(), 1);
        assert_eq!(outcome.persisted[0].match_type, crate::types::MatchType::Simple);
        assert_eq!(outcome.persisted[0].confidence_level, ConfidenceLevel::Medium);
        assert_eq!(outcome.summary.medium_confidence, 1);
        assert!(queue.peek(QueueName::MatchResults, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn past_deadline_alerts_are_expired_before_matching() {
        let (pool, orchestrator, _queue) = setup().await;
        seed_solar(&pool).await;
        insert(
            &pool,
            "opp-old",
            AlertType::Investment,
            json!({ "sector": { "primary": "solar_energy" },
                    "financial": { "amount": 900_000.0, "roi_expected": 20.0 },
                    "timeline": { "deadline": "2000-01-01" } }),
        )
        .await;

        let outcome = orchestrator.run(&request_at(Utc::now())).await.unwrap();

        assert_eq!(outcome.summary.investment_alerts_processed, 2);
        let status: String = sqlx::query_scalar("SELECT status FROM alerts WHERE alert_id = 'opp-old'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, "expired");
    }

    #[test]
    fn reference_time_drops_subseconds() {
        let at = Utc.timestamp_millis_opt(1_767_607_200_123).unwrap();
        assert_eq!(reference_time(at).timestamp_subsec_nanos(), 0);
        assert_eq!(reference_time(at).timestamp(), at.timestamp());
    }
}
