//! Time-triggered matching: run the orchestrator, then route every
//! persisted match by confidence.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::MatchRepository;
use crate::error::Result;
use crate::matcher::MatchingOrchestrator;
use crate::notify::Notifier;
use crate::queue::message::{ApprovalNeededPayload, MatchRequestPayload};
use crate::queue::{MessageBody, QueueClient, QueueName};
use crate::types::{Bundle, ConfidenceLevel};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub total_matches: usize,
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
    pub auto_approved: usize,
    pub notifications_sent: usize,
    pub queued_for_approval: usize,
    pub routing_failures: usize,
    pub investment_alerts_processed: usize,
    pub funding_alerts_processed: usize,
}

/// high: recorded as approved, every participant alerted, optionally notified.
/// medium: recorded as awaiting approval, a reviewable summary enqueued.
/// low: logged only.
#[derive(Clone)]
pub struct ConfidenceRouter {
    matches: MatchRepository,
    queue: QueueClient,
    notifier: Option<Notifier>,
}

impl ConfidenceRouter {
    pub fn new(matches: MatchRepository, queue: QueueClient, notifier: Option<Notifier>) -> Self {
        Self {
            matches,
            queue,
            notifier,
        }
    }

    pub async fn route_all(&self, bundles: &[Bundle]) -> JobSummary {
        let mut summary = JobSummary {
            total_matches: bundles.len(),
            ..JobSummary::default()
        };
        for bundle in bundles {
            if let Err(e) = self.route(bundle, &mut summary).await {
                warn!(bundle_id = %bundle.bundle_id, "Routing failed: {e}");
                summary.routing_failures += 1;
            }
        }
        summary
    }

    async fn route(&self, bundle: &Bundle, summary: &mut JobSummary) -> Result<()> {
        match bundle.confidence_level {
            ConfidenceLevel::High => {
                summary.high_confidence += 1;
                self.matches.upsert_proposal(bundle, false).await?;
                self.matches.create_match_alerts(bundle, true).await?;
                summary.auto_approved += 1;
                if let Some(notifier) = &self.notifier {
                    if notifier.notify(bundle).await {
                        summary.notifications_sent += 1;
                    }
                }
            }
            ConfidenceLevel::Medium => {
                summary.medium_confidence += 1;
                let match_id = self.matches.upsert_proposal(bundle, true).await?;
                self.matches.create_match_alerts(bundle, false).await?;
                let approval = ApprovalNeededPayload {
                    match_id,
                    match_type: bundle.match_type,
                    compatibility_score: bundle.compatibility_score,
                    opportunities_count: bundle.opportunity_ids.len(),
                    funders_count: 1,
                    total_investment: bundle.metrics.total_investment,
                    created_at: bundle.created_at,
                };
                if self
                    .queue
                    .send_message(QueueName::MatchApprovals, &MessageBody::MatchApprovalNeeded(approval))
                    .await
                    .is_some()
                {
                    summary.queued_for_approval += 1;
                }
            }
            ConfidenceLevel::Low => {
                summary.low_confidence += 1;
                debug!(
                    bundle_id = %bundle.bundle_id,
                    score = bundle.compatibility_score,
                    "Low-confidence match not routed"
                );
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MatchingJob {
    orchestrator: MatchingOrchestrator,
    router: ConfidenceRouter,
}

impl MatchingJob {
    pub fn new(orchestrator: MatchingOrchestrator, router: ConfidenceRouter) -> Self {
        Self { orchestrator, router }
    }

    pub async fn run_once(&self, lookback_days: Option<i64>) -> Result<JobSummary> {
        let request = MatchRequestPayload {
            lookback_days,
            trigger_source: "scheduled_job".to_string(),
            requested_at: None,
        };
        let outcome = self.orchestrator.run(&request).await?;
        let mut summary = self.router.route_all(&outcome.persisted).await;
        summary.investment_alerts_processed = outcome.summary.investment_alerts_processed;
        summary.funding_alerts_processed = outcome.summary.funding_alerts_processed;
        info!(
            total = summary.total_matches,
            high = summary.high_confidence,
            medium = summary.medium_confidence,
            notified = summary.notifications_sent,
            queued = summary.queued_for_approval,
            failures = summary.routing_failures,
            "Matching job complete"
        );
        Ok(summary)
    }
}
