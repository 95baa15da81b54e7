//! Optional external notification for high-confidence matches.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::NOTIFY_TIMEOUT_SECS;
use crate::error::Result;
use crate::types::Bundle;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchNotification<'a> {
    pub bundle_id: &'a str,
    pub score: f64,
    pub opportunity_ids: &'a [String],
    pub funder_id: &'a str,
    pub total_investment: f64,
}

impl<'a> MatchNotification<'a> {
    pub fn from_bundle(bundle: &'a Bundle) -> Self {
        Self {
            bundle_id: &bundle.bundle_id,
            score: bundle.compatibility_score,
            opportunity_ids: &bundle.opportunity_ids,
            funder_id: &bundle.funder_id,
            total_investment: bundle.metrics.total_investment,
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    url: String,
}

impl Notifier {
    /// `None` when no endpoint is configured.
    pub fn from_url(url: Option<&str>) -> Result<Option<Self>> {
        let Some(url) = url else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(NOTIFY_TIMEOUT_SECS))
            .build()?;
        Ok(Some(Self {
            client,
            url: url.to_string(),
        }))
    }

    /// POSTs the match. Failures are logged and reported as `false`.
    pub async fn notify(&self, bundle: &Bundle) -> bool {
        let body = MatchNotification::from_bundle(bundle);
        let result = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        match result {
            Ok(resp) => {
                info!(bundle_id = %bundle.bundle_id, status = %resp.status(), "Match notification sent");
                true
            }
            Err(e) => {
                warn!(bundle_id = %bundle.bundle_id, "Match notification failed: {e}");
                false
            }
        }
    }
}
