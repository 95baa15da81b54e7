//! Row types for the service schema (migrations/0001_init.sql).

use serde_json::Value;
use tracing::warn;

use crate::types::{Alert, AlertStatus, AlertType, Criteria, ResearchContext};

/// An `alerts` row LEFT JOINed to its research record.
#[derive(Debug, sqlx::FromRow)]
pub struct AlertRow {
    pub id: i64,
    pub alert_id: String,
    pub alert_type: String,
    pub research_id: Option<String>,
    pub criteria: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub city: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub sector: Option<String>,
}

impl AlertRow {
    /// `None` for rows with an unrecognised type or status.
    pub fn into_alert(self) -> Option<Alert> {
        let Some(alert_type) = AlertType::parse(&self.alert_type) else {
            warn!(alert_id = %self.alert_id, "Skipping alert with unknown type {}", self.alert_type);
            return None;
        };
        let Some(status) = AlertStatus::parse(&self.status) else {
            warn!(alert_id = %self.alert_id, "Skipping alert with unknown status {}", self.status);
            return None;
        };
        // Unparseable JSON reads as a non-object document: every section malformed.
        let document = serde_json::from_str::<Value>(&self.criteria)
            .unwrap_or_else(|_| Value::String(self.criteria.clone()));

        Some(Alert {
            id: self.id,
            alert_id: self.alert_id,
            alert_type,
            research_id: self.research_id,
            criteria: Criteria::from_value(&document),
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            research: ResearchContext {
                city: self.city,
                country: self.country,
                country_code: self.country_code,
                sector: self.sector,
            },
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct BundleRow {
    pub id: i64,
    pub bundle_id: String,
    pub match_type: String,
    pub bundle_name: String,
    pub bundle_description: String,
    pub opportunity_ids: String,
    pub opportunity_count: i64,
    pub funder_id: String,
    pub cities: String,
    pub primary_sector: String,
    pub total_investment: f64,
    pub blended_roi: f64,
    pub compatibility_score: f64,
    pub confidence_level: String,
    pub bundle_metrics: String,
    pub criteria: String,
    pub bundling_rationale: String,
    pub status: String,
    pub reviewed_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct MatchProposalRow {
    pub match_id: String,
    pub match_type: String,
    pub funder_id: String,
    pub opportunity_ids: String,
    pub compatibility_score: f64,
    pub confidence_level: String,
    pub total_investment: f64,
    pub requires_approval: i64,
    pub approval_status: String,
    pub created_at: i64,
    pub updated_at: i64,
}
