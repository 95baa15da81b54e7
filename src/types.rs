use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::config::{HIGH_CONFIDENCE_THRESHOLD, MATCH_THRESHOLD};

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    /// Capital-seeking opportunity.
    Investment,
    /// Capital-providing funder.
    Funding,
}

impl AlertType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "investment" => Some(AlertType::Investment),
            "funding" => Some(AlertType::Funding),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::Investment => write!(f, "investment"),
            AlertType::Funding => write!(f, "funding"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Paused,
    Expired,
}

impl AlertStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AlertStatus::Active),
            "paused" => Some(AlertStatus::Paused),
            "expired" => Some(AlertStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertStatus::Active => "active",
            AlertStatus::Paused => "paused",
            AlertStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Location/sector recovered from the research record an alert came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearchContext {
    pub city: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub sector: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub id: i64,
    pub alert_id: String,
    pub alert_type: AlertType,
    pub research_id: Option<String>,
    pub criteria: Criteria,
    pub status: AlertStatus,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
    pub research: ResearchContext,
}

// ---------------------------------------------------------------------------
// Criteria document
// ---------------------------------------------------------------------------

/// Named sections of an alert's criteria document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CriteriaSection {
    Sector,
    Financial,
    Location,
    Timeline,
    Technical,
    Bundling,
}

impl CriteriaSection {
    pub fn key(self) -> &'static str {
        match self {
            CriteriaSection::Sector => "sector",
            CriteriaSection::Financial => "financial",
            CriteriaSection::Location => "location",
            CriteriaSection::Timeline => "timeline",
            CriteriaSection::Technical => "technical",
            CriteriaSection::Bundling => "bundling",
        }
    }

    const ALL: [CriteriaSection; 6] = [
        CriteriaSection::Sector,
        CriteriaSection::Financial,
        CriteriaSection::Location,
        CriteriaSection::Timeline,
        CriteriaSection::Technical,
        CriteriaSection::Bundling,
    ];
}

impl std::fmt::Display for CriteriaSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorCriteria {
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinancialCriteria {
    pub amount: Option<f64>,
    pub minimum_required: Option<f64>,
    pub roi_expected: Option<f64>,
    pub currency: Option<String>,
    pub carbon_reduction_tons_annually: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationCriteria {
    pub city: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub coordinates: Option<Coordinates>,
}

/// Dates are ISO-8601 strings (`YYYY-MM-DD` or longer), compared lexically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineCriteria {
    pub planning_start: Option<String>,
    pub execution_start: Option<String>,
    pub completion: Option<String>,
    pub deadline: Option<String>,
    pub urgency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalCriteria {
    pub technology: Option<String>,
    pub capacity_mw: Option<f64>,
    pub maturity: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlingCriteria {
    pub eligible: Option<bool>,
    pub minimum_bundle_size: Option<u32>,
    pub maximum_bundle_partners: Option<u32>,
    pub compatibility_requirements: Vec<String>,
}

/// Typed criteria document. Each section is parsed independently: a section
/// that is present but does not fit its shape is left at its default and
/// recorded in `malformed`, so the scorer can neutralise only that criterion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Criteria {
    pub sector: SectorCriteria,
    pub financial: FinancialCriteria,
    pub location: LocationCriteria,
    pub timeline: TimelineCriteria,
    pub technical: TechnicalCriteria,
    pub bundling: BundlingCriteria,
    #[serde(skip)]
    pub malformed: Vec<CriteriaSection>,
}

impl Criteria {
    pub fn from_value(value: &Value) -> Self {
        let mut criteria = Criteria::default();
        let obj = match value {
            Value::Object(obj) => obj,
            Value::Null => return criteria,
            _ => {
                criteria.malformed = CriteriaSection::ALL.to_vec();
                return criteria;
            }
        };

        let malformed = &mut criteria.malformed;
        criteria.sector = parse_section(obj, CriteriaSection::Sector, malformed);
        criteria.financial = parse_section(obj, CriteriaSection::Financial, malformed);
        criteria.location = parse_section(obj, CriteriaSection::Location, malformed);
        criteria.timeline = parse_section(obj, CriteriaSection::Timeline, malformed);
        criteria.technical = parse_section(obj, CriteriaSection::Technical, malformed);
        criteria.bundling = parse_section(obj, CriteriaSection::Bundling, malformed);
        criteria
    }

    pub fn is_malformed(&self, section: CriteriaSection) -> bool {
        self.malformed.contains(&section)
    }
}

fn parse_section<T: DeserializeOwned + Default>(
    obj: &Map<String, Value>,
    section: CriteriaSection,
    malformed: &mut Vec<CriteriaSection>,
) -> T {
    match obj.get(section.key()) {
        None | Some(Value::Null) => T::default(),
        Some(v) => serde_json::from_value(v.clone()).unwrap_or_else(|_| {
            malformed.push(section);
            T::default()
        }),
    }
}

impl<'de> Deserialize<'de> for Criteria {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Criteria::from_value(&value))
    }
}

// ---------------------------------------------------------------------------
// Opportunity / Funder views
// ---------------------------------------------------------------------------

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// An investment alert seen from the demand side. Absent numbers read as 0.
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub alert: Alert,
}

impl Opportunity {
    pub fn new(alert: Alert) -> Self {
        Self { alert }
    }

    /// Stable reference stored on bundles: the research id when known.
    pub fn reference(&self) -> &str {
        self.alert.research_id.as_deref().unwrap_or(&self.alert.alert_id)
    }

    /// Lower-cased sector: research record first, then `criteria.sector.primary`.
    pub fn sector(&self) -> Option<String> {
        non_empty(self.alert.research.sector.as_deref())
            .or_else(|| non_empty(self.alert.criteria.sector.primary.as_deref()))
            .map(str::to_lowercase)
    }

    pub fn amount(&self) -> f64 {
        self.alert.criteria.financial.amount.unwrap_or(0.0)
    }

    pub fn roi(&self) -> f64 {
        self.alert.criteria.financial.roi_expected.unwrap_or(0.0)
    }

    pub fn carbon_reduction(&self) -> f64 {
        self.alert.criteria.financial.carbon_reduction_tons_annually.unwrap_or(0.0)
    }

    pub fn capacity_mw(&self) -> f64 {
        self.alert.criteria.technical.capacity_mw.unwrap_or(0.0)
    }

    pub fn technology(&self) -> Option<&str> {
        non_empty(self.alert.criteria.technical.technology.as_deref())
    }

    pub fn execution_start(&self) -> Option<&str> {
        non_empty(self.alert.criteria.timeline.execution_start.as_deref())
    }

    pub fn completion(&self) -> Option<&str> {
        non_empty(self.alert.criteria.timeline.completion.as_deref())
    }

    pub fn country(&self) -> Option<&str> {
        non_empty(self.alert.research.country.as_deref())
            .or_else(|| non_empty(self.alert.criteria.location.country.as_deref()))
    }

    pub fn city(&self) -> Option<&str> {
        non_empty(self.alert.research.city.as_deref())
            .or_else(|| non_empty(self.alert.criteria.location.city.as_deref()))
    }
}

/// A funding alert seen from the supply side. Absent numbers read as 0.
#[derive(Debug, Clone)]
pub struct Funder {
    pub alert: Alert,
}

impl Funder {
    pub fn new(alert: Alert) -> Self {
        Self { alert }
    }

    pub fn reference(&self) -> &str {
        self.alert.research_id.as_deref().unwrap_or(&self.alert.alert_id)
    }

    pub fn primary_sector(&self) -> Option<String> {
        non_empty(self.alert.criteria.sector.primary.as_deref()).map(str::to_lowercase)
    }

    pub fn minimum_required(&self) -> f64 {
        self.alert.criteria.financial.minimum_required.unwrap_or(0.0)
    }

    /// Capital the funder has available (`financial.amount`).
    pub fn available_funding(&self) -> f64 {
        self.alert.criteria.financial.amount.unwrap_or(0.0)
    }

    pub fn roi_expected(&self) -> f64 {
        self.alert.criteria.financial.roi_expected.unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Match classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Simple,
    Bundled,
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchType::Simple => write!(f, "simple"),
            MatchType::Bundled => write!(f, "bundled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    /// score >= 0.80: notified automatically.
    High,
    /// 0.60 <= score < 0.80: queued for human approval.
    Medium,
    /// score < 0.60: logged only.
    Low,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_CONFIDENCE_THRESHOLD {
            ConfidenceLevel::High
        } else if score >= MATCH_THRESHOLD {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    Proposed,
    Reviewed,
    Accepted,
    Rejected,
}

impl BundleStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(BundleStatus::Proposed),
            "reviewed" => Some(BundleStatus::Reviewed),
            "accepted" => Some(BundleStatus::Accepted),
            "rejected" => Some(BundleStatus::Rejected),
            _ => None,
        }
    }

    /// Accepted and rejected bundles are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(self, BundleStatus::Accepted | BundleStatus::Rejected)
    }

    pub fn can_transition_to(self, next: BundleStatus) -> bool {
        match (self, next) {
            (BundleStatus::Proposed, BundleStatus::Reviewed) => true,
            (BundleStatus::Proposed | BundleStatus::Reviewed, BundleStatus::Accepted) => true,
            (BundleStatus::Proposed | BundleStatus::Reviewed, BundleStatus::Rejected) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BundleStatus::Proposed => "proposed",
            BundleStatus::Reviewed => "reviewed",
            BundleStatus::Accepted => "accepted",
            BundleStatus::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Bundle metrics
// ---------------------------------------------------------------------------

/// Aggregate financial/impact figures for a set of opportunities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleMetrics {
    pub total_investment: f64,
    /// Investment-weighted ROI, rounded to 2 decimals; 0 when nothing is invested.
    pub blended_roi: f64,
    pub roi_range_min: f64,
    pub roi_range_max: f64,
    pub total_carbon_reduction: f64,
    pub average_carbon_per_project: f64,
    pub total_capacity_mw: f64,
    pub opportunity_count: usize,
    pub countries: Vec<String>,
    pub cities: Vec<String>,
    pub regions: Vec<String>,
    pub sectors: Vec<String>,
    pub technologies: Vec<String>,
    /// Distinct known countries.
    pub geographic_spread: usize,
    pub earliest_start_date: Option<String>,
    pub latest_completion_date: Option<String>,
}

// ---------------------------------------------------------------------------
// Match / bundle
// ---------------------------------------------------------------------------

/// A scored pairing of one funder with one (simple) or more (bundled)
/// opportunities. Only built for scores at or above the match threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bundle {
    /// `bundle-{YYYYmmddHHMMSS}-{n}opp-{fingerprint}`; identical for a
    /// redelivered request evaluating the same participants.
    pub bundle_id: String,
    pub match_type: MatchType,
    pub name: String,
    pub description: String,
    pub funder_id: String,
    pub opportunity_ids: Vec<String>,
    pub primary_sector: String,
    pub compatibility_score: f64,
    pub confidence_level: ConfidenceLevel,
    pub metrics: BundleMetrics,
    pub criteria_met: Vec<String>,
    pub warnings: Vec<String>,
    pub rationale: String,
    pub status: BundleStatus,
    pub created_at: DateTime<Utc>,
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_section_is_isolated() {
        let criteria = Criteria::from_value(&json!({
            "sector": { "primary": "solar_energy" },
            "financial": { "amount": "lots" },
        }));
        assert_eq!(criteria.sector.primary.as_deref(), Some("solar_energy"));
        assert_eq!(criteria.financial, FinancialCriteria::default());
        assert!(criteria.is_malformed(CriteriaSection::Financial));
        assert!(!criteria.is_malformed(CriteriaSection::Sector));
    }

    #[test]
    fn non_object_criteria_marks_every_section() {
        let criteria = Criteria::from_value(&json!("not a document"));
        assert_eq!(criteria.malformed.len(), 6);
    }

    #[test]
    fn null_criteria_is_empty_not_malformed() {
        let criteria: Criteria = serde_json::from_str("null").unwrap();
        assert!(criteria.malformed.is_empty());
    }

    #[test]
    fn absent_numbers_read_as_zero() {
        let opp = Opportunity::new(fixtures::alert("a1", AlertType::Investment, json!({})));
        assert_eq!(opp.amount(), 0.0);
        assert_eq!(opp.roi(), 0.0);
        assert_eq!(opp.capacity_mw(), 0.0);
        assert!(opp.sector().is_none());
    }

    #[test]
    fn research_context_wins_over_criteria() {
        let mut alert = fixtures::alert(
            "a1",
            AlertType::Investment,
            json!({ "sector": { "primary": "Wind_Energy" }, "location": { "country": "Spain" } }),
        );
        assert_eq!(Opportunity::new(alert.clone()).sector().as_deref(), Some("wind_energy"));

        alert.research.sector = Some("Solar_Energy".to_string());
        alert.research.country = Some("France".to_string());
        let opp = Opportunity::new(alert);
        assert_eq!(opp.sector().as_deref(), Some("solar_energy"));
        assert_eq!(opp.country(), Some("France"));
    }

    #[test]
    fn confidence_tiers() {
        assert_eq!(ConfidenceLevel::from_score(0.80), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.79), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.60), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.59), ConfidenceLevel::Low);
    }

    #[test]
    fn terminal_statuses_are_immutable() {
        assert!(BundleStatus::Proposed.can_transition_to(BundleStatus::Reviewed));
        assert!(BundleStatus::Reviewed.can_transition_to(BundleStatus::Accepted));
        assert!(!BundleStatus::Accepted.can_transition_to(BundleStatus::Rejected));
        assert!(!BundleStatus::Rejected.can_transition_to(BundleStatus::Reviewed));
        assert!(!BundleStatus::Reviewed.can_transition_to(BundleStatus::Proposed));
    }
}
