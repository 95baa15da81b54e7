use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::types::{AlertStatus, AlertType, BundleStatus, MatchType};

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    InvestmentOpportunity,
    FundingOpportunity,
    ResearchRequest,
    ResearchComplete,
    MatchRequest,
    MatchResult,
    MatchFound,
    MatchApprovalNeeded,
    MatchStatusChange,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::InvestmentOpportunity => "investment_opportunity",
            MessageType::FundingOpportunity => "funding_opportunity",
            MessageType::ResearchRequest => "research_request",
            MessageType::ResearchComplete => "research_complete",
            MessageType::MatchRequest => "match_request",
            MessageType::MatchResult => "match_result",
            MessageType::MatchFound => "match_found",
            MessageType::MatchApprovalNeeded => "match_approval_needed",
            MessageType::MatchStatusChange => "match_status_change",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "investment_opportunity" => Some(MessageType::InvestmentOpportunity),
            "funding_opportunity" => Some(MessageType::FundingOpportunity),
            "research_request" => Some(MessageType::ResearchRequest),
            "research_complete" => Some(MessageType::ResearchComplete),
            "match_request" => Some(MessageType::MatchRequest),
            "match_result" => Some(MessageType::MatchResult),
            "match_found" => Some(MessageType::MatchFound),
            "match_approval_needed" => Some(MessageType::MatchApprovalNeeded),
            "match_status_change" => Some(MessageType::MatchStatusChange),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Wire envelope
// ---------------------------------------------------------------------------

/// `{type, payload, timestamp}` as it travels through a queue. `type` stays a
/// string here so an unknown type can be reported instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// An envelope handed out by `receive`, with the transport's delivery metadata.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Changes on every delivery; only the latest one deletes the message.
    pub receipt_handle: String,
    pub receive_count: u32,
    pub envelope: Envelope,
}

/// An envelope seen through `peek`; carries no receipt handle.
#[derive(Debug, Clone, Serialize)]
pub struct PeekedMessage {
    pub message_id: String,
    pub receive_count: u32,
    pub envelope: Envelope,
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequestPayload {
    /// Falls back to the configured lookback when absent.
    #[serde(default)]
    pub lookback_days: Option<i64>,
    #[serde(default = "default_trigger_source")]
    pub trigger_source: String,
    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,
}

fn default_trigger_source() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFoundPayload {
    pub bundle_id: String,
    pub opportunities: usize,
    pub score: f64,
    #[serde(rename = "type")]
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResultPayload {
    pub total_matches: usize,
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub investment_alerts_processed: usize,
    pub funding_alerts_processed: usize,
}

/// Minimal reviewable summary; never the full match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalNeededPayload {
    pub match_id: String,
    pub match_type: MatchType,
    pub compatibility_score: f64,
    pub opportunities_count: usize,
    pub funders_count: usize,
    pub total_investment: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangePayload {
    pub bundle_id: String,
    pub status: BundleStatus,
    #[serde(default)]
    pub reviewed_by: Option<String>,
}

/// Alert produced by the upstream research workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub alert_id: String,
    pub alert_type: AlertType,
    #[serde(default)]
    pub research_id: Option<String>,
    #[serde(default)]
    pub criteria: Value,
    #[serde(default)]
    pub status: Option<AlertStatus>,
}

/// Location/sector summary of the research record behind an alert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchPayload {
    pub city: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub sector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchCompletePayload {
    #[serde(default)]
    pub research_id: Option<String>,
    #[serde(default)]
    pub research: Option<ResearchPayload>,
    #[serde(default)]
    pub alert: Option<AlertPayload>,
}

// ---------------------------------------------------------------------------
// Decoded body
// ---------------------------------------------------------------------------

/// A decoded message body. Research-side payloads stay opaque: that workflow
/// lives outside this service.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    InvestmentOpportunity(Value),
    FundingOpportunity(Value),
    ResearchRequest(Value),
    ResearchComplete(ResearchCompletePayload),
    MatchRequest(MatchRequestPayload),
    MatchResult(MatchResultPayload),
    MatchFound(MatchFoundPayload),
    MatchApprovalNeeded(ApprovalNeededPayload),
    MatchStatusChange(StatusChangePayload),
}

impl MessageBody {
    pub fn kind(&self) -> MessageType {
        match self {
            MessageBody::InvestmentOpportunity(_) => MessageType::InvestmentOpportunity,
            MessageBody::FundingOpportunity(_) => MessageType::FundingOpportunity,
            MessageBody::ResearchRequest(_) => MessageType::ResearchRequest,
            MessageBody::ResearchComplete(_) => MessageType::ResearchComplete,
            MessageBody::MatchRequest(_) => MessageType::MatchRequest,
            MessageBody::MatchResult(_) => MessageType::MatchResult,
            MessageBody::MatchFound(_) => MessageType::MatchFound,
            MessageBody::MatchApprovalNeeded(_) => MessageType::MatchApprovalNeeded,
            MessageBody::MatchStatusChange(_) => MessageType::MatchStatusChange,
        }
    }

    pub fn decode(envelope: &Envelope) -> Result<Self> {
        let kind = MessageType::parse(&envelope.kind)
            .ok_or_else(|| AppError::UnknownMessageType(envelope.kind.clone()))?;
        let payload = envelope.payload.clone();
        Ok(match kind {
            MessageType::InvestmentOpportunity => MessageBody::InvestmentOpportunity(payload),
            MessageType::FundingOpportunity => MessageBody::FundingOpportunity(payload),
            MessageType::ResearchRequest => MessageBody::ResearchRequest(payload),
            MessageType::ResearchComplete => MessageBody::ResearchComplete(serde_json::from_value(payload)?),
            MessageType::MatchRequest => MessageBody::MatchRequest(serde_json::from_value(payload)?),
            MessageType::MatchResult => MessageBody::MatchResult(serde_json::from_value(payload)?),
            MessageType::MatchFound => MessageBody::MatchFound(serde_json::from_value(payload)?),
            MessageType::MatchApprovalNeeded => {
                MessageBody::MatchApprovalNeeded(serde_json::from_value(payload)?)
            }
            MessageType::MatchStatusChange => {
                MessageBody::MatchStatusChange(serde_json::from_value(payload)?)
            }
        })
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        let payload = match self {
            MessageBody::InvestmentOpportunity(v)
            | MessageBody::FundingOpportunity(v)
            | MessageBody::ResearchRequest(v) => v.clone(),
            MessageBody::ResearchComplete(p) => serde_json::to_value(p)?,
            MessageBody::MatchRequest(p) => serde_json::to_value(p)?,
            MessageBody::MatchResult(p) => serde_json::to_value(p)?,
            MessageBody::MatchFound(p) => serde_json::to_value(p)?,
            MessageBody::MatchApprovalNeeded(p) => serde_json::to_value(p)?,
            MessageBody::MatchStatusChange(p) => serde_json::to_value(p)?,
        };
        Ok(Envelope {
            kind: self.kind().as_str().to_string(),
            payload,
            timestamp: Utc::now(),
        })
    }
}

/// A received message whose body has been decoded.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: String,
    pub receipt_handle: String,
    pub receive_count: u32,
    pub timestamp: DateTime<Utc>,
    pub body: MessageBody,
}

impl Message {
    pub fn decode(received: &ReceivedMessage) -> Result<Self> {
        Ok(Self {
            message_id: received.message_id.clone(),
            receipt_handle: received.receipt_handle.clone(),
            receive_count: received.receive_count,
            timestamp: received.envelope.timestamp,
            body: MessageBody::decode(&received.envelope)?,
        })
    }

    pub fn kind(&self) -> MessageType {
        self.body.kind()
    }
}
