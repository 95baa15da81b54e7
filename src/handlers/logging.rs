use async_trait::async_trait;
use tracing::info;

use crate::dispatcher::MessageHandler;
use crate::error::Result;
use crate::queue::{Message, MessageBody};

/// Acknowledges messages this service only reports on.
pub struct LogOnlyHandler;

#[async_trait]
impl MessageHandler for LogOnlyHandler {
    async fn handle(&self, message: &Message) -> Result<()> {
        match &message.body {
            MessageBody::MatchResult(r) => info!(
                total = r.total_matches,
                high = r.high_confidence,
                medium = r.medium_confidence,
                investment = r.investment_alerts_processed,
                funding = r.funding_alerts_processed,
                "Match run summary"
            ),
            MessageBody::MatchFound(f) => info!(
                bundle_id = %f.bundle_id,
                opportunities = f.opportunities,
                score = f.score,
                match_type = %f.match_type,
                "Match found"
            ),
            MessageBody::InvestmentOpportunity(v)
            | MessageBody::FundingOpportunity(v)
            | MessageBody::ResearchRequest(v) => info!(
                kind = %message.kind(),
                message_id = %message.message_id,
                fields = v.as_object().map_or(0, |o| o.len()),
                "Research workflow message acknowledged"
            ),
            other => info!(kind = %other.kind(), message_id = %message.message_id, "Message acknowledged"),
        }
        Ok(())
    }
}
