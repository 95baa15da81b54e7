use async_trait::async_trait;
use tracing::{info, warn};

use crate::db::{BundleRepository, MatchRepository};
use crate::dispatcher::MessageHandler;
use crate::error::{AppError, Result};
use crate::queue::{Message, MessageBody};

/// `match_status_change` -> bundle status transition.
pub struct StatusChangeHandler {
    bundles: BundleRepository,
}

impl StatusChangeHandler {
    pub fn new(bundles: BundleRepository) -> Self {
        Self { bundles }
    }
}

#[async_trait]
impl MessageHandler for StatusChangeHandler {
    async fn handle(&self, message: &Message) -> Result<()> {
        let MessageBody::MatchStatusChange(change) = &message.body else {
            return Err(AppError::Handler(format!("unexpected {} for status change handler", message.kind())));
        };
        match self
            .bundles
            .transition_status(&change.bundle_id, change.status, change.reviewed_by.as_deref())
            .await
        {
            Ok(_) => Ok(()),
            // Redelivery cannot make this transition valid.
            Err(e @ AppError::InvalidStatusTransition { .. }) => {
                warn!(bundle_id = %change.bundle_id, "Ignoring status change: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// `match_approval_needed` -> proposal marked as awaiting review.
pub struct ApprovalNeededHandler {
    matches: MatchRepository,
}

impl ApprovalNeededHandler {
    pub fn new(matches: MatchRepository) -> Self {
        Self { matches }
    }
}

#[async_trait]
impl MessageHandler for ApprovalNeededHandler {
    async fn handle(&self, message: &Message) -> Result<()> {
        let MessageBody::MatchApprovalNeeded(approval) = &message.body else {
            return Err(AppError::Handler(format!("unexpected {} for approval handler", message.kind())));
        };
        if self.matches.mark_pending_review(&approval.match_id).await? {
            info!(
                match_id = %approval.match_id,
                score = approval.compatibility_score,
                opportunities = approval.opportunities_count,
                "Match awaiting review"
            );
        } else {
            warn!(match_id = %approval.match_id, "No queued proposal for approval request");
        }
        Ok(())
    }
}
