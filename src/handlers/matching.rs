use async_trait::async_trait;

use crate::dispatcher::MessageHandler;
use crate::error::{AppError, Result};
use crate::matcher::MatchingOrchestrator;
use crate::queue::{Message, MessageBody};

/// `match_request` -> one orchestrator run. A failed run leaves the request
/// queued; rerunning it rewrites the same bundle ids.
pub struct MatchRequestHandler {
    orchestrator: MatchingOrchestrator,
}

impl MatchRequestHandler {
    pub fn new(orchestrator: MatchingOrchestrator) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl MessageHandler for MatchRequestHandler {
    async fn handle(&self, message: &Message) -> Result<()> {
        let MessageBody::MatchRequest(request) = &message.body else {
            return Err(AppError::Handler(format!("unexpected {} for match request handler", message.kind())));
        };
        self.orchestrator.run(request).await?;
        Ok(())
    }
}
