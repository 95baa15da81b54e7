use async_trait::async_trait;
use tracing::info;

use crate::db::AlertRepository;
use crate::dispatcher::MessageHandler;
use crate::error::{AppError, Result};
use crate::queue::{Message, MessageBody};

/// `research_complete` -> research record and alert upserts. Both are keyed,
/// so a redelivered message rewrites the same rows.
pub struct ResearchCompleteHandler {
    alerts: AlertRepository,
}

impl ResearchCompleteHandler {
    pub fn new(alerts: AlertRepository) -> Self {
        Self { alerts }
    }
}

#[async_trait]
impl MessageHandler for ResearchCompleteHandler {
    async fn handle(&self, message: &Message) -> Result<()> {
        let MessageBody::ResearchComplete(done) = &message.body else {
            return Err(AppError::Handler(format!("unexpected {} for research handler", message.kind())));
        };

        if let (Some(research_id), Some(research)) = (&done.research_id, &done.research) {
            self.alerts.upsert_research(research_id, research).await?;
        }

        match &done.alert {
            Some(alert) => {
                let mut alert = alert.clone();
                if alert.research_id.is_none() {
                    alert.research_id = done.research_id.clone();
                }
                self.alerts.upsert(&alert).await?;
                info!(
                    alert_id = %alert.alert_id,
                    alert_type = %alert.alert_type,
                    research_id = ?alert.research_id,
                    "Alert recorded from research"
                );
            }
            None => info!(research_id = ?done.research_id, "Research complete without an alert"),
        }
        Ok(())
    }
}
