use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::Result;
use crate::queue::message::{
    Envelope, MatchRequestPayload, MessageBody, PeekedMessage, ReceivedMessage,
};
use crate::queue::QueueName;

/// Monitoring counters, named after the managed-queue attributes they mirror.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueueAttributes {
    pub approximate_number_of_messages: i64,
    pub approximate_number_of_messages_not_visible: i64,
    /// Seconds; 0 for an empty queue.
    pub approximate_age_of_oldest_message: i64,
}

/// At-least-once message queue. Queues are addressed by physical name.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enqueue an envelope; returns the transport-assigned message id.
    async fn send(&self, queue: &str, envelope: &Envelope) -> Result<String>;

    /// Long-poll for up to `wait`, returning at most `max` messages. Each
    /// returned message is hidden for `visibility` and gets a fresh receipt handle.
    async fn receive(
        &self,
        queue: &str,
        max: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<ReceivedMessage>>;

    /// Acknowledge a message. `Ok(false)` means the handle is no longer current.
    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<bool>;

    /// Visible messages, without claiming them.
    async fn peek(&self, queue: &str, max: usize) -> Result<Vec<PeekedMessage>>;

    async fn attributes(&self, queue: &str) -> Result<QueueAttributes>;

    /// Drop every message in the queue; returns how many were removed.
    async fn purge(&self, queue: &str) -> Result<u64>;
}

/// Explicitly constructed handle over a transport plus the queue-name table.
/// Send failures are logged and reported as `None` so callers can carry on.
#[derive(Clone)]
pub struct QueueClient {
    transport: Arc<dyn QueueTransport>,
    config: QueueConfig,
}

impl QueueClient {
    pub fn new(transport: Arc<dyn QueueTransport>, config: QueueConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn name(&self, queue: QueueName) -> String {
        self.config.queue_name(queue)
    }

    pub async fn send_message(&self, queue: QueueName, body: &MessageBody) -> Option<String> {
        let name = self.name(queue);
        let envelope = match body.to_envelope() {
            Ok(e) => e,
            Err(e) => {
                error!(queue = %name, "Failed to encode {} message: {e}", body.kind());
                return None;
            }
        };
        match self.transport.send(&name, &envelope).await {
            Ok(message_id) => {
                info!(queue = %name, message_id = %message_id, kind = %body.kind(), "Sent message");
                Some(message_id)
            }
            Err(e) => {
                error!(queue = %name, kind = %body.kind(), "Failed to send message: {e}");
                None
            }
        }
    }

    pub async fn send_match_request(&self, payload: MatchRequestPayload) -> Option<String> {
        self.send_message(QueueName::MatchRequests, &MessageBody::MatchRequest(payload))
            .await
    }

    /// One long-poll receive with the configured batch size, wait and visibility.
    pub async fn receive(&self, queue: QueueName) -> Result<Vec<ReceivedMessage>> {
        let name = self.name(queue);
        let messages = self
            .transport
            .receive(
                &name,
                self.config.max_messages,
                self.config.receive_wait,
                self.config.visibility_timeout,
            )
            .await?;
        debug!(queue = %name, count = messages.len(), "Received messages");
        Ok(messages)
    }

    pub async fn delete(&self, queue: QueueName, receipt_handle: &str) -> bool {
        let name = self.name(queue);
        match self.transport.delete(&name, receipt_handle).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(queue = %name, "Receipt handle is stale; message will be redelivered");
                false
            }
            Err(e) => {
                error!(queue = %name, "Failed to delete message: {e}");
                false
            }
        }
    }

    pub async fn peek(&self, queue: QueueName, max: usize) -> Result<Vec<PeekedMessage>> {
        self.transport.peek(&self.name(queue), max).await
    }

    pub async fn attributes(&self, queue: QueueName) -> Result<QueueAttributes> {
        self.transport.attributes(&self.name(queue)).await
    }
}
