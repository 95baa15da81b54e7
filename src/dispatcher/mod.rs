//! Maps a message's type to its handler and drives one
//! poll-process-acknowledge loop per queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::LATENCY_LOG_EVERY;
use crate::error::{AppError, Result};
use crate::queue::{Message, MessageType, QueueClient, QueueName, ReceivedMessage};

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// `Ok` acknowledges the message; any error leaves it for redelivery.
    async fn handle(&self, message: &Message) -> Result<()>;
}

/// Handler registry for one queue.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: MessageType, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handles(&self, kind: MessageType) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub async fn dispatch(&self, message: &Message) -> Result<()> {
        let kind = message.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| AppError::Handler(format!("no handler registered for {kind}")))?;
        handler.handle(message).await
    }
}

/// Outcome of one receive call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub received: usize,
    pub acked: usize,
    pub failed: usize,
}

pub struct QueueWorker {
    queue: QueueName,
    name: String,
    client: QueueClient,
    dispatcher: Dispatcher,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl QueueWorker {
    pub fn new(
        queue: QueueName,
        client: QueueClient,
        dispatcher: Dispatcher,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        let name = client.name(queue);
        health.register_loop(&name);
        Self {
            queue,
            name,
            client,
            dispatcher,
            health,
            latency,
        }
    }

    /// Polls until `max_iterations` receive calls have been made, or forever
    /// when `None`.
    pub async fn run(self, max_iterations: Option<usize>) {
        info!(queue = %self.name, "Queue worker started");
        let mut iterations = 0usize;
        while max_iterations.map_or(true, |max| iterations < max) {
            iterations += 1;
            let stats = self.poll_once().await;
            if stats.received == 0 {
                debug!(queue = %self.name, "No messages received");
            }
        }
        info!(queue = %self.name, iterations, "Queue worker stopped");
    }

    /// One receive followed by processing of the whole batch. A failed
    /// receive is logged and followed by the configured backoff.
    pub async fn poll_once(&self) -> PollStats {
        self.health.record_poll(&self.name);
        let batch = match self.client.receive(self.queue).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(queue = %self.name, "Receive failed, backing off: {e}");
                self.health.record_receive_error(&self.name);
                tokio::time::sleep(self.client.config().poll_backoff).await;
                return PollStats::default();
            }
        };

        let mut stats = PollStats {
            received: batch.len(),
            ..PollStats::default()
        };
        for received in &batch {
            if self.process(received).await {
                stats.acked += 1;
            } else {
                stats.failed += 1;
            }
        }
        stats
    }

    /// Returns true when the message was handled and deleted.
    async fn process(&self, received: &ReceivedMessage) -> bool {
        let message = match Message::decode(received) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    queue = %self.name,
                    message_id = %received.message_id,
                    kind = %received.envelope.kind,
                    "Undecodable message left for redelivery: {e}"
                );
                self.health.record_failed(&self.name);
                return false;
            }
        };

        let started = Instant::now();
        let result = self.dispatcher.dispatch(&message).await;
        self.latency.record(started.elapsed());

        match result {
            Ok(()) => {
                let deleted = self.client.delete(self.queue, &message.receipt_handle).await;
                self.health.record_processed(&self.name);
                debug!(
                    queue = %self.name,
                    message_id = %message.message_id,
                    kind = %message.kind(),
                    deleted,
                    "Message handled"
                );
                self.maybe_log_latency();
                deleted
            }
            Err(e) => {
                error!(
                    queue = %self.name,
                    message_id = %message.message_id,
                    kind = %message.kind(),
                    receive_count = message.receive_count,
                    "Handler failed, message left for redelivery: {e}"
                );
                self.health.record_failed(&self.name);
                false
            }
        }
    }

    fn maybe_log_latency(&self) {
        let processed = self
            .health
            .loop_health(&self.name)
            .map_or(0, |h| h.processed);
        if processed > 0 && processed % LATENCY_LOG_EVERY == 0 {
            let latency = self.latency.snapshot();
            info!(
                queue = %self.name,
                processed,
                p50_us = latency.p50_us.unwrap_or(0),
                p95_us = latency.p95_us.unwrap_or(0),
                p99_us = latency.p99_us.unwrap_or(0),
                "Handler latency"
            );
        }
    }
}
