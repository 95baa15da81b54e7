//! Concrete message handlers and the queue -> message type routing table.

pub mod approvals;
pub mod logging;
pub mod matching;
pub mod research;

use std::sync::Arc;

use crate::db::{AlertRepository, BundleRepository, MatchRepository};
use crate::dispatcher::{Dispatcher, MessageHandler};
use crate::matcher::MatchingOrchestrator;
use crate::queue::{MessageType, QueueName};

pub use approvals::{ApprovalNeededHandler, StatusChangeHandler};
pub use logging::LogOnlyHandler;
pub use matching::MatchRequestHandler;
pub use research::ResearchCompleteHandler;

/// Queues a worker process polls. Match results are for downstream consumers.
pub const WORKER_QUEUES: [QueueName; 5] = [
    QueueName::Investment,
    QueueName::Funding,
    QueueName::Results,
    QueueName::MatchRequests,
    QueueName::MatchApprovals,
];

/// Message types accepted on each queue.
pub fn kinds_for(queue: QueueName) -> &'static [MessageType] {
    match queue {
        QueueName::Investment => &[MessageType::InvestmentOpportunity, MessageType::ResearchRequest],
        QueueName::Funding => &[MessageType::FundingOpportunity, MessageType::MatchRequest],
        QueueName::Results => &[
            MessageType::ResearchComplete,
            MessageType::MatchResult,
            MessageType::MatchFound,
        ],
        QueueName::MatchRequests => &[MessageType::MatchRequest],
        QueueName::MatchResults => &[MessageType::MatchFound],
        QueueName::MatchApprovals => &[MessageType::MatchApprovalNeeded, MessageType::MatchStatusChange],
    }
}

pub struct Handlers {
    matching: Arc<dyn MessageHandler>,
    status: Arc<dyn MessageHandler>,
    approval: Arc<dyn MessageHandler>,
    research: Arc<dyn MessageHandler>,
    log_only: Arc<dyn MessageHandler>,
}

impl Handlers {
    pub fn new(
        orchestrator: MatchingOrchestrator,
        alerts: AlertRepository,
        bundles: BundleRepository,
        matches: MatchRepository,
    ) -> Self {
        Self {
            matching: Arc::new(MatchRequestHandler::new(orchestrator)),
            status: Arc::new(StatusChangeHandler::new(bundles)),
            approval: Arc::new(ApprovalNeededHandler::new(matches)),
            research: Arc::new(ResearchCompleteHandler::new(alerts)),
            log_only: Arc::new(LogOnlyHandler),
        }
    }

    /// Every message type has exactly one handler; adding a type fails to
    /// compile until it is routed here.
    pub fn route(&self, kind: MessageType) -> Arc<dyn MessageHandler> {
        match kind {
            MessageType::MatchRequest => self.matching.clone(),
            MessageType::MatchStatusChange => self.status.clone(),
            MessageType::MatchApprovalNeeded => self.approval.clone(),
            MessageType::ResearchComplete => self.research.clone(),
            MessageType::MatchResult
            | MessageType::MatchFound
            | MessageType::InvestmentOpportunity
            | MessageType::FundingOpportunity
            | MessageType::ResearchRequest => self.log_only.clone(),
        }
    }

    pub fn dispatcher_for(&self, queue: QueueName) -> Dispatcher {
        kinds_for(queue)
            .iter()
            .fold(Dispatcher::new(), |d, &kind| d.register(kind, self.route(kind)))
    }
}
