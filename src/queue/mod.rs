pub mod message;
pub mod sqlite;
pub mod transport;

pub use message::{Envelope, Message, MessageBody, MessageType, PeekedMessage, ReceivedMessage};
pub use sqlite::SqliteQueue;
pub use transport::{QueueAttributes, QueueClient, QueueTransport};

/// Logical queues. Physical names are `{prefix}-{suffix}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Investment,
    Funding,
    Results,
    MatchRequests,
    MatchResults,
    MatchApprovals,
}

impl QueueName {
    pub const ALL: [QueueName; 6] = [
        QueueName::Investment,
        QueueName::Funding,
        QueueName::Results,
        QueueName::MatchRequests,
        QueueName::MatchResults,
        QueueName::MatchApprovals,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            QueueName::Investment => "investment-opportunities",
            QueueName::Funding => "funding-opportunities",
            QueueName::Results => "research-results",
            QueueName::MatchRequests => "match-requests",
            QueueName::MatchResults => "match-results",
            QueueName::MatchApprovals => "match-approvals",
        }
    }

    /// Accepts either the short name (`match-requests`) or the suffix.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "investment" | "investment-opportunities" => Some(QueueName::Investment),
            "funding" | "funding-opportunities" => Some(QueueName::Funding),
            "results" | "research-results" => Some(QueueName::Results),
            "match-requests" => Some(QueueName::MatchRequests),
            "match-results" => Some(QueueName::MatchResults),
            "match-approvals" => Some(QueueName::MatchApprovals),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.suffix())
    }
}
