use std::time::Duration;

use crate::error::{AppError, Result};
use crate::queue::QueueName;

/// Minimum composite score for a candidate to be persisted as a match.
pub const MATCH_THRESHOLD: f64 = 0.60;

/// Composite score at or above which a match is high confidence.
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.80;

/// Bundle combinations whose summed investment is below this fraction of the
/// funder minimum are pruned before scoring.
pub const BUNDLE_PREFILTER_RATIO: f64 = 0.80;

/// Hard ceiling on messages returned by a single receive call.
pub const MAX_RECEIVE_BATCH: usize = 10;

/// How often a long-polling receive re-checks the queue table (milliseconds).
pub const RECEIVE_POLL_INTERVAL_MS: u64 = 250;

/// Timeout for the external notification API.
pub const NOTIFY_TIMEOUT_SECS: u64 = 10;

/// Handler latency is logged every N processed messages per loop.
pub const LATENCY_LOG_EVERY: u64 = 100;

/// Upper bound on a requested alert lookback; larger values mean "everything".
pub const MAX_LOOKBACK_DAYS: i64 = 36_500;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub queues: QueueConfig,
    pub matching: MatchingConfig,
    pub jobs: JobConfig,
    /// External notification endpoint for high-confidence matches (NOTIFICATION_API_URL).
    pub notification_api_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue name prefix (QUEUE_PREFIX).
    pub prefix: String,
    /// How long a received message stays hidden from other consumers (VISIBILITY_TIMEOUT_SECS).
    pub visibility_timeout: Duration,
    /// Long-poll wait per receive (RECEIVE_WAIT_SECS).
    pub receive_wait: Duration,
    /// Messages per receive, 1..=10 (MAX_MESSAGES).
    pub max_messages: usize,
    /// Messages older than this are dropped by the transport (MESSAGE_RETENTION_SECS).
    pub message_retention: Duration,
    /// Sleep after a failed receive (POLL_BACKOFF_SECS).
    pub poll_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Default alert lookback when a request does not carry one (MATCH_LOOKBACK_DAYS).
    pub lookback_days: i64,
    /// Largest bundle the combination search will try (MAX_BUNDLE_SIZE).
    pub max_bundle_size: usize,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Match/bundle rows older than this are deleted by the cleanup job (MATCH_RETENTION_DAYS).
    pub retention_days: i64,
    /// Scheduled matching job period (MATCH_JOB_INTERVAL_SECS).
    pub match_interval: Duration,
    /// Cleanup job period (CLEANUP_INTERVAL_SECS).
    pub cleanup_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefix: "fundmatch".to_string(),
            visibility_timeout: Duration::from_secs(300),
            receive_wait: Duration::from_secs(20),
            max_messages: MAX_RECEIVE_BATCH,
            message_retention: Duration::from_secs(345_600),
            poll_backoff: Duration::from_secs(5),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            max_bundle_size: 5,
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            match_interval: Duration::from_secs(86_400),
            cleanup_interval: Duration::from_secs(86_400),
        }
    }
}

impl QueueConfig {
    /// Physical queue name for a logical queue.
    pub fn queue_name(&self, queue: QueueName) -> String {
        format!("{}-{}", self.prefix, queue.suffix())
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let queue_defaults = QueueConfig::default();
        let matching_defaults = MatchingConfig::default();
        let job_defaults = JobConfig::default();

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "fundmatch.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            queues: QueueConfig {
                prefix: std::env::var("QUEUE_PREFIX").unwrap_or(queue_defaults.prefix),
                visibility_timeout: env_secs("VISIBILITY_TIMEOUT_SECS", queue_defaults.visibility_timeout),
                receive_wait: env_secs("RECEIVE_WAIT_SECS", queue_defaults.receive_wait),
                max_messages: std::env::var("MAX_MESSAGES")
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(queue_defaults.max_messages)
                    .clamp(1, MAX_RECEIVE_BATCH),
                message_retention: env_secs("MESSAGE_RETENTION_SECS", queue_defaults.message_retention),
                poll_backoff: env_secs("POLL_BACKOFF_SECS", queue_defaults.poll_backoff),
            },
            matching: MatchingConfig {
                lookback_days: std::env::var("MATCH_LOOKBACK_DAYS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(matching_defaults.lookback_days),
                max_bundle_size: std::env::var("MAX_BUNDLE_SIZE")
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(matching_defaults.max_bundle_size),
            },
            jobs: JobConfig {
                retention_days: std::env::var("MATCH_RETENTION_DAYS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(job_defaults.retention_days),
                match_interval: env_secs("MATCH_JOB_INTERVAL_SECS", job_defaults.match_interval),
                cleanup_interval: env_secs("CLEANUP_INTERVAL_SECS", job_defaults.cleanup_interval),
            },
            notification_api_url: std::env::var("NOTIFICATION_API_URL")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
