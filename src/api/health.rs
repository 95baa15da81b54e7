//! Shared health state for the /health endpoint.
//! Updated by every queue worker loop, read by the API.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;

/// Counters for one queue loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopHealth {
    /// Unix epoch milliseconds of the last receive attempt (0 = never).
    pub last_poll_at_ms: i64,
    pub polls: u64,
    pub processed: u64,
    pub failed: u64,
    pub receive_errors: u64,
}

/// Shared health metrics. Written by queue workers, read by the API.
#[derive(Default)]
pub struct HealthState {
    processed: AtomicU64,
    failed: AtomicU64,
    loops: DashMap<String, LoopHealth>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a loop visible before its first poll.
    pub fn register_loop(&self, queue: &str) {
        self.loops.entry(queue.to_string()).or_default();
    }

    pub fn record_poll(&self, queue: &str) {
        let mut entry = self.loops.entry(queue.to_string()).or_default();
        entry.polls += 1;
        entry.last_poll_at_ms = Utc::now().timestamp_millis();
    }

    pub fn record_processed(&self, queue: &str) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.loops.entry(queue.to_string()).or_default().processed += 1;
    }

    pub fn record_failed(&self, queue: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.loops.entry(queue.to_string()).or_default().failed += 1;
    }

    pub fn record_receive_error(&self, queue: &str) {
        self.loops.entry(queue.to_string()).or_default().receive_errors += 1;
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn loop_health(&self, queue: &str) -> Option<LoopHealth> {
        self.loops.get(queue).map(|entry| *entry)
    }

    /// Snapshot of every loop, sorted by queue name.
    pub fn loops(&self) -> BTreeMap<String, LoopHealth> {
        self.loops
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}
