//! Handler latency: time from a decoded message to its handler returning,
//! shared by every queue worker and read by the monitoring API.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;

use crate::error::{AppError, Result};

/// Slowest handler run the histogram resolves (one hour, in microseconds).
const MAX_TRACKED_US: u64 = 3_600_000_000;

/// Point-in-time view of handler latency. Quantiles are `None` until the
/// first handler has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
}

pub struct LatencyStats {
    handler_us: Mutex<Histogram<u64>>,
}

impl LatencyStats {
    pub fn new() -> Result<Self> {
        let handler_us = Histogram::new_with_bounds(1, MAX_TRACKED_US, 3)
            .map_err(|e| AppError::Config(format!("latency histogram: {e}")))?;
        Ok(Self {
            handler_us: Mutex::new(handler_us),
        })
    }

    /// Runs longer than an hour are clamped into the top bucket.
    pub fn record(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        if let Ok(mut h) = self.handler_us.lock() {
            h.saturating_record(us.clamp(1, MAX_TRACKED_US));
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let Ok(h) = self.handler_us.lock() else {
            return LatencySnapshot::default();
        };
        if h.is_empty() {
            return LatencySnapshot::default();
        }
        LatencySnapshot {
            samples: h.len(),
            p50_us: Some(h.value_at_quantile(0.5)),
            p95_us: Some(h.value_at_quantile(0.95)),
            p99_us: Some(h.value_at_quantile(0.99)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_workers_report_no_quantiles() {
        let stats = LatencyStats::new().unwrap();
        assert_eq!(stats.snapshot(), LatencySnapshot::default());
    }

    #[test]
    fn quantiles_follow_recorded_handler_runs() {
        let stats = LatencyStats::new().unwrap();
        for ms in 1..=100 {
            stats.record(Duration::from_millis(ms));
        }
        let snapshot = stats.snapshot();
        let p50 = snapshot.p50_us.unwrap();
        assert!((49_000..=51_000).contains(&p50), "p50 was {p50}");
        assert!(snapshot.p95_us.unwrap() >= p50);
        assert!(snapshot.p99_us.unwrap() >= snapshot.p95_us.unwrap());
        assert_eq!(snapshot.samples, 100);
    }

    #[test]
    fn instant_and_runaway_handlers_are_clamped() {
        let stats = LatencyStats::new().unwrap();
        stats.record(Duration::ZERO);
        stats.record(Duration::from_secs(10 * 3600));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples, 2);
        assert!(snapshot.p99_us.unwrap() >= MAX_TRACKED_US);
    }
}
