//! Manager-owned metrics collaborator.
//!
//! One `Metrics` instance is held per manager for its lifetime; there is no
//! process-wide registry. Counters are bumped once per failover attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use histogram::{AtomicHistogram, Histogram};
use thiserror::Error;

use crate::cluster::Host;
use crate::policies::OperationType;

const ORDER_TYPE: Ordering = Ordering::Relaxed;

/// Error that occurred upon a metrics operation.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Underlying histogram failure.
    #[error("Histogram error: {0}")]
    HistogramError(#[from] Arc<dyn std::error::Error + Send + Sync>),
    /// No latency has been recorded yet.
    #[error("Histogram is empty")]
    Empty,
}

/// Snapshot of one host's attempt accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostStats {
    /// Attempts routed to the host, successful or not.
    pub attempts: u64,
    /// Attempts that ended in a failure on this host.
    pub failures: u64,
}

#[derive(Default)]
struct HostCounters {
    attempts: AtomicU64,
    failures: AtomicU64,
}

/// Counters and latency tracking for one connection manager.
pub struct Metrics {
    reads: AtomicU64,
    writes: AtomicU64,
    meta_reads: AtomicU64,
    meta_writes: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    per_host: DashMap<Host, HostCounters>,
    latency: Arc<AtomicHistogram>,
}

impl Metrics {
    /// Creates an empty metrics instance.
    pub fn new() -> Self {
        Metrics::default()
    }

    fn counter_for(&self, kind: OperationType) -> &AtomicU64 {
        match kind {
            OperationType::Read => &self.reads,
            OperationType::Write => &self.writes,
            OperationType::MetaRead => &self.meta_reads,
            OperationType::MetaWrite => &self.meta_writes,
        }
    }

    /// Counts one attempt of an operation of the given kind against `host`.
    pub(crate) fn inc_attempt(&self, kind: OperationType, host: Host) {
        self.counter_for(kind).fetch_add(1, ORDER_TYPE);
        self.per_host
            .entry(host)
            .or_default()
            .attempts
            .fetch_add(1, ORDER_TYPE);
    }

    /// Counts one failed attempt against `host`.
    pub(crate) fn inc_failure(&self, host: Host) {
        self.failures.fetch_add(1, ORDER_TYPE);
        self.per_host
            .entry(host)
            .or_default()
            .failures
            .fetch_add(1, ORDER_TYPE);
    }

    /// Counts one failover rotation to another host.
    pub(crate) fn inc_retries(&self) {
        self.retries.fetch_add(1, ORDER_TYPE);
    }

    /// Counts one operation timeout.
    pub(crate) fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, ORDER_TYPE);
    }

    /// Saves the latency of one completed operation.
    ///
    /// # Arguments
    ///
    /// * `latency` - time in milliseconds that should be logged
    pub(crate) fn log_operation_latency(&self, latency: u64) -> Result<(), MetricsError> {
        if let Err(err) = self.latency.increment(latency) {
            Err(MetricsError::HistogramError(Arc::new(err)))
        } else {
            Ok(())
        }
    }

    /// Returns the counter of operations of the given kind.
    pub fn get_operations_num(&self, kind: OperationType) -> u64 {
        self.counter_for(kind).load(ORDER_TYPE)
    }

    /// Returns the counter of failed attempts across all hosts.
    pub fn get_failures_num(&self) -> u64 {
        self.failures.load(ORDER_TYPE)
    }

    /// Returns how many times the failover loop rotated to another host.
    pub fn get_retries_num(&self) -> u64 {
        self.retries.load(ORDER_TYPE)
    }

    /// Returns the counter of operation timeouts.
    pub fn get_timeouts_num(&self) -> u64 {
        self.timeouts.load(ORDER_TYPE)
    }

    /// Returns attempt accounting for one host, if any attempt targeted it.
    pub fn host_stats(&self, host: Host) -> Option<HostStats> {
        self.per_host.get(&host).map(|counters| HostStats {
            attempts: counters.attempts.load(ORDER_TYPE),
            failures: counters.failures.load(ORDER_TYPE),
        })
    }

    /// Returns average operation latency in milliseconds.
    pub fn get_latency_avg_ms(&self) -> Result<u64, MetricsError> {
        Self::mean(&self.latency.load())
    }

    /// Returns operation latency from the histogram for a given percentile.
    ///
    /// # Arguments
    ///
    /// * `percentile` - float value (0.0 - 100.0)
    pub fn get_latency_percentile_ms(&self, percentile: f64) -> Result<u64, MetricsError> {
        let res = self.latency.load().percentile(percentile);

        match res {
            Err(err) => Err(MetricsError::HistogramError(Arc::new(err))),
            Ok(None) => Err(MetricsError::Empty),
            Ok(Some(p)) => Ok(p.count()),
        }
    }

    // Compute the mean, counting each bucket as its interval's center.
    fn mean(h: &Histogram) -> Result<u64, MetricsError> {
        let mut weighted_sum = 0_u128;
        let mut count = 0_u128;

        for bucket in h {
            let mid = ((bucket.start() + bucket.end()) / 2) as u128;
            weighted_sum += mid * bucket.count() as u128;
            count += bucket.count() as u128;
        }

        if count != 0 {
            Ok((weighted_sum / count) as u64)
        } else {
            Err(MetricsError::Empty)
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        // Histogram sizing: max value 2^16 ms, relative error ~0.0002.
        let max_value_power = 16;
        let grouping_power = 12;

        Self {
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            meta_reads: AtomicU64::new(0),
            meta_writes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            per_host: DashMap::new(),
            latency: Arc::new(AtomicHistogram::new(grouping_power, max_value_power).unwrap()),
        }
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .field("meta_reads", &self.meta_reads)
            .field("meta_writes", &self.meta_writes)
            .field("failures", &self.failures)
            .field("retries", &self.retries)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::host;

    #[test]
    fn per_host_and_per_type_counters() {
        let metrics = Metrics::new();
        let a = host("10.0.0.1:9042");
        let b = host("10.0.0.2:9042");

        metrics.inc_attempt(OperationType::Read, a);
        metrics.inc_attempt(OperationType::Read, b);
        metrics.inc_attempt(OperationType::Write, a);
        metrics.inc_failure(a);

        assert_eq!(metrics.get_operations_num(OperationType::Read), 2);
        assert_eq!(metrics.get_operations_num(OperationType::Write), 1);
        assert_eq!(metrics.get_failures_num(), 1);
        assert_eq!(
            metrics.host_stats(a),
            Some(HostStats {
                attempts: 2,
                failures: 1
            })
        );
        assert_eq!(metrics.host_stats(host("10.0.0.3:9042")), None);
    }

    #[test]
    fn latency_mean_over_recorded_samples() {
        let metrics = Metrics::new();
        assert!(metrics.get_latency_avg_ms().is_err());
        for latency in [10, 20, 30] {
            metrics.log_operation_latency(latency).unwrap();
        }
        let avg = metrics.get_latency_avg_ms().unwrap();
        assert!((10..=30).contains(&avg), "implausible mean: {avg}");
    }
}
