//! Tracks how often each host times out and decides about suspensions.
//!
//! A host that accumulates `timeout_counter` timeouts inside a
//! `timeout_window` is suspended; the scheduled unsuspension pass returns it
//! to rotation once `suspension_duration` has elapsed. The tracker only keeps
//! the books — the manager applies the actual state transitions.

use std::collections::VecDeque;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::cluster::Host;
use crate::config::ManagerConfig;

#[derive(Default)]
struct TimeoutWindow {
    samples: VecDeque<Instant>,
}

pub(crate) struct TimeoutTracker {
    timeout_counter: usize,
    timeout_window: std::time::Duration,
    suspension_duration: std::time::Duration,
    windows: DashMap<Host, TimeoutWindow>,
    suspended_at: DashMap<Host, Instant>,
}

impl TimeoutTracker {
    pub(crate) fn new(config: &ManagerConfig) -> Self {
        Self {
            timeout_counter: config.timeout_counter.max(1),
            timeout_window: config.timeout_window,
            suspension_duration: config.suspension_duration,
            windows: DashMap::new(),
            suspended_at: DashMap::new(),
        }
    }

    /// Records a timeout for `host`; returns `true` when the host just
    /// crossed the suspension threshold.
    pub(crate) fn record_timeout(&self, host: Host) -> bool {
        self.record_timeout_at(host, Instant::now())
    }

    fn record_timeout_at(&self, host: Host, now: Instant) -> bool {
        if self.suspended_at.contains_key(&host) {
            return false;
        }

        let mut window = self.windows.entry(host).or_default();
        window.samples.push_back(now);
        if window.samples.len() > self.timeout_counter {
            window.samples.pop_front();
        }

        // The overflow check inspects only the oldest retained sample, so a
        // stale sample at the head can delay suspension by one event for
        // bursty timeout patterns.
        if window.samples.len() == self.timeout_counter {
            let oldest = *window
                .samples
                .front()
                .expect("window holds timeout_counter samples");
            if now.duration_since(oldest) <= self.timeout_window {
                // Start the next window from scratch, so one threshold
                // crossing suspends exactly once.
                window.samples.clear();
                drop(window);
                self.suspended_at.insert(host, now);
                return true;
            }
        }
        false
    }

    /// Records a suspension started outside the tracker (the administrative
    /// `suspend_host` path), so the unsuspension pass will revive it.
    pub(crate) fn mark_suspended(&self, host: Host) {
        self.suspended_at.entry(host).or_insert_with(Instant::now);
    }

    /// Hosts whose suspension has run its course as of `now`. Removed from
    /// the suspended books; the caller moves them back to ACTIVE.
    pub(crate) fn drain_expired(&self, now: Instant) -> Vec<Host> {
        let expired: Vec<Host> = self
            .suspended_at
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) >= self.suspension_duration)
            .map(|entry| *entry.key())
            .collect();
        for host in &expired {
            self.suspended_at.remove(host);
        }
        expired
    }

    /// Drops all state kept for `host` (removal, down-marking, manual
    /// unsuspension).
    pub(crate) fn forget(&self, host: Host) {
        self.windows.remove(&host);
        self.suspended_at.remove(&host);
    }
}
