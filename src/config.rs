//! Configuration consumed at manager construction.

use std::time::Duration;

use crate::policies::{FailoverPolicy, LoadBalancingPolicy};

/// Sizing and waiting knobs for a single host's connection pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Upper bound on connections kept per host.
    pub capacity: usize,
    /// How long a borrow may wait for a connection when the pool is at
    /// capacity before failing with `PoolExhausted`.
    pub borrow_timeout: Duration,
    /// Deadline for opening a fresh connection (including the protocol
    /// handshake performed by the embedder's client).
    pub connect_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            capacity: 50,
            borrow_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Read-only options consumed by [`ConnectionManager`](crate::ConnectionManager)
/// at construction.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Default pool options applied to every host added without explicit
    /// per-host options (initial hosts, discovered hosts, re-added hosts).
    pub pool_options: PoolOptions,

    /// When `true`, hosts marked down are probed periodically and re-added
    /// once a connection to them can be opened again. When `false`, a downed
    /// host stays down until explicitly re-added.
    pub retry_downed_hosts: bool,
    /// Interval between probe rounds of the downed-host retry service.
    pub downed_host_retry_interval: Duration,

    /// Number of recent timeouts a host's window retains; reaching this count
    /// within [`timeout_window`](Self::timeout_window) suspends the host.
    pub timeout_counter: usize,
    /// Width of the timeout window.
    pub timeout_window: Duration,
    /// How long a suspension lasts before the host is eligible for
    /// reactivation.
    pub suspension_duration: Duration,
    /// Interval between runs of the unsuspension pass.
    pub unsuspend_check_interval: Duration,

    /// Enables the topology auto-discovery service.
    pub auto_discovery: bool,
    /// Interval between discovery probes.
    pub auto_discovery_interval: Duration,

    /// Failover policy applied to operations that do not carry their own.
    pub failover_policy: FailoverPolicy,
    /// Strategy used to pick the pool serving each operation.
    pub load_balancing: LoadBalancingPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pool_options: PoolOptions::default(),
            retry_downed_hosts: true,
            downed_host_retry_interval: Duration::from_secs(10),
            timeout_counter: 10,
            timeout_window: Duration::from_millis(500),
            suspension_duration: Duration::from_secs(10),
            unsuspend_check_interval: Duration::from_secs(10),
            auto_discovery: true,
            auto_discovery_interval: Duration::from_secs(30),
            failover_policy: FailoverPolicy::TryAllAvailable,
            load_balancing: LoadBalancingPolicy::RoundRobin,
        }
    }
}
