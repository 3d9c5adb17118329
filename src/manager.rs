//! The connection manager: single source of truth for the host set, the pool
//! set and failover execution.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::future::RemoteHandle;
use futures::FutureExt;
use itertools::Itertools;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::cluster::discovery;
use crate::cluster::timeout_tracker::TimeoutTracker;
use crate::cluster::{Host, HostStatus};
use crate::config::{ManagerConfig, PoolOptions};
use crate::errors::{
    ConnectionPoolError, ErrorKind, ExecutionError, NewManagerError, OperationError,
};
use crate::network::connection_pool::ConnectionPool;
use crate::network::{BorrowedConnection, ProtocolClient};
use crate::observability::metrics::Metrics;
use crate::policies::load_balancing::Balancer;
use crate::policies::Operation;

/// Immutable snapshot of the host/pool bookkeeping.
///
/// A host appears in at most one logical set: pools minus `suspended` is the
/// active set, `suspended` hosts keep their pool but are excluded from
/// selection, `down` hosts have no pool. Mutations clone the snapshot under
/// the topology lock and swap it in whole, so readers never observe a host in
/// two sets.
struct ClusterView<C: ProtocolClient> {
    pools: BTreeMap<Host, Arc<ConnectionPool<C>>>,
    suspended: BTreeSet<Host>,
    down: BTreeSet<Host>,
}

impl<C: ProtocolClient> ClusterView<C> {
    fn empty() -> Self {
        Self {
            pools: BTreeMap::new(),
            suspended: BTreeSet::new(),
            down: BTreeSet::new(),
        }
    }
}

impl<C: ProtocolClient> Clone for ClusterView<C> {
    fn clone(&self) -> Self {
        Self {
            pools: self.pools.clone(),
            suspended: self.suspended.clone(),
            down: self.down.clone(),
        }
    }
}

pub(crate) struct ManagerInner<C: ProtocolClient> {
    client: Arc<C>,
    config: ManagerConfig,
    view: ArcSwap<ClusterView<C>>,
    // Serializes clone-and-swap mutations of the view; never held across an
    // await point.
    topology_lock: StdMutex<()>,
    balancer: Balancer,
    tracker: TimeoutTracker,
    metrics: Arc<Metrics>,
}

struct Workers {
    _unsuspender: RemoteHandle<()>,
    _discovery: Option<RemoteHandle<()>>,
    _downed_retry: Option<RemoteHandle<()>>,
}

/// Maintains a live view of cluster topology, a bounded connection pool per
/// host, and routes each operation to a healthy node with failover.
///
/// The manager spawns up to three background services: the unsuspension pass
/// of the timeout tracker, topology auto-discovery, and the downed-host retry
/// probe. They are cancelled by [`shutdown`](Self::shutdown) or when the
/// manager is dropped.
pub struct ConnectionManager<C: ProtocolClient> {
    inner: Arc<ManagerInner<C>>,
    workers: StdMutex<Option<Workers>>,
}

impl<C: ProtocolClient> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager").finish_non_exhaustive()
    }
}

fn spawn_worker<F>(fut: F) -> RemoteHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (fut, handle) = fut.remote_handle();
    tokio::spawn(fut);
    handle
}

impl<C: ProtocolClient> ConnectionManager<C> {
    /// Creates a manager over `initial_hosts` and starts the configured
    /// background services. Must be called within a Tokio runtime.
    ///
    /// Pools are filled lazily: no connection is opened until the first
    /// borrow. Fails if `initial_hosts` is empty.
    pub fn new(
        client: C,
        initial_hosts: impl IntoIterator<Item = Host>,
        config: ManagerConfig,
    ) -> Result<Self, NewManagerError> {
        Self::with_metrics(client, initial_hosts, config, Arc::new(Metrics::new()))
    }

    /// Like [`new`](Self::new), with a caller-owned metrics collaborator.
    pub fn with_metrics(
        client: C,
        initial_hosts: impl IntoIterator<Item = Host>,
        config: ManagerConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, NewManagerError> {
        let client = Arc::new(client);
        let mut pools = BTreeMap::new();
        for host in initial_hosts {
            pools.entry(host).or_insert_with(|| {
                ConnectionPool::new(host, Arc::clone(&client), config.pool_options.clone())
            });
        }
        if pools.is_empty() {
            return Err(NewManagerError::EmptyInitialHostList);
        }
        info!(
            "Starting connection manager with host(s): {}",
            pools.keys().format(", ")
        );

        let inner = Arc::new(ManagerInner {
            client,
            balancer: Balancer::new(config.load_balancing),
            tracker: TimeoutTracker::new(&config),
            view: ArcSwap::from_pointee(ClusterView {
                pools,
                suspended: BTreeSet::new(),
                down: BTreeSet::new(),
            }),
            topology_lock: StdMutex::new(()),
            metrics,
            config,
        });

        let workers = Workers {
            _unsuspender: spawn_worker(run_unsuspender(Arc::clone(&inner))),
            _discovery: inner
                .config
                .auto_discovery
                .then(|| spawn_worker(discovery::run(Arc::clone(&inner)))),
            _downed_retry: inner
                .config
                .retry_downed_hosts
                .then(|| spawn_worker(run_downed_host_retry(Arc::clone(&inner)))),
        };

        Ok(Self {
            inner,
            workers: StdMutex::new(Some(workers)),
        })
    }

    /// Registers `host` with default pool options and an ACTIVE status.
    ///
    /// Returns `false` (a no-op) when a pool for the host already exists.
    pub fn add_host(&self, host: Host) -> bool {
        self.inner
            .add_host_with(host, self.inner.config.pool_options.clone())
    }

    /// Registers `host` with caller-supplied pool options, skipping the
    /// defaults. Returns `false` when a pool for the host already exists.
    pub fn add_host_with(&self, host: Host, options: PoolOptions) -> bool {
        self.inner.add_host_with(host, options)
    }

    /// Deregisters `host` from every set and destroys its pool, invalidating
    /// outstanding connections. Returns `false` if the host was unknown.
    pub fn remove_host(&self, host: Host) -> bool {
        self.inner.remove_host(host)
    }

    /// Moves `host` out of the active set and destroys its pool. When
    /// `retry_downed_hosts` is configured the host is probed periodically and
    /// re-added once reachable; otherwise it stays down until explicitly
    /// re-added. Returns `false` if the host had no pool.
    pub fn mark_host_down(&self, host: Host) -> bool {
        self.inner.mark_host_down(host)
    }

    /// Excludes `host` from selection without destroying its pool.
    /// Returns `false` if the host has no pool or is already suspended.
    pub fn suspend_host(&self, host: Host) -> bool {
        self.inner.suspend_host(host)
    }

    /// Returns a suspended `host` to the active set.
    /// Returns `false` if the host was not suspended.
    pub fn unsuspend_host(&self, host: Host) -> bool {
        self.inner.unsuspend_host(host)
    }

    /// Hosts currently eligible for selection.
    pub fn active_hosts(&self) -> Vec<Host> {
        let view = self.inner.view.load();
        view.pools
            .keys()
            .filter(|host| !view.suspended.contains(host))
            .copied()
            .collect()
    }

    /// Hosts currently suspended (pool retained, excluded from selection).
    pub fn suspended_hosts(&self) -> Vec<Host> {
        self.inner.view.load().suspended.iter().copied().collect()
    }

    /// Hosts currently believed unreachable.
    pub fn downed_hosts(&self) -> Vec<Host> {
        self.inner.view.load().down.iter().copied().collect()
    }

    /// Health of `host`, or `None` when the host is unknown.
    pub fn host_status(&self, host: Host) -> Option<HostStatus> {
        let view = self.inner.view.load();
        if view.suspended.contains(&host) {
            Some(HostStatus::Suspended)
        } else if view.pools.contains_key(&host) {
            Some(HostStatus::Active)
        } else if view.down.contains(&host) {
            Some(HostStatus::Down)
        } else {
            None
        }
    }

    /// The manager's metrics collaborator.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Borrows a connection from the pool picked by the load balancing
    /// policy over the active set.
    pub async fn borrow_connection(&self) -> Result<BorrowedConnection<C>, ExecutionError> {
        self.inner.borrow_connection().await
    }

    /// Returns a borrowed connection to its pool. Equivalent to dropping the
    /// guard; connections flagged broken are closed instead of re-pooled.
    pub fn release_connection(&self, conn: BorrowedConnection<C>) {
        drop(conn);
    }

    /// Runs `body` against a connection to a healthy host, retrying per the
    /// operation's failover policy.
    ///
    /// Each attempt targets a distinct host. Transport failures mark the host
    /// down, timeouts feed the timeout tracker (possibly suspending the
    /// host), and application-level errors are surfaced immediately without
    /// retry. The loop is bounded by the policy's attempt budget; the last
    /// underlying failure is attached to the terminal error.
    pub async fn execute_with_failover<T, F, Fut>(
        &self,
        op: Operation,
        body: F,
    ) -> Result<T, ExecutionError>
    where
        F: Fn(Arc<C::Connection>) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let inner = &self.inner;
        let policy = op.failover().unwrap_or(inner.config.failover_policy);
        let max_attempts = {
            let view = inner.view.load();
            let active = view.pools.len().saturating_sub(view.suspended.len());
            policy.max_attempts(active)
        };

        let mut excluded: SmallVec<[Host; 4]> = SmallVec::new();
        let mut attempts = 0usize;
        let mut last_error: Option<OperationError> = None;

        loop {
            // Reload the view on every attempt: hosts suspended or downed by
            // the background services mid-sequence must not be selected even
            // when they are not in the per-call exclusion list.
            let view = inner.view.load();
            let pool = inner
                .balancer
                .select(&view.pools, |host| {
                    view.suspended.contains(&host) || excluded.contains(&host)
                })
                .map(Arc::clone);
            drop(view);

            let Some(pool) = pool else {
                return Err(ExecutionError::NoAvailableHosts { last_error });
            };
            let host = pool.host();

            inner.metrics.inc_attempt(op.kind(), host);
            let started = std::time::Instant::now();

            let mut conn = match pool.borrow().await {
                Ok(conn) => conn,
                Err(
                    err @ ConnectionPoolError::PoolExhausted { .. }
                    | err @ ConnectionPoolError::PoolClosed { .. },
                ) => {
                    // Capacity (or a racing shutdown), not reachability;
                    // surfaced to the caller as retryable.
                    return Err(ExecutionError::Pool(err));
                }
                Err(ConnectionPoolError::ConnectFailed { source, .. }) => {
                    debug!("[{}] Connect failed during failover: {}", host, source);
                    inner.metrics.inc_failure(host);
                    inner.mark_host_down(host);
                    last_error = Some(OperationError::transport(source));
                    excluded.push(host);
                    attempts += 1;
                    if attempts >= max_attempts {
                        return Err(ExecutionError::FailoverExhausted {
                            attempts,
                            last_error: last_error.expect("failure recorded this attempt"),
                        });
                    }
                    inner.metrics.inc_retries();
                    continue;
                }
            };

            let err = match body(Arc::clone(conn.connection())).await {
                Ok(value) => {
                    let _ = inner
                        .metrics
                        .log_operation_latency(started.elapsed().as_millis() as u64);
                    drop(conn);
                    return Ok(value);
                }
                Err(err) => err,
            };

            match err.kind() {
                ErrorKind::Application => {
                    // Retrying elsewhere would not change the outcome.
                    inner.metrics.inc_failure(host);
                    drop(conn);
                    return Err(ExecutionError::Operation(err));
                }
                ErrorKind::Transport => {
                    debug!("[{}] Transport failure during operation: {}", host, err);
                    conn.mark_broken();
                    drop(conn);
                    inner.mark_host_down(host);
                }
                ErrorKind::Timeout => {
                    debug!("[{}] Operation timed out", host);
                    drop(conn);
                    inner.metrics.inc_timeouts();
                    if inner.tracker.record_timeout(host) {
                        inner.suspend_host(host);
                    }
                }
            }

            inner.metrics.inc_failure(host);
            last_error = Some(err);
            excluded.push(host);
            attempts += 1;
            if attempts >= max_attempts {
                return Err(ExecutionError::FailoverExhausted {
                    attempts,
                    last_error: last_error.expect("failure recorded this attempt"),
                });
            }
            inner.metrics.inc_retries();
        }
    }

    /// Cancels the background services, invalidates every pool and empties
    /// the host set. Safe to call once, a no-op on repeat. In-flight
    /// request-path operations complete against the pools they already hold.
    pub fn shutdown(&self) {
        let workers = self
            .workers
            .lock()
            .expect("workers mutex poisoned")
            .take();
        if workers.is_some() {
            debug!("Stopping background services");
        }
        drop(workers);

        let old = {
            let _guard = self
                .inner
                .topology_lock
                .lock()
                .expect("topology mutex poisoned");
            self.inner.view.swap(Arc::new(ClusterView::empty()))
        };
        for pool in old.pools.values() {
            pool.invalidate_all();
        }
        if !old.pools.is_empty() {
            info!("Connection manager shut down");
        }
    }
}

impl<C: ProtocolClient> ManagerInner<C> {
    pub(crate) fn default_pool_options(&self) -> PoolOptions {
        self.config.pool_options.clone()
    }

    pub(crate) fn discovery_interval(&self) -> Duration {
        self.config.auto_discovery_interval
    }

    /// Every host the manager knows about, whatever its status.
    pub(crate) fn known_hosts(&self) -> BTreeSet<Host> {
        let view = self.view.load();
        view.pools
            .keys()
            .chain(view.down.iter())
            .copied()
            .collect()
    }

    pub(crate) async fn borrow_connection(
        &self,
    ) -> Result<BorrowedConnection<C>, ExecutionError> {
        let view = self.view.load();
        let pool = self
            .balancer
            .select(&view.pools, |host| view.suspended.contains(&host))
            .map(Arc::clone)
            .ok_or(ExecutionError::NoAvailableHosts { last_error: None })?;
        drop(view);
        pool.borrow().await.map_err(ExecutionError::Pool)
    }

    pub(crate) fn add_host_with(&self, host: Host, options: PoolOptions) -> bool {
        let _guard = self.topology_lock.lock().expect("topology mutex poisoned");
        let current = self.view.load();
        if current.pools.contains_key(&host) {
            return false;
        }
        let mut next = (**current).clone();
        next.down.remove(&host);
        next.pools
            .insert(host, ConnectionPool::new(host, Arc::clone(&self.client), options));
        self.view.store(Arc::new(next));
        self.tracker.forget(host);
        info!("[{}] Host added to the active pool set", host);
        true
    }

    fn remove_host(&self, host: Host) -> bool {
        let removed_pool = {
            let _guard = self.topology_lock.lock().expect("topology mutex poisoned");
            let current = self.view.load();
            if !current.pools.contains_key(&host) && !current.down.contains(&host) {
                return false;
            }
            let mut next = (**current).clone();
            let pool = next.pools.remove(&host);
            next.suspended.remove(&host);
            next.down.remove(&host);
            self.view.store(Arc::new(next));
            pool
        };
        self.tracker.forget(host);
        if let Some(pool) = removed_pool {
            pool.invalidate_all();
        }
        info!("[{}] Host removed", host);
        true
    }

    pub(crate) fn mark_host_down(&self, host: Host) -> bool {
        let downed_pool = {
            let _guard = self.topology_lock.lock().expect("topology mutex poisoned");
            let current = self.view.load();
            let Some(pool) = current.pools.get(&host).cloned() else {
                // Unknown or already down; nothing to destroy.
                return false;
            };
            let mut next = (**current).clone();
            next.pools.remove(&host);
            next.suspended.remove(&host);
            next.down.insert(host);
            self.view.store(Arc::new(next));
            pool
        };
        self.tracker.forget(host);
        downed_pool.invalidate_all();
        warn!("[{}] Host marked as down", host);
        true
    }

    pub(crate) fn suspend_host(&self, host: Host) -> bool {
        {
            let _guard = self.topology_lock.lock().expect("topology mutex poisoned");
            let current = self.view.load();
            if !current.pools.contains_key(&host) || current.suspended.contains(&host) {
                return false;
            }
            let mut next = (**current).clone();
            next.suspended.insert(host);
            self.view.store(Arc::new(next));
        }
        self.tracker.mark_suspended(host);
        warn!("[{}] Host suspended", host);
        true
    }

    pub(crate) fn unsuspend_host(&self, host: Host) -> bool {
        {
            let _guard = self.topology_lock.lock().expect("topology mutex poisoned");
            let current = self.view.load();
            if !current.suspended.contains(&host) {
                return false;
            }
            let mut next = (**current).clone();
            next.suspended.remove(&host);
            self.view.store(Arc::new(next));
        }
        self.tracker.forget(host);
        info!("[{}] Host unsuspended, back in rotation", host);
        true
    }
}

/// Scheduled pass returning suspended hosts to rotation once their
/// suspension has run its course.
async fn run_unsuspender<C: ProtocolClient>(inner: Arc<ManagerInner<C>>) {
    let interval = inner.config.unsuspend_check_interval;
    debug!("Started unsuspension worker, checking every {:?}", interval);
    loop {
        tokio::time::sleep(interval).await;
        for host in inner.tracker.drain_expired(tokio::time::Instant::now()) {
            debug!("[{}] Suspension expired", host);
            inner.unsuspend_host(host);
        }
    }
}

/// Scheduled probe re-adding downed hosts once a connection to them can be
/// opened again.
async fn run_downed_host_retry<C: ProtocolClient>(inner: Arc<ManagerInner<C>>) {
    let interval = inner.config.downed_host_retry_interval;
    debug!(
        "Started downed-host retry worker, probing every {:?}",
        interval
    );
    loop {
        tokio::time::sleep(interval).await;
        let downed: Vec<Host> = inner.view.load().down.iter().copied().collect();
        for host in downed {
            let probe = tokio::time::timeout(
                inner.config.pool_options.connect_timeout,
                inner.client.open(host),
            )
            .await;
            match probe {
                Ok(Ok(_conn)) => {
                    info!("[{}] Downed host is reachable again, re-adding", host);
                    inner.add_host_with(host, inner.config.pool_options.clone());
                }
                Ok(Err(err)) => {
                    debug!("[{}] Still unreachable: {}", host, err);
                }
                Err(_elapsed) => {
                    debug!("[{}] Still unreachable: connect timed out", host);
                }
            }
        }
    }
}
