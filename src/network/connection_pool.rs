//! Bounded pool of reusable connections to a single host.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::cluster::Host;
use crate::config::PoolOptions;
use crate::errors::{ConnectError, ConnectionPoolError};
use crate::network::connection::{Connection, ProtocolClient};

/// A bounded set of reusable connections to exactly one host.
///
/// Capacity is enforced with a semaphore: a borrow first acquires a permit
/// (bounded by the configured borrow timeout), then reuses an idle connection
/// or opens a fresh one. Connections are only ever opened lazily, on borrow.
pub(crate) struct ConnectionPool<C: ProtocolClient> {
    host: Host,
    client: Arc<C>,
    options: PoolOptions,
    limiter: Arc<Semaphore>,
    idle: Mutex<Vec<Arc<C::Connection>>>,
    // Bumped by invalidate_all; a returning borrow whose generation does not
    // match drops its connection instead of re-pooling it.
    generation: AtomicU64,
    in_use: AtomicUsize,
}

impl<C: ProtocolClient> ConnectionPool<C> {
    pub(crate) fn new(host: Host, client: Arc<C>, options: PoolOptions) -> Arc<Self> {
        Arc::new(Self {
            host,
            client,
            limiter: Arc::new(Semaphore::new(options.capacity.max(1))),
            options,
            idle: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            in_use: AtomicUsize::new(0),
        })
    }

    pub(crate) fn host(&self) -> Host {
        self.host
    }

    /// Number of currently borrowed connections; feeds the least-active
    /// balancing policy.
    pub(crate) fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }

    /// Borrows a connection, waiting up to the configured borrow timeout for
    /// capacity. Opening a fresh connection is bounded separately by the
    /// connect timeout; a connect failure propagates to the caller.
    pub(crate) async fn borrow(
        self: &Arc<Self>,
    ) -> Result<BorrowedConnection<C>, ConnectionPoolError> {
        let waited = self.options.borrow_timeout;
        let permit =
            match tokio::time::timeout(waited, Arc::clone(&self.limiter).acquire_owned()).await {
                Err(_elapsed) => {
                    return Err(ConnectionPoolError::PoolExhausted {
                        host: self.host,
                        waited,
                    })
                }
                Ok(Err(_closed)) => {
                    return Err(ConnectionPoolError::PoolClosed { host: self.host })
                }
                Ok(Ok(permit)) => permit,
            };

        let generation = self.generation.load(Ordering::Acquire);

        // Reuse an idle connection if a healthy one is left; unhealthy idles
        // are discarded here, replenishing capacity lazily.
        let reused = {
            let mut idle = self.idle.lock().unwrap();
            loop {
                match idle.pop() {
                    None => break None,
                    Some(conn) if conn.is_healthy() => break Some(conn),
                    Some(_unhealthy) => {
                        trace!("[{}] Discarding unhealthy idle connection", self.host);
                    }
                }
            }
        };

        let conn = match reused {
            Some(conn) => conn,
            None => {
                let opened =
                    tokio::time::timeout(self.options.connect_timeout, self.client.open(self.host))
                        .await;
                match opened {
                    Err(_elapsed) => {
                        return Err(ConnectionPoolError::ConnectFailed {
                            host: self.host,
                            source: ConnectError::ConnectTimeout,
                        })
                    }
                    Ok(Err(err)) => {
                        return Err(ConnectionPoolError::ConnectFailed {
                            host: self.host,
                            source: err,
                        })
                    }
                    Ok(Ok(conn)) => {
                        trace!("[{}] Opened a fresh connection", self.host);
                        Arc::new(conn)
                    }
                }
            }
        };

        self.in_use.fetch_add(1, Ordering::AcqRel);
        Ok(BorrowedConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            generation,
            broken: false,
            _permit: permit,
        })
    }

    /// Forcibly closes every connection. Idle connections are dropped now;
    /// borrowed ones are dropped when their guard returns against the stale
    /// generation. Subsequent borrows fail with `PoolClosed`.
    pub(crate) fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.limiter.close();
        let drained = {
            let mut idle = self.idle.lock().unwrap();
            std::mem::take(&mut *idle)
        };
        debug!(
            "[{}] Pool invalidated, dropped {} idle connection(s)",
            self.host,
            drained.len()
        );
    }

    fn return_conn(&self, conn: Arc<C::Connection>, generation: u64, broken: bool) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        if broken || !conn.is_healthy() {
            trace!("[{}] Closing connection flagged broken", self.host);
            return;
        }
        if generation != self.generation.load(Ordering::Acquire) || self.limiter.is_closed() {
            // The pool was invalidated while this connection was out.
            return;
        }
        self.idle.lock().unwrap().push(conn);
    }
}

/// A connection checked out of a host's pool.
///
/// Dropping the guard returns the connection: healthy connections go back to
/// the idle set, connections flagged with [`mark_broken`](Self::mark_broken)
/// are closed and their capacity is replenished lazily on a later borrow.
pub struct BorrowedConnection<C: ProtocolClient> {
    conn: Option<Arc<C::Connection>>,
    pool: Arc<ConnectionPool<C>>,
    generation: u64,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl<C: ProtocolClient> std::fmt::Debug for BorrowedConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BorrowedConnection")
            .field("host", &self.pool.host())
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl<C: ProtocolClient> BorrowedConnection<C> {
    /// Host this connection is established to.
    pub fn host(&self) -> Host {
        self.pool.host()
    }

    /// The underlying protocol connection.
    pub fn connection(&self) -> &Arc<C::Connection> {
        self.conn
            .as_ref()
            .expect("connection present until the guard is dropped")
    }

    /// Flags the connection as broken; it will be closed instead of returned
    /// to the idle set.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<C: ProtocolClient> Drop for BorrowedConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_conn(conn, self.generation, self.broken);
        }
    }
}
