//! Error types surfaced by the connection layer.
//!
//! The taxonomy is deliberately flat: failures raised while running an
//! operation are classified into [`ErrorKind`] by the failover loop, and
//! everything else is a terminal condition reported to the caller.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cluster::Host;

/// Classification of an operation failure, consumed by the failover loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The host could not be reached or the connection broke mid-request.
    Transport,
    /// The operation did not complete within the protocol-level deadline.
    Timeout,
    /// The request itself was rejected; retrying elsewhere cannot help.
    Application,
}

/// Failure to establish a connection to a host.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectError {
    /// IO error while connecting.
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// The connect attempt did not finish within the configured deadline.
    #[error("Connect timeout")]
    ConnectTimeout,

    /// The remote host refused the protocol handshake.
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),
}

impl From<std::io::Error> for ConnectError {
    fn from(err: std::io::Error) -> Self {
        ConnectError::Io(Arc::new(err))
    }
}

/// Error raised by executing an operation on a live connection.
///
/// Produced by the embedder's protocol code; the variant *is* the
/// classification the failover loop acts upon (see [`ErrorKind`]).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum OperationError {
    /// Connection-level failure while the operation was in flight.
    #[error("Transport failure: {0}")]
    Transport(Arc<dyn std::error::Error + Send + Sync>),

    /// The operation timed out at the protocol level.
    #[error("Operation timed out")]
    Timeout,

    /// The remote end processed the request and rejected it.
    #[error("Application error: {0}")]
    Application(Arc<dyn std::error::Error + Send + Sync>),
}

impl OperationError {
    /// Wraps a cause as a transport-class failure.
    pub fn transport(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        OperationError::Transport(Arc::new(cause))
    }

    /// Wraps a cause as an application-class failure.
    pub fn application(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        OperationError::Application(Arc::new(cause))
    }

    /// The classification of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OperationError::Transport(_) => ErrorKind::Transport,
            OperationError::Timeout => ErrorKind::Timeout,
            OperationError::Application(_) => ErrorKind::Application,
        }
    }
}

/// Failure to supply a connection from a host's pool.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectionPoolError {
    /// Every connection stayed borrowed for the whole bounded wait.
    ///
    /// This is a capacity signal, not a reachability signal: the host is not
    /// marked down and the caller may simply retry later.
    #[error("No connection to {host} became available within {waited:?}")]
    PoolExhausted {
        /// Host whose pool was saturated.
        host: Host,
        /// How long the borrow waited before giving up.
        waited: Duration,
    },

    /// The pool has been invalidated (host removed, downed, or shut down).
    #[error("Pool for {host} has been shut down")]
    PoolClosed {
        /// Host whose pool is gone.
        host: Host,
    },

    /// Opening a fresh connection failed.
    #[error("Failed to open a connection to {host}: {source}")]
    ConnectFailed {
        /// Host that could not be reached.
        host: Host,
        /// The underlying connect failure.
        #[source]
        source: ConnectError,
    },
}

/// Terminal failure of [`execute_with_failover`](crate::ConnectionManager::execute_with_failover).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ExecutionError {
    /// Every known host is excluded, suspended or down.
    #[error("No hosts available to serve the operation")]
    NoAvailableHosts {
        /// Failure that ended the last attempt, if any attempt was made.
        #[source]
        last_error: Option<OperationError>,
    },

    /// The retry budget was spent without a successful attempt.
    #[error("Failover exhausted after {attempts} attempt(s)")]
    FailoverExhausted {
        /// Number of attempts made, each against a distinct host.
        attempts: usize,
        /// Failure that ended the final attempt.
        #[source]
        last_error: OperationError,
    },

    /// The selected pool could not supply a connection in time.
    #[error(transparent)]
    Pool(#[from] ConnectionPoolError),

    /// The operation failed with an application-level error; not retried.
    #[error(transparent)]
    Operation(OperationError),
}

/// Error constructing a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum NewManagerError {
    /// The initial host list was empty; at least one host is required.
    #[error("Empty initial host list")]
    EmptyInitialHostList,
}
