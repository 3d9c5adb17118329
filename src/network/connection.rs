//! Collaborator traits implemented by the embedder's protocol code.
//!
//! The connection layer never speaks the wire protocol itself: it asks a
//! [`ProtocolClient`] to open connections and hands those connections to
//! operation bodies. Everything the layer needs to know about a live
//! connection is captured by the [`Connection`] trait.

use async_trait::async_trait;

use crate::cluster::Host;
use crate::errors::{ConnectError, OperationError};

/// Factory for protocol connections to individual hosts.
///
/// Implementations are expected to perform the full protocol handshake in
/// [`open`](Self::open), so that a returned connection is immediately usable.
/// A failure here is treated as evidence that the host is unreachable.
#[async_trait]
pub trait ProtocolClient: Send + Sync + 'static {
    /// The live connection type produced by [`open`](Self::open).
    type Connection: Connection;

    /// Opens a connection to `host` and performs the protocol handshake.
    async fn open(&self, host: Host) -> Result<Self::Connection, ConnectError>;
}

/// A single established protocol connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Whether the connection is still usable for new operations.
    ///
    /// Unhealthy idle connections are discarded on the next borrow and their
    /// capacity is replenished lazily.
    fn is_healthy(&self) -> bool;

    /// Queries cluster topology for the full set of ring members.
    ///
    /// Consumed by the topology auto-discovery service; hosts returned here
    /// that the manager does not know yet are added with default
    /// configuration.
    async fn describe_ring(&self) -> Result<Vec<Host>, OperationError>;
}
