//! Client-side connection pooling, load balancing and failover for
//! multi-node data stores speaking a stateful binary protocol.
//!
//! The crate maintains a live view of cluster topology, keeps a bounded pool
//! of reusable connections per node, routes each logical operation to a
//! healthy node, reacts to node failure and slowness without involving the
//! caller, and retries according to a configurable policy. It does **not**
//! implement a wire protocol: connections are opened by a
//! [`ProtocolClient`] the embedder supplies.
//!
//! # Overview
//!
//! All activity revolves around the [`ConnectionManager`]. It owns one
//! bounded connection pool per host, consults the configured
//! [`LoadBalancingPolicy`] for every operation, and tracks each host through
//! the `ACTIVE` / `SUSPENDED` / `DOWN` state machine: transport failures mark
//! a host down (destroying its pool), repeated timeouts suspend it for a
//! cooldown, and background services unsuspend recovered hosts, re-probe
//! downed ones and discover new ring members.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use ringpool::errors::{ConnectError, OperationError};
//! use ringpool::{
//!     Connection, ConnectionManager, Host, ManagerConfig, Operation, ProtocolClient,
//! };
//!
//! struct MyClient;
//! struct MyConnection;
//!
//! #[async_trait]
//! impl ProtocolClient for MyClient {
//!     type Connection = MyConnection;
//!
//!     async fn open(&self, host: Host) -> Result<MyConnection, ConnectError> {
//!         // TCP connect and protocol handshake go here.
//!         Ok(MyConnection)
//!     }
//! }
//!
//! #[async_trait]
//! impl Connection for MyConnection {
//!     fn is_healthy(&self) -> bool {
//!         true
//!     }
//!
//!     async fn describe_ring(&self) -> Result<Vec<Host>, OperationError> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::new(
//!         MyClient,
//!         ["127.0.0.1:9042".parse::<Host>()?],
//!         ManagerConfig::default(),
//!     )?;
//!
//!     let answer = manager
//!         .execute_with_failover(Operation::read(), |_conn: Arc<MyConnection>| async move {
//!             // Run the request on the borrowed connection here.
//!             Ok::<_, OperationError>(42)
//!         })
//!         .await?;
//!     assert_eq!(answer, 42);
//!
//!     manager.shutdown();
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod errors;
pub mod network;
pub mod observability;
pub mod policies;

mod manager;

#[cfg(test)]
pub(crate) mod test_utils;

pub use cluster::{Host, HostStatus};
pub use config::{ManagerConfig, PoolOptions};
pub use manager::ConnectionManager;
pub use network::{BorrowedConnection, Connection, ProtocolClient};
pub use observability::metrics::Metrics;
pub use policies::{FailoverPolicy, LoadBalancingPolicy, Operation, OperationType};
