//! Connections and per-host connection pools.

mod connection;
pub(crate) mod connection_pool;

pub use connection::{Connection, ProtocolClient};
pub use connection_pool::BorrowedConnection;
