//! Metrics kept by the connection manager.

pub mod metrics;
