//! Host identity, health tracking and the background services that maintain
//! the host set.

mod host;

pub(crate) mod discovery;
pub(crate) mod timeout_tracker;

pub use host::{Host, HostStatus};
