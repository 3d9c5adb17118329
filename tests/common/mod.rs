//! Shared scriptable collaborators for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ringpool::errors::{ConnectError, OperationError};
use ringpool::{Connection, Host, ProtocolClient};

pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

pub fn host(s: &str) -> Host {
    s.parse().unwrap()
}

pub fn transport_err() -> OperationError {
    OperationError::transport(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    ))
}

pub fn app_err() -> OperationError {
    OperationError::application(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        "malformed request",
    ))
}

/// Protocol client whose per-host behavior tests can script: connection
/// refusal, the ring reported by `describe_ring`, and an open log.
#[derive(Clone, Default)]
pub struct MockClient {
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    refused: Mutex<HashSet<Host>>,
    ring: Mutex<Vec<Host>>,
    opened: Mutex<Vec<Host>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes connection attempts to `host` fail with a refused error.
    pub fn refuse(&self, host: Host) {
        self.state.refused.lock().unwrap().insert(host);
    }

    /// Lets connection attempts to `host` succeed again.
    pub fn allow(&self, host: Host) {
        self.state.refused.lock().unwrap().remove(&host);
    }

    /// Sets the member list reported by `describe_ring`.
    pub fn set_ring(&self, hosts: Vec<Host>) {
        *self.state.ring.lock().unwrap() = hosts;
    }

    /// How many connections were successfully opened to `host`.
    pub fn opened_to(&self, host: Host) -> usize {
        self.state
            .opened
            .lock()
            .unwrap()
            .iter()
            .filter(|h| **h == host)
            .count()
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    type Connection = MockConnection;

    async fn open(&self, host: Host) -> Result<MockConnection, ConnectError> {
        if self.state.refused.lock().unwrap().contains(&host) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{host} refused"),
            )
            .into());
        }
        self.state.opened.lock().unwrap().push(host);
        Ok(MockConnection {
            host,
            client: self.clone(),
        })
    }
}

pub struct MockConnection {
    pub host: Host,
    client: MockClient,
}

#[async_trait]
impl Connection for MockConnection {
    fn is_healthy(&self) -> bool {
        true
    }

    async fn describe_ring(&self) -> Result<Vec<Host>, OperationError> {
        Ok(self.client.state.ring.lock().unwrap().clone())
    }
}
