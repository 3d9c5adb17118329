//! Shared helpers for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::cluster::Host;
use crate::errors::{ConnectError, OperationError};
use crate::network::{Connection, ProtocolClient};

pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

pub(crate) fn host(s: &str) -> Host {
    s.parse().unwrap()
}

/// Scriptable protocol client: per-host connection refusal and a settable
/// ring, with a counter of successful opens.
#[derive(Clone, Default)]
pub(crate) struct StubClient {
    state: Arc<StubState>,
}

#[derive(Default)]
struct StubState {
    refused: Mutex<HashSet<Host>>,
    ring: Mutex<Vec<Host>>,
    opened: AtomicUsize,
}

impl StubClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn refuse(&self, host: Host) {
        self.state.refused.lock().unwrap().insert(host);
    }

    pub(crate) fn allow(&self, host: Host) {
        self.state.refused.lock().unwrap().remove(&host);
    }

    pub(crate) fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolClient for StubClient {
    type Connection = StubConnection;

    async fn open(&self, host: Host) -> Result<StubConnection, ConnectError> {
        if self.state.refused.lock().unwrap().contains(&host) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{host} refused"),
            )
            .into());
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(StubConnection {
            host,
            healthy: Arc::new(AtomicBool::new(true)),
            client: self.clone(),
        })
    }
}

/// Connection produced by [`StubClient`]; health can be flipped by tests.
pub(crate) struct StubConnection {
    pub(crate) host: Host,
    pub(crate) healthy: Arc<AtomicBool>,
    client: StubClient,
}

impl StubConnection {
    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for StubConnection {
    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn describe_ring(&self) -> Result<Vec<Host>, OperationError> {
        Ok(self.client.state.ring.lock().unwrap().clone())
    }
}
