//! Topology auto-discovery: periodically learns ring members the manager
//! does not know yet and adds them with default configuration.

use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, error, info};

use crate::cluster::Host;
use crate::errors::ExecutionError;
use crate::manager::ManagerInner;
use crate::network::{Connection, ProtocolClient};

/// Fixed-delay discovery loop. A pass only starts after the previous one has
/// completed, and every failure is logged and swallowed: discovery is
/// best-effort and the next scheduled run retries independently.
pub(crate) async fn run<C: ProtocolClient>(inner: Arc<ManagerInner<C>>) {
    let interval = inner.discovery_interval();
    debug!(
        "Started topology auto-discovery worker, probing every {:?}",
        interval
    );
    loop {
        tokio::time::sleep(interval).await;
        discover_once(&inner).await;
    }
}

pub(crate) async fn discover_once<C: ProtocolClient>(inner: &Arc<ManagerInner<C>>) {
    match probe_ring(inner).await {
        Ok(found) if found.is_empty() => {
            debug!("Topology discovery pass found no new hosts");
        }
        Ok(found) => {
            info!(
                "Found {} new host(s) in ring: {}",
                found.len(),
                found.iter().format(", ")
            );
            for host in found {
                inner.add_host_with(host, inner.default_pool_options());
            }
        }
        Err(err) => {
            error!("Topology discovery pass failed: {}", err);
        }
    }
}

async fn probe_ring<C: ProtocolClient>(
    inner: &Arc<ManagerInner<C>>,
) -> Result<Vec<Host>, ExecutionError> {
    let known = inner.known_hosts();
    let conn = inner.borrow_connection().await?;
    let ring = conn
        .connection()
        .describe_ring()
        .await
        .map_err(ExecutionError::Operation)?;
    drop(conn);

    Ok(ring
        .into_iter()
        .unique()
        .filter(|host| !known.contains(host))
        .collect())
}
