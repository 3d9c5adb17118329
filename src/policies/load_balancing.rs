//! Load balancing: choosing which pool serves the next operation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::cluster::Host;
use crate::network::connection_pool::ConnectionPool;
use crate::network::ProtocolClient;

/// Strategy used to pick the pool serving each operation.
///
/// The strategy set is closed and fixed at construction; both variants share
/// one atomic cursor so that concurrent callers spread over the host set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancingPolicy {
    /// Cycle through the pools in a stable order, skipping excluded hosts.
    #[default]
    RoundRobin,
    /// Pick the pool with the fewest borrowed connections among non-excluded
    /// hosts; ties are broken in round-robin order.
    LeastActive,
}

/// Selection state shared by all callers of one manager.
pub(crate) struct Balancer {
    policy: LoadBalancingPolicy,
    cursor: AtomicUsize,
}

impl Balancer {
    pub(crate) fn new(policy: LoadBalancingPolicy) -> Self {
        // Random starting offset, so independent managers do not all hammer
        // the first host in the ring.
        Self {
            policy,
            cursor: AtomicUsize::new(rand::rng().random::<u32>() as usize),
        }
    }

    /// Picks a pool among `pools`, skipping hosts for which `excluded`
    /// returns `true`. Returns `None` when the filtered set is empty.
    pub(crate) fn select<'a, C, F>(
        &self,
        pools: &'a BTreeMap<Host, Arc<ConnectionPool<C>>>,
        excluded: F,
    ) -> Option<&'a Arc<ConnectionPool<C>>>
    where
        C: ProtocolClient,
        F: Fn(Host) -> bool,
    {
        let eligible: Vec<&Arc<ConnectionPool<C>>> = pools
            .iter()
            .filter(|(host, _)| !excluded(**host))
            .map(|(_, pool)| pool)
            .collect();
        if eligible.is_empty() {
            return None;
        }

        let step = self.cursor.fetch_add(1, Ordering::Relaxed);
        match self.policy {
            LoadBalancingPolicy::RoundRobin => Some(eligible[step % eligible.len()]),
            LoadBalancingPolicy::LeastActive => {
                let n = eligible.len();
                // Rotating by the cursor makes min_by_key break ties in
                // round-robin order.
                (0..n)
                    .map(|i| eligible[(step + i) % n])
                    .min_by_key(|pool| pool.in_use())
            }
        }
    }
}
