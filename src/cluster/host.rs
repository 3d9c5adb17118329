use std::fmt::Display;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::str::FromStr;

/// One addressable node of the remote cluster.
///
/// A host is identified by its address and port alone; two `Host` values
/// comparing equal refer to the same node regardless of how they were
/// obtained (configuration, discovery, re-add after a downtime).
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Host {
    address: SocketAddr,
}

impl Host {
    /// Creates a host from an IP address and a port.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            address: SocketAddr::new(ip, port),
        }
    }

    /// Socket address of the host.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// IP address of the host.
    pub fn ip(&self) -> IpAddr {
        self.address.ip()
    }

    /// Port of the host.
    pub fn port(&self) -> u16 {
        self.address.port()
    }
}

impl From<SocketAddr> for Host {
    fn from(address: SocketAddr) -> Self {
        Self { address }
    }
}

impl FromStr for Host {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Self::from)
    }
}

impl Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Health of a host as tracked by the connection manager.
///
/// Transitions: `Active` ⇄ `Suspended` (timeout pressure / cooldown expiry),
/// `Active`/`Suspended` → `Down` (connection failure), `Down` → `Active`
/// (explicit re-add, or a successful probe when downed-host retry is on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostStatus {
    /// Eligible for selection by the load balancing policy.
    Active,
    /// Temporarily excluded from selection; the pool is retained.
    Suspended,
    /// Believed unreachable; the pool has been destroyed.
    Down,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_parses_from_str() {
        let host: Host = "127.0.0.1:9042".parse().unwrap();
        assert_eq!(host.port(), 9042);
        assert_eq!(host.to_string(), "127.0.0.1:9042");
        assert!("notanaddress".parse::<Host>().is_err());
    }

    #[test]
    fn host_identity_is_address_and_port() {
        let a = Host::new([10, 0, 0, 1].into(), 7000);
        let b: Host = "10.0.0.1:7000".parse().unwrap();
        let c = Host::new([10, 0, 0, 1].into(), 7001);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
