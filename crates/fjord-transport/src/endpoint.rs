//! Host/port endpoints and their conversion to socket addresses

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// A remote or local endpoint as the application names it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or numeric address
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Wildcard endpoint, used to bind on every interface
    pub fn any(port: u16) -> Self {
        Self::from_socket_addr(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
    }

    /// IPv4 loopback endpoint
    pub fn localhost(port: u16) -> Self {
        Self::from_socket_addr(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    /// Resolve to a socket address, preferring IPv4 results
    pub fn to_socket_addr(&self) -> Result<SocketAddr> {
        let unresolved = || TransportError::Resolve {
            host: self.host.clone(),
            port: self.port,
        };

        if self.host.is_empty() {
            return Err(unresolved());
        }

        let candidates: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                tracing::debug!("resolving {} failed: {}", self, e);
                unresolved()
            })?
            .collect();

        candidates
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(unresolved)
    }

    /// Numeric endpoint for a socket address (no reverse lookup)
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::from_socket_addr(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
