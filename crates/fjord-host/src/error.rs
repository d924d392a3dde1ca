//! Error types for fjord-host.

use fjord_transport::TransportError;
use thiserror::Error;

/// Result type for fjord-host operations.
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors that can occur while creating or driving a host.
#[derive(Debug, Error)]
pub enum HostError {
    /// The engine could not be created (bad address, port in use, bad limits).
    #[error("failed to initialize transport: {0}")]
    TransportInit(#[source] TransportError),

    /// A connection attempt could not be started.
    #[error("failed to initiate connection: {0}")]
    ConnectionInit(#[source] TransportError),

    /// The engine failed while servicing the network.
    #[error("service failed: {0}")]
    Service(#[source] TransportError),

    /// Host parameters were rejected.
    #[error("invalid host configuration: {0}")]
    InvalidConfig(String),

    /// The background service thread could not be spawned.
    #[error("failed to spawn service thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Why [`Peer::send`](crate::Peer::send) did not queue a packet.
#[derive(Debug, Error)]
pub enum SendError {
    /// The owning host has been dropped.
    #[error("host is gone")]
    HostGone,

    /// The engine refused the packet.
    #[error("send rejected: {0}")]
    Rejected(#[from] TransportError),
}
