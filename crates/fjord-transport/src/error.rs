//! Error types for fjord-transport.

use std::net::SocketAddr;

use thiserror::Error;

use crate::types::PeerId;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors reported synchronously by an engine.
///
/// Remote failures (peer vanished, handshake timed out) are never reported
/// here; they arrive later as disconnect events.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be created or bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Host name lookup failed or produced no usable address.
    #[error("could not resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    /// Every peer slot is in use.
    #[error("no available peer slots (capacity {capacity})")]
    NoAvailablePeers { capacity: usize },

    /// A live connection to this address already exists.
    #[error("already connected to {0}")]
    AlreadyConnected(SocketAddr),

    /// The handle does not name a live connection.
    #[error("peer {0} is not known to this engine")]
    InvalidPeer(PeerId),

    /// The peer exists but is not in the connected state.
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),

    /// The channel was not negotiated for this connection.
    #[error("channel {channel} out of range (peer has {available} channels)")]
    ChannelOutOfRange { channel: u8, available: usize },

    /// Too many packets are waiting to be flushed to this peer.
    #[error("outgoing queue for peer {0} is full")]
    QueueFull(PeerId),

    /// The payload does not fit in a single datagram.
    #[error("payload of {size} bytes exceeds the {limit} byte datagram limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Engine parameters were rejected.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
