//! Core types shared between engines and the host layer

use std::fmt;
use std::net::SocketAddr;

use fjord_framing::Packet;
use serde::{Deserialize, Serialize};

/// Channel identifier within one peer connection
pub type ChannelId = u8;

/// Highest channel count a connection can negotiate
pub const MAX_CHANNELS: usize = 255;

/// Highest peer capacity a single engine accepts
pub const MAX_PEERS: usize = 4096;

/// Connection state of a peer, as tracked by the engine
///
/// Graceful lifecycle:
/// `Disconnected → Connecting → AcknowledgingConnect → ConnectionPending →
/// ConnectionSucceeded → Connected → DisconnectLater → Disconnecting →
/// AcknowledgingDisconnect → Zombie → Disconnected`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerState {
    Disconnected,
    Connecting,
    AcknowledgingConnect,
    ConnectionPending,
    ConnectionSucceeded,
    Connected,
    DisconnectLater,
    Disconnecting,
    AcknowledgingDisconnect,
    /// Connection is over but the disconnect has not been reported yet
    Zombie,
}

impl PeerState {
    /// Zombie is internal bookkeeping; outside the engine it reads as disconnected.
    pub fn external(self) -> Self {
        match self {
            Self::Zombie => Self::Disconnected,
            other => other,
        }
    }

    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::AcknowledgingConnect
                | Self::ConnectionPending
                | Self::ConnectionSucceeded
        )
    }

    pub fn is_disconnecting(self) -> bool {
        matches!(
            self,
            Self::DisconnectLater | Self::Disconnecting | Self::AcknowledgingDisconnect
        )
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AcknowledgingConnect => "acknowledging-connect",
            Self::ConnectionPending => "connection-pending",
            Self::ConnectionSucceeded => "connection-succeeded",
            Self::Connected => "connected",
            Self::DisconnectLater => "disconnect-later",
            Self::Disconnecting => "disconnecting",
            Self::AcknowledgingDisconnect => "acknowledging-disconnect",
            Self::Zombie => "zombie",
        };
        f.write_str(name)
    }
}

/// Engine-level peer handle
///
/// `index` names a slot in the engine's peer table; `generation` changes every
/// time the slot is recycled, so a handle that outlives its connection is
/// recognised as stale instead of aliasing the next occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId {
    pub index: u16,
    pub generation: u32,
}

impl PeerId {
    pub const fn new(index: u16, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// How a disconnect request should be carried out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectMode {
    /// Notify the remote and wait for its acknowledgement
    Graceful,
    /// Notify the remote once and drop the connection immediately, no local event
    Now,
    /// Graceful, but only after queued outgoing data has been sent
    Later,
}

/// Notification produced by [`Engine::service`](crate::Engine::service)
#[derive(Debug)]
pub enum EngineEvent {
    Connect {
        peer: PeerId,
        address: SocketAddr,
        data: u32,
    },
    Disconnect {
        peer: PeerId,
        address: SocketAddr,
        data: u32,
    },
    Receive {
        peer: PeerId,
        address: SocketAddr,
        channel: ChannelId,
        packet: Packet,
    },
}

impl EngineEvent {
    pub fn peer(&self) -> PeerId {
        match self {
            Self::Connect { peer, .. } | Self::Disconnect { peer, .. } | Self::Receive { peer, .. } => {
                *peer
            }
        }
    }

    pub fn address(&self) -> SocketAddr {
        match self {
            Self::Connect { address, .. }
            | Self::Disconnect { address, .. }
            | Self::Receive { address, .. } => *address,
        }
    }
}
