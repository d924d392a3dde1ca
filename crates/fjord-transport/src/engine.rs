//! The seam between the host layer and a concrete transport engine

use std::net::SocketAddr;
use std::time::Duration;

use fjord_framing::Packet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};
use crate::types::{ChannelId, DisconnectMode, EngineEvent, PeerId, PeerState, MAX_CHANNELS, MAX_PEERS};

/// Parameters an engine is created with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of simultaneous connections (1..=4096)
    pub max_peers: usize,
    /// Channels offered per connection (1..=255)
    pub max_channels: usize,
    /// Bytes/second this side accepts; 0 = unlimited
    pub incoming_bandwidth: u32,
    /// Bytes/second this side sends; 0 = unlimited
    pub outgoing_bandwidth: u32,
    /// Deflate outgoing payloads where it pays off
    pub enable_compression: bool,
    /// SO_SNDBUF / SO_RCVBUF
    pub socket_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_peers: 32,
            max_channels: 1,
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            enable_compression: false,
            socket_buffer_size: 256 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_peers == 0 || self.max_peers > MAX_PEERS {
            return Err(TransportError::InvalidConfig(format!(
                "max_peers must be in 1..={}, got {}",
                MAX_PEERS, self.max_peers
            )));
        }
        if self.max_channels == 0 || self.max_channels > MAX_CHANNELS {
            return Err(TransportError::InvalidConfig(format!(
                "max_channels must be in 1..={}, got {}",
                MAX_CHANNELS, self.max_channels
            )));
        }
        Ok(())
    }
}

/// A reliable-UDP style transport engine.
///
/// The host layer drives an engine exclusively through this trait and always
/// behind a mutex, so implementations need `Send` but not `Sync`. Peers are
/// named by [`PeerId`]; a handle whose slot has since been recycled is
/// rejected with [`TransportError::InvalidPeer`] or reads as
/// [`PeerState::Disconnected`].
pub trait Engine: Send {
    /// Address the engine's socket is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Run network I/O for up to `timeout` and return the first event produced.
    ///
    /// `Ok(None)` means the timeout elapsed without anything to report.
    fn service(&mut self, timeout: Duration) -> Result<Option<EngineEvent>>;

    /// Begin a connection attempt. Completion or failure arrives as an event.
    fn connect(&mut self, address: SocketAddr, channels: usize, data: u32) -> Result<PeerId>;

    /// Queue a packet for a connected peer
    fn send(&mut self, peer: PeerId, channel: ChannelId, packet: Packet) -> Result<()>;

    /// Queue a packet for every connected peer
    fn broadcast(&mut self, channel: ChannelId, packet: Packet);

    /// Transmit everything queued without waiting for events
    fn flush(&mut self);

    fn disconnect(&mut self, peer: PeerId, mode: DisconnectMode, data: u32);

    /// Send a keepalive probe outside the regular schedule
    fn ping(&mut self, peer: PeerId);

    /// Tune when an unresponsive peer is dropped.
    ///
    /// The peer times out once silence exceeds `max`, or once it exceeds both
    /// `min` and `limit` round trips.
    fn set_timeout(&mut self, peer: PeerId, limit: u32, min: Duration, max: Duration);

    /// Forget a peer without notifying it or raising an event
    fn reset(&mut self, peer: PeerId);

    fn peer_state(&self, peer: PeerId) -> PeerState;

    fn peer_address(&self, peer: PeerId) -> Option<SocketAddr>;

    /// Smoothed round-trip time, zero for unknown peers
    fn round_trip_time(&self, peer: PeerId) -> Duration;

    /// Negotiated channel count, zero for unknown peers
    fn channel_count(&self, peer: PeerId) -> usize;

    fn peer_capacity(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_peers, 32);
        assert_eq!(config.max_channels, 1);
    }

    #[test]
    fn rejects_out_of_range_limits() {
        let no_peers = EngineConfig {
            max_peers: 0,
            ..Default::default()
        };
        assert!(matches!(no_peers.validate(), Err(TransportError::InvalidConfig(_))));

        let too_many_channels = EngineConfig {
            max_channels: 256,
            ..Default::default()
        };
        assert!(too_many_channels.validate().is_err());

        let at_limits = EngineConfig {
            max_peers: MAX_PEERS,
            max_channels: MAX_CHANNELS,
            ..Default::default()
        };
        assert!(at_limits.validate().is_ok());
    }
}
