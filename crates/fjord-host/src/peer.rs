//! Application-facing handle to one remote connection

use std::fmt;
use std::net::SocketAddr;
use std::sync::Weak;
use std::time::Duration;

use fjord_framing::{Packet, PacketFlags};
use fjord_transport::{ChannelId, DisconnectMode, Endpoint, Engine, PeerId, PeerState};

use crate::error::SendError;
use crate::host::HostShared;

/// A remote peer.
///
/// Peers are shared as `Arc<Peer>` between the application and the events
/// that mention them; the host itself only keeps weak references. A peer
/// outliving its connection or its host stays usable: operations fail or
/// return neutral values.
///
/// Sending moves the packet into the engine, so a packet is sent at most once:
///
/// ```compile_fail
/// # fn demo(peer: &fjord_host::Peer) {
/// let packet = fjord_host::Packet::reliable(b"once");
/// let _ = peer.send(0, packet);
/// let _ = peer.send(0, packet);
/// # }
/// ```
pub struct Peer {
    id: PeerId,
    address: SocketAddr,
    host: Weak<HostShared>,
}

impl Peer {
    pub(crate) fn new(id: PeerId, address: SocketAddr, host: Weak<HostShared>) -> Self {
        Self { id, address, host }
    }

    /// Run `f` against the engine, or `None` once the host is gone
    fn with_engine<R>(&self, f: impl FnOnce(&mut dyn Engine) -> R) -> Option<R> {
        let host = self.host.upgrade()?;
        let mut engine = host.lock_engine();
        Some(f(&mut **engine))
    }

    pub fn send(&self, channel: ChannelId, packet: Packet) -> Result<(), SendError> {
        self.with_engine(|engine| engine.send(self.id, channel, packet))
            .ok_or(SendError::HostGone)?
            .map_err(SendError::Rejected)
    }

    pub fn send_bytes(&self, channel: ChannelId, data: &[u8], flags: PacketFlags) -> Result<(), SendError> {
        self.send(channel, Packet::new(data, flags))
    }

    /// Graceful disconnect; a Disconnect event follows once the remote acknowledges.
    pub fn disconnect(&self, data: u32) {
        self.with_engine(|engine| engine.disconnect(self.id, DisconnectMode::Graceful, data));
    }

    /// Drop the connection at once. No Disconnect event is raised locally.
    pub fn disconnect_now(&self, data: u32) {
        self.with_engine(|engine| engine.disconnect(self.id, DisconnectMode::Now, data));
    }

    /// Disconnect once every queued packet has been sent.
    pub fn disconnect_later(&self, data: u32) {
        self.with_engine(|engine| engine.disconnect(self.id, DisconnectMode::Later, data));
    }

    pub fn ping(&self) {
        self.with_engine(|engine| engine.ping(self.id));
    }

    /// See [`Engine::set_timeout`]. Zero values select the defaults.
    pub fn set_timeout(&self, limit: u32, minimum: Duration, maximum: Duration) {
        self.with_engine(|engine| engine.set_timeout(self.id, limit, minimum, maximum));
    }

    /// Forget the connection without telling the remote.
    pub fn reset(&self) {
        self.with_engine(|engine| engine.reset(self.id));
    }

    pub fn state(&self) -> PeerState {
        self.with_engine(|engine| engine.peer_state(self.id).external())
            .unwrap_or(PeerState::Disconnected)
    }

    pub fn round_trip_time(&self) -> Duration {
        self.with_engine(|engine| engine.round_trip_time(self.id))
            .unwrap_or(Duration::ZERO)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::from_socket_addr(self.address)
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PeerState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state().is_connecting()
    }

    pub fn is_disconnecting(&self) -> bool {
        self.state().is_disconnecting()
    }

    pub fn is_disconnected(&self) -> bool {
        self.state() == PeerState::Disconnected
    }

    pub fn is_host_alive(&self) -> bool {
        self.host.strong_count() > 0
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("host_alive", &self.is_host_alive())
            .finish()
    }
}
