//! Best-effort UDP engine.
//!
//! Connections are established with a session-tagged handshake, kept alive
//! with pings and torn down with acknowledged disconnects. Payload datagrams
//! are sent once; there is no retransmission or ordering layer, so
//! `RELIABLE` only travels as a flag on the wire.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use bytes::Bytes;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use fjord_framing::Packet;
use socket2::{Domain, Protocol, Socket, Type};

use crate::engine::{Engine, EngineConfig};
use crate::error::{Result, TransportError};
use crate::types::{ChannelId, DisconnectMode, EngineEvent, PeerId, PeerState};
use crate::wire::{self, send_flags, Command, MAX_DATAGRAM, MAX_PAYLOAD, SEND_HEADER_LEN};

/// Packets waiting per peer before `send` reports `QueueFull`
pub const MAX_QUEUE: usize = 1024;

/// Interval between CONNECT and DISCONNECT retransmissions
pub const RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Give up on an unanswered CONNECT after this long
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Give up waiting for ACK_DISCONNECT after this long
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Send a PING after this much outgoing silence
pub const PING_INTERVAL: Duration = Duration::from_millis(500);

pub const DEFAULT_TIMEOUT_LIMIT: u32 = 32;
pub const DEFAULT_TIMEOUT_MINIMUM: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT_MAXIMUM: Duration = Duration::from_secs(30);

const INITIAL_RTT: Duration = Duration::from_millis(500);
const POLL_SLICE: Duration = Duration::from_millis(50);
const BANDWIDTH_WINDOW: Duration = Duration::from_secs(1);
const COMPRESS_THRESHOLD: usize = 64;
const MAX_INFLATED: usize = 1 << 20;

struct Queued {
    channel: ChannelId,
    flags: u8,
    payload: Bytes,
}

struct Slot {
    generation: u32,
    state: PeerState,
    address: Option<SocketAddr>,
    session: u32,
    channel_count: usize,
    remote_incoming_bandwidth: u32,
    outgoing: VecDeque<Queued>,
    connect_data: u32,
    disconnect_data: u32,
    state_since: Instant,
    last_received: Instant,
    last_sent: Instant,
    last_retry: Instant,
    rtt: Duration,
    timeout_limit: u32,
    timeout_minimum: Duration,
    timeout_maximum: Duration,
    window_start: Instant,
    window_sent: usize,
}

impl Slot {
    fn vacant(now: Instant) -> Self {
        Self {
            generation: 0,
            state: PeerState::Disconnected,
            address: None,
            session: 0,
            channel_count: 0,
            remote_incoming_bandwidth: 0,
            outgoing: VecDeque::new(),
            connect_data: 0,
            disconnect_data: 0,
            state_since: now,
            last_received: now,
            last_sent: now,
            last_retry: now,
            rtt: INITIAL_RTT,
            timeout_limit: DEFAULT_TIMEOUT_LIMIT,
            timeout_minimum: DEFAULT_TIMEOUT_MINIMUM,
            timeout_maximum: DEFAULT_TIMEOUT_MAXIMUM,
            window_start: now,
            window_sent: 0,
        }
    }

    fn occupy(&mut self, address: SocketAddr, session: u32, channel_count: usize, now: Instant) {
        let generation = self.generation;
        *self = Self::vacant(now);
        self.generation = generation;
        self.address = Some(address);
        self.session = session;
        self.channel_count = channel_count;
    }

    fn release(&mut self, now: Instant) {
        let generation = self.generation.wrapping_add(1);
        *self = Self::vacant(now);
        self.generation = generation;
    }

    fn set_state(&mut self, state: PeerState, now: Instant) {
        self.state = state;
        self.state_since = now;
    }

    fn is_vacant(&self) -> bool {
        self.state == PeerState::Disconnected
    }

    /// Payload traffic is accepted in these states.
    fn carries_data(&self) -> bool {
        matches!(
            self.state,
            PeerState::Connected | PeerState::DisconnectLater | PeerState::Disconnecting
        )
    }

    fn bandwidth_limit(&self, outgoing: u32) -> usize {
        match (outgoing, self.remote_incoming_bandwidth) {
            (0, 0) => 0,
            (0, remote) => remote as usize,
            (local, 0) => local as usize,
            (local, remote) => local.min(remote) as usize,
        }
    }
}

/// [`Engine`] over a single non-connected UDP socket.
pub struct UdpEngine {
    socket: UdpSocket,
    config: EngineConfig,
    slots: Vec<Slot>,
    by_address: HashMap<SocketAddr, usize>,
    events: VecDeque<EngineEvent>,
    epoch: Instant,
    recv_buf: Vec<u8>,
}

impl UdpEngine {
    /// Bind a socket and set up the peer table.
    ///
    /// `None` binds an ephemeral IPv4 port, which is what a client wants.
    /// Address reuse stays off, so binding a port that is already taken fails.
    pub fn bind(address: Option<SocketAddr>, config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let addr = address.unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));
        let socket = open_socket(addr, config.socket_buffer_size)
            .map_err(|source| TransportError::Bind { addr, source })?;

        let now = Instant::now();
        let engine = Self {
            socket,
            config: config.clone(),
            slots: (0..config.max_peers).map(|_| Slot::vacant(now)).collect(),
            by_address: HashMap::new(),
            events: VecDeque::new(),
            epoch: now,
            recv_buf: vec![0; MAX_DATAGRAM],
        };

        tracing::debug!(
            "UDP engine bound to {:?} ({} peers, {} channels)",
            engine.socket.local_addr().ok(),
            config.max_peers,
            config.max_channels
        );
        Ok(engine)
    }

    fn peer_id(&self, index: usize) -> PeerId {
        PeerId::new(index as u16, self.slots[index].generation)
    }

    /// Slot index for a live handle
    fn index_of(&self, peer: PeerId) -> Option<usize> {
        let index = peer.index as usize;
        let slot = self.slots.get(index)?;
        (slot.generation == peer.generation && !slot.is_vacant()).then_some(index)
    }

    fn slot(&self, peer: PeerId) -> Option<&Slot> {
        self.index_of(peer).map(|index| &self.slots[index])
    }

    fn allocate(&self) -> Option<usize> {
        self.slots.iter().position(Slot::is_vacant)
    }

    /// Fresh session id for an outgoing connection. Datagrams carrying any
    /// other id are dropped, so ids must not be guessable.
    fn session() -> u32 {
        rand::random()
    }

    fn timestamp(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn free(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        if let Some(address) = slot.address {
            if self.by_address.get(&address) == Some(&index) {
                self.by_address.remove(&address);
            }
        }
        tracing::trace!("peer slot {} released", index);
        slot.release(Instant::now());
    }

    /// End the connection and queue the disconnect event. The slot is freed
    /// once that event leaves the engine.
    fn zombify(&mut self, index: usize, data: u32, now: Instant) {
        let peer = self.peer_id(index);
        let slot = &mut self.slots[index];
        let Some(address) = slot.address else {
            return;
        };
        tracing::debug!("peer {} ({}) {} -> zombie", peer, address, slot.state);
        slot.set_state(PeerState::Zombie, now);
        slot.outgoing.clear();
        self.events.push_back(EngineEvent::Disconnect {
            peer,
            address,
            data,
        });
    }

    fn pop_event(&mut self) -> Option<EngineEvent> {
        let event = self.events.pop_front()?;
        if let EngineEvent::Disconnect { peer, .. } = &event {
            if let Some(index) = self.index_of(*peer) {
                if self.slots[index].state == PeerState::Zombie {
                    self.free(index);
                }
            }
        }
        Some(event)
    }

    /// Send a control datagram to a slot's address now
    fn send_control(&mut self, index: usize, command: Command, now: Instant) {
        let slot = &mut self.slots[index];
        if let Some(address) = slot.address {
            transmit(&self.socket, address, &command.encode());
            slot.last_sent = now;
        }
    }

    fn begin_disconnect(&mut self, index: usize, now: Instant) {
        let slot = &mut self.slots[index];
        slot.outgoing.clear();
        slot.set_state(PeerState::Disconnecting, now);
        slot.last_retry = now;
        let command = Command::Disconnect {
            session: slot.session,
            data: slot.disconnect_data,
        };
        self.send_control(index, command, now);
    }

    /// Turn a packet into the flag byte and payload that go on the wire
    fn prepare(&self, packet: Packet) -> Result<(u8, Bytes)> {
        let (payload, flags) = packet.into_parts();
        let mut wire_flags = wire::wire_flags(flags);

        let payload = if self.config.enable_compression && payload.len() >= COMPRESS_THRESHOLD {
            match deflate(&payload) {
                Ok(compressed) if compressed.len() < payload.len() => {
                    wire_flags |= send_flags::COMPRESSED;
                    Bytes::from(compressed)
                }
                Ok(_) => payload,
                Err(e) => {
                    tracing::debug!("compression failed, sending raw: {}", e);
                    payload
                }
            }
        } else {
            payload
        };

        if payload.len() > MAX_PAYLOAD {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_PAYLOAD,
            });
        }
        Ok((wire_flags, payload))
    }

    fn check_timers(&mut self, now: Instant) {
        for index in 0..self.slots.len() {
            let slot = &self.slots[index];
            let in_state = now.saturating_duration_since(slot.state_since);
            let since_retry = now.saturating_duration_since(slot.last_retry);
            let state = slot.state;

            match state {
                PeerState::Connecting => {
                    if in_state >= CONNECT_TIMEOUT {
                        tracing::debug!("connect to {:?} timed out", slot.address);
                        self.zombify(index, 0, now);
                    } else if since_retry >= RETRY_INTERVAL {
                        let command = Command::Connect {
                            session: slot.session,
                            channels: slot.channel_count as u8,
                            data: slot.connect_data,
                            incoming_bandwidth: self.config.incoming_bandwidth,
                        };
                        self.slots[index].last_retry = now;
                        self.send_control(index, command, now);
                    }
                }
                PeerState::Disconnecting => {
                    if in_state >= DISCONNECT_TIMEOUT {
                        let data = slot.disconnect_data;
                        self.zombify(index, data, now);
                    } else if since_retry >= RETRY_INTERVAL {
                        let command = Command::Disconnect {
                            session: slot.session,
                            data: slot.disconnect_data,
                        };
                        self.slots[index].last_retry = now;
                        self.send_control(index, command, now);
                    }
                }
                PeerState::Connected | PeerState::DisconnectLater => {
                    let silence = now.saturating_duration_since(slot.last_received);
                    let adaptive = slot.rtt.saturating_mul(slot.timeout_limit);
                    if silence >= slot.timeout_maximum
                        || (silence >= slot.timeout_minimum && silence >= adaptive)
                    {
                        tracing::debug!("peer {:?} timed out after {:?}", slot.address, silence);
                        self.zombify(index, 0, now);
                    } else if now.saturating_duration_since(slot.last_sent) >= PING_INTERVAL {
                        let command = Command::Ping {
                            session: slot.session,
                            timestamp: self.timestamp(),
                        };
                        self.send_control(index, command, now);
                    }
                }
                _ => {}
            }
        }
    }

    fn receive(&mut self, wait: Duration) -> Result<Option<(Bytes, SocketAddr)>> {
        if wait.is_zero() {
            self.socket.set_nonblocking(true)?;
        } else {
            self.socket.set_nonblocking(false)?;
            self.socket.set_read_timeout(Some(wait))?;
        }

        match self.socket.recv_from(&mut self.recv_buf) {
            Ok((len, from)) => Ok(Some((Bytes::copy_from_slice(&self.recv_buf[..len]), from))),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionRefused
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn handle_datagram(&mut self, from: SocketAddr, datagram: Bytes, now: Instant) {
        let command = match Command::decode(&datagram) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!("dropping datagram from {}: {}", from, e);
                return;
            }
        };

        let known = self.by_address.get(&from).copied();

        if let Command::Connect {
            session,
            channels,
            data,
            incoming_bandwidth,
        } = command
        {
            self.handle_connect(from, known, session, channels, data, incoming_bandwidth, now);
            return;
        }

        let Some(index) = known else {
            if let Command::Disconnect { session, .. } = command {
                transmit(&self.socket, from, &Command::AckDisconnect { session }.encode());
            } else {
                tracing::trace!("dropping datagram from unknown address {}", from);
            }
            return;
        };

        if self.slots[index].session != command.session() {
            tracing::trace!("dropping datagram from {} with stale session", from);
            return;
        }
        self.slots[index].last_received = now;

        match command {
            Command::Connect { .. } => {}
            Command::VerifyConnect {
                channels,
                incoming_bandwidth,
                ..
            } => {
                let peer = self.peer_id(index);
                let slot = &mut self.slots[index];
                if slot.state != PeerState::Connecting {
                    return;
                }
                slot.channel_count = slot.channel_count.min(channels as usize).max(1);
                slot.remote_incoming_bandwidth = incoming_bandwidth;
                slot.set_state(PeerState::Connected, now);
                tracing::debug!("peer {} ({}) connected, {} channels", peer, from, slot.channel_count);
                self.events.push_back(EngineEvent::Connect {
                    peer,
                    address: from,
                    data: slot.connect_data,
                });
            }
            Command::Disconnect { session, data } => {
                transmit(&self.socket, from, &Command::AckDisconnect { session }.encode());
                if self.slots[index].state != PeerState::Zombie {
                    self.zombify(index, data, now);
                }
            }
            Command::AckDisconnect { .. } => {
                let slot = &self.slots[index];
                if slot.state == PeerState::Disconnecting {
                    let data = slot.disconnect_data;
                    self.zombify(index, data, now);
                }
            }
            Command::Ping { session, timestamp } => {
                self.send_control(index, Command::Pong { session, timestamp }, now);
            }
            Command::Pong { timestamp, .. } => {
                let sample = Duration::from_millis(u64::from(self.timestamp().wrapping_sub(timestamp)));
                let slot = &mut self.slots[index];
                slot.rtt = slot.rtt * 7 / 8 + sample / 8;
            }
            Command::Send {
                channel,
                flags,
                payload,
                ..
            } => self.handle_send(index, from, channel, flags, payload),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_connect(
        &mut self,
        from: SocketAddr,
        known: Option<usize>,
        session: u32,
        channels: u8,
        data: u32,
        incoming_bandwidth: u32,
        now: Instant,
    ) {
        if let Some(index) = known {
            let slot = &self.slots[index];
            if slot.session == session && slot.state == PeerState::Connected {
                // Our VERIFY_CONNECT was lost; answer the retry.
                let command = Command::VerifyConnect {
                    session,
                    channels: slot.channel_count as u8,
                    incoming_bandwidth: self.config.incoming_bandwidth,
                };
                self.send_control(index, command, now);
            } else {
                tracing::trace!("ignoring CONNECT from {} while its slot is busy", from);
            }
            return;
        }

        let Some(index) = self.allocate() else {
            tracing::debug!("dropping CONNECT from {}: all {} peer slots in use", from, self.slots.len());
            return;
        };

        let channel_count = usize::from(channels).clamp(1, self.config.max_channels);
        let slot = &mut self.slots[index];
        slot.occupy(from, session, channel_count, now);
        slot.connect_data = data;
        slot.remote_incoming_bandwidth = incoming_bandwidth;
        slot.set_state(PeerState::AcknowledgingConnect, now);
        self.by_address.insert(from, index);

        let command = Command::VerifyConnect {
            session,
            channels: channel_count as u8,
            incoming_bandwidth: self.config.incoming_bandwidth,
        };
        self.send_control(index, command, now);
        self.slots[index].set_state(PeerState::Connected, now);

        let peer = self.peer_id(index);
        tracing::debug!("peer {} ({}) accepted, {} channels", peer, from, channel_count);
        self.events.push_back(EngineEvent::Connect {
            peer,
            address: from,
            data,
        });
    }

    fn handle_send(&mut self, index: usize, from: SocketAddr, channel: u8, flags: u8, payload: Bytes) {
        let slot = &self.slots[index];
        if !slot.carries_data() {
            return;
        }
        if usize::from(channel) >= slot.channel_count {
            tracing::debug!("dropping packet from {} on unnegotiated channel {}", from, channel);
            return;
        }

        let payload = if flags & send_flags::COMPRESSED != 0 {
            match inflate(&payload, MAX_INFLATED) {
                Ok(raw) => Bytes::from(raw),
                Err(e) => {
                    tracing::debug!("dropping undecodable packet from {}: {}", from, e);
                    return;
                }
            }
        } else {
            payload
        };

        let peer = self.peer_id(index);
        self.events.push_back(EngineEvent::Receive {
            peer,
            address: from,
            channel,
            packet: Packet::from_bytes(payload, wire::packet_flags(flags)),
        });
    }

    fn flush_slot(&mut self, index: usize, now: Instant) {
        let outgoing_bandwidth = self.config.outgoing_bandwidth;
        let slot = &mut self.slots[index];
        let Some(address) = slot.address else {
            return;
        };
        if !slot.carries_data() {
            return;
        }

        if now.saturating_duration_since(slot.window_start) >= BANDWIDTH_WINDOW {
            slot.window_start = now;
            slot.window_sent = 0;
        }
        let limit = slot.bandwidth_limit(outgoing_bandwidth);

        while let Some(front) = slot.outgoing.front() {
            let size = SEND_HEADER_LEN + front.payload.len();
            if limit > 0 && slot.window_sent > 0 && slot.window_sent + size > limit {
                break;
            }
            let Some(queued) = slot.outgoing.pop_front() else {
                break;
            };
            let datagram = wire::encode_send(slot.session, queued.channel, queued.flags, &queued.payload);
            transmit(&self.socket, address, &datagram);
            slot.window_sent += size;
            slot.last_sent = now;
        }

        if slot.state == PeerState::DisconnectLater && slot.outgoing.is_empty() {
            self.begin_disconnect(index, now);
        }
    }
}

impl Engine for UdpEngine {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn service(&mut self, timeout: Duration) -> Result<Option<EngineEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.pop_event() {
                return Ok(Some(event));
            }

            let now = Instant::now();
            self.check_timers(now);
            self.flush();
            if let Some(event) = self.pop_event() {
                return Ok(Some(event));
            }

            let wait = deadline.saturating_duration_since(now).min(POLL_SLICE);
            if let Some((datagram, from)) = self.receive(wait)? {
                self.handle_datagram(from, datagram, Instant::now());
            }
            if Instant::now() >= deadline {
                return Ok(self.pop_event());
            }
        }
    }

    fn connect(&mut self, address: SocketAddr, channels: usize, data: u32) -> Result<PeerId> {
        if let Some(&index) = self.by_address.get(&address) {
            if self.slots[index].state != PeerState::Zombie {
                return Err(TransportError::AlreadyConnected(address));
            }
        }

        let index = self.allocate().ok_or(TransportError::NoAvailablePeers {
            capacity: self.slots.len(),
        })?;
        let channel_count = channels.clamp(1, self.config.max_channels);
        let session = Self::session();
        let now = Instant::now();

        let slot = &mut self.slots[index];
        slot.occupy(address, session, channel_count, now);
        slot.connect_data = data;
        slot.set_state(PeerState::Connecting, now);
        slot.last_retry = now;
        self.by_address.insert(address, index);

        let command = Command::Connect {
            session,
            channels: channel_count as u8,
            data,
            incoming_bandwidth: self.config.incoming_bandwidth,
        };
        self.send_control(index, command, now);

        let peer = self.peer_id(index);
        tracing::debug!("connecting to {} as peer {} ({} channels)", address, peer, channel_count);
        Ok(peer)
    }

    fn send(&mut self, peer: PeerId, channel: ChannelId, packet: Packet) -> Result<()> {
        let index = self.index_of(peer).ok_or(TransportError::InvalidPeer(peer))?;
        let slot = &self.slots[index];
        if slot.state != PeerState::Connected {
            return Err(TransportError::NotConnected(peer));
        }
        if usize::from(channel) >= slot.channel_count {
            return Err(TransportError::ChannelOutOfRange {
                channel,
                available: slot.channel_count,
            });
        }
        if slot.outgoing.len() >= MAX_QUEUE {
            return Err(TransportError::QueueFull(peer));
        }

        let (flags, payload) = self.prepare(packet)?;
        self.slots[index].outgoing.push_back(Queued {
            channel,
            flags,
            payload,
        });
        Ok(())
    }

    fn broadcast(&mut self, channel: ChannelId, packet: Packet) {
        let (flags, payload) = match self.prepare(packet) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!("broadcast dropped: {}", e);
                return;
            }
        };

        for slot in &mut self.slots {
            if slot.state != PeerState::Connected || usize::from(channel) >= slot.channel_count {
                continue;
            }
            if slot.outgoing.len() >= MAX_QUEUE {
                tracing::debug!("broadcast skipped {:?}: queue full", slot.address);
                continue;
            }
            slot.outgoing.push_back(Queued {
                channel,
                flags,
                payload: payload.clone(),
            });
        }
    }

    fn flush(&mut self) {
        let now = Instant::now();
        for index in 0..self.slots.len() {
            self.flush_slot(index, now);
        }
    }

    fn disconnect(&mut self, peer: PeerId, mode: DisconnectMode, data: u32) {
        let Some(index) = self.index_of(peer) else {
            return;
        };
        let now = Instant::now();
        let state = self.slots[index].state;
        self.slots[index].disconnect_data = data;

        match mode {
            DisconnectMode::Now => {
                if state != PeerState::Zombie {
                    let session = self.slots[index].session;
                    self.send_control(index, Command::Disconnect { session, data }, now);
                }
                tracing::debug!("peer {} disconnected immediately", peer);
                self.free(index);
            }
            DisconnectMode::Later if state == PeerState::Connected => {
                self.slots[index].set_state(PeerState::DisconnectLater, now);
            }
            DisconnectMode::Graceful | DisconnectMode::Later => match state {
                PeerState::Connected | PeerState::DisconnectLater => {
                    self.begin_disconnect(index, now);
                }
                s if s.is_connecting() => {
                    let session = self.slots[index].session;
                    self.send_control(index, Command::Disconnect { session, data }, now);
                    self.zombify(index, data, now);
                }
                _ => {}
            },
        }
    }

    fn ping(&mut self, peer: PeerId) {
        let Some(index) = self.index_of(peer) else {
            return;
        };
        if self.slots[index].carries_data() {
            let command = Command::Ping {
                session: self.slots[index].session,
                timestamp: self.timestamp(),
            };
            self.send_control(index, command, Instant::now());
        }
    }

    fn set_timeout(&mut self, peer: PeerId, limit: u32, min: Duration, max: Duration) {
        let Some(index) = self.index_of(peer) else {
            return;
        };
        let slot = &mut self.slots[index];
        slot.timeout_limit = if limit == 0 { DEFAULT_TIMEOUT_LIMIT } else { limit };
        slot.timeout_minimum = if min.is_zero() { DEFAULT_TIMEOUT_MINIMUM } else { min };
        slot.timeout_maximum = if max.is_zero() { DEFAULT_TIMEOUT_MAXIMUM } else { max };
    }

    fn reset(&mut self, peer: PeerId) {
        if let Some(index) = self.index_of(peer) {
            tracing::debug!("peer {} reset", peer);
            self.free(index);
        }
    }

    fn peer_state(&self, peer: PeerId) -> PeerState {
        self.slot(peer).map_or(PeerState::Disconnected, |slot| slot.state)
    }

    fn peer_address(&self, peer: PeerId) -> Option<SocketAddr> {
        self.slot(peer).and_then(|slot| slot.address)
    }

    fn round_trip_time(&self, peer: PeerId) -> Duration {
        self.slot(peer).map_or(Duration::ZERO, |slot| slot.rtt)
    }

    fn channel_count(&self, peer: PeerId) -> usize {
        self.slot(peer).map_or(0, |slot| slot.channel_count)
    }

    fn peer_capacity(&self) -> usize {
        self.slots.len()
    }
}

fn open_socket(addr: SocketAddr, buffer_size: usize) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    // Buffer sizes must be set before binding
    socket.set_send_buffer_size(buffer_size)?;
    socket.set_recv_buffer_size(buffer_size)?;

    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Fire one datagram; UDP send failures are logged and otherwise ignored.
fn transmit(socket: &UdpSocket, to: SocketAddr, datagram: &[u8]) {
    if let Err(e) = socket.send_to(datagram, to) {
        tracing::debug!("send to {} failed: {}", to, e);
    }
}

fn deflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn inflate(data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("inflated payload exceeds {} bytes", limit),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn loopback() -> Option<SocketAddr> {
        Some("127.0.0.1:0".parse().unwrap())
    }

    fn engine(config: EngineConfig) -> UdpEngine {
        UdpEngine::bind(loopback(), &config).unwrap()
    }

    /// Service both engines until `done` accepts an event or two seconds pass.
    fn pump_until(
        a: &mut UdpEngine,
        b: &mut UdpEngine,
        mut done: impl FnMut(bool, &EngineEvent) -> bool,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(event) = a.service(Duration::from_millis(5)).unwrap() {
                if done(true, &event) {
                    return true;
                }
            }
            if let Some(event) = b.service(Duration::from_millis(5)).unwrap() {
                if done(false, &event) {
                    return true;
                }
            }
        }
        false
    }

    fn connected_pair(config: EngineConfig) -> (UdpEngine, UdpEngine, PeerId, PeerId) {
        let mut server = engine(config.clone());
        let mut client = engine(config);
        let target = server.local_addr().unwrap();
        let client_side = client.connect(target, 2, 77).unwrap();

        let mut server_side = None;
        let mut client_connected = false;
        pump_until(&mut server, &mut client, |on_server, event| {
            match event {
                EngineEvent::Connect { peer, data, .. } if on_server => {
                    assert_eq!(*data, 77);
                    server_side = Some(*peer);
                }
                EngineEvent::Connect { peer, .. } => {
                    assert_eq!(*peer, client_side);
                    client_connected = true;
                }
                other => panic!("unexpected event {other:?}"),
            }
            server_side.is_some() && client_connected
        });

        let server_side = server_side.expect("server never saw the connect");
        assert!(client_connected, "client never saw the connect");
        (server, client, server_side, client_side)
    }

    #[test]
    fn handshake_negotiates_channels() {
        let config = EngineConfig {
            max_channels: 4,
            ..Default::default()
        };
        let (server, client, server_side, client_side) = connected_pair(config);
        assert_eq!(server.peer_state(server_side), PeerState::Connected);
        assert_eq!(client.peer_state(client_side), PeerState::Connected);
        assert_eq!(server.channel_count(server_side), 2);
        assert_eq!(client.channel_count(client_side), 2);
        assert_eq!(
            server.peer_address(server_side).unwrap().port(),
            client.local_addr().unwrap().port()
        );
    }

    #[test]
    fn payload_arrives_with_channel_and_flags() {
        let config = EngineConfig {
            max_channels: 2,
            ..Default::default()
        };
        let (mut server, mut client, _, client_side) = connected_pair(config);
        client.send(client_side, 1, Packet::unreliable(b"ping")).unwrap();

        let mut received = false;
        pump_until(&mut server, &mut client, |on_server, event| {
            if let (true, EngineEvent::Receive { channel, packet, .. }) = (on_server, event) {
                assert_eq!(*channel, 1);
                assert_eq!(packet.data(), b"ping");
                assert!(packet.flags().is_empty());
                received = true;
            }
            received
        });
        assert!(received);
    }

    #[test]
    fn compressed_payload_is_restored() {
        let config = EngineConfig {
            enable_compression: true,
            ..Default::default()
        };
        let (mut server, mut client, server_side, _) = connected_pair(config);
        let body = b"fjord ".repeat(200);
        server.send(server_side, 0, Packet::reliable(&body)).unwrap();

        let mut received = None;
        pump_until(&mut server, &mut client, |on_server, event| {
            if let (false, EngineEvent::Receive { packet, .. }) = (on_server, event) {
                received = Some((packet.to_vec(), packet.flags()));
            }
            received.is_some()
        });
        let (data, flags) = received.expect("packet not delivered");
        assert_eq!(data, body);
        assert!(flags.contains(fjord_framing::PacketFlags::RELIABLE));
    }

    #[test]
    fn send_is_rejected_locally() {
        let (mut server, _client, server_side, _) = connected_pair(EngineConfig::default());

        let err = server.send(server_side, 3, Packet::reliable(b"x")).unwrap_err();
        assert!(matches!(err, TransportError::ChannelOutOfRange { channel: 3, available: 1 }));

        let stale = PeerId::new(server_side.index, server_side.generation + 1);
        let err = server.send(stale, 0, Packet::reliable(b"x")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidPeer(_)));

        let too_big = vec![0u8; MAX_PAYLOAD + 1];
        let err = server.send(server_side, 0, Packet::reliable(too_big)).unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge { .. }));

        for _ in 0..MAX_QUEUE {
            server.send(server_side, 0, Packet::reliable(b"q")).unwrap();
        }
        let err = server.send(server_side, 0, Packet::reliable(b"q")).unwrap_err();
        assert!(matches!(err, TransportError::QueueFull(_)));
    }

    #[test]
    fn send_before_handshake_is_not_connected() {
        let server = engine(EngineConfig::default());
        let mut client = engine(EngineConfig::default());
        let peer = client.connect(server.local_addr().unwrap(), 1, 0).unwrap();
        assert_eq!(client.peer_state(peer), PeerState::Connecting);
        let err = client.send(peer, 0, Packet::reliable(b"early")).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected(_)));
    }

    #[test]
    fn graceful_disconnect_reaches_both_sides() {
        let (mut server, mut client, server_side, client_side) = connected_pair(EngineConfig::default());
        server.disconnect(server_side, DisconnectMode::Graceful, 5);
        assert_eq!(server.peer_state(server_side), PeerState::Disconnecting);

        let (mut server_done, mut client_done) = (false, false);
        pump_until(&mut server, &mut client, |on_server, event| {
            if let EngineEvent::Disconnect { data, .. } = event {
                assert_eq!(*data, 5);
                if on_server {
                    server_done = true;
                } else {
                    client_done = true;
                }
            }
            server_done && client_done
        });
        assert!(server_done && client_done);
        assert_eq!(server.peer_state(server_side), PeerState::Disconnected);
        assert_eq!(client.peer_state(client_side), PeerState::Disconnected);
    }

    #[test]
    fn disconnect_now_raises_no_local_event() {
        let (mut server, mut client, server_side, client_side) = connected_pair(EngineConfig::default());
        client.disconnect(client_side, DisconnectMode::Now, 0);
        assert_eq!(client.peer_state(client_side), PeerState::Disconnected);

        let mut remote_saw_it = false;
        pump_until(&mut server, &mut client, |on_server, event| {
            assert!(on_server, "client raised {event:?} after disconnect_now");
            remote_saw_it = matches!(event, EngineEvent::Disconnect { peer, .. } if *peer == server_side);
            remote_saw_it
        });
        assert!(remote_saw_it);
    }

    #[test]
    fn disconnect_later_drains_queue_first() {
        let (mut server, mut client, _, client_side) = connected_pair(EngineConfig::default());
        client.send(client_side, 0, Packet::reliable(b"last words")).unwrap();
        client.disconnect(client_side, DisconnectMode::Later, 0);
        assert_eq!(client.peer_state(client_side), PeerState::DisconnectLater);

        let mut got_payload = false;
        let mut got_disconnect = false;
        pump_until(&mut server, &mut client, |on_server, event| {
            if on_server {
                match event {
                    EngineEvent::Receive { packet, .. } => {
                        assert!(!got_disconnect);
                        assert_eq!(packet.data(), b"last words");
                        got_payload = true;
                    }
                    EngineEvent::Disconnect { .. } => got_disconnect = true,
                    _ => {}
                }
            }
            got_disconnect
        });
        assert!(got_payload && got_disconnect);
    }

    #[test]
    fn full_server_ignores_extra_clients() {
        let config = EngineConfig {
            max_peers: 1,
            ..Default::default()
        };
        let (mut server, _first, _, _) = connected_pair(config);
        let mut second = engine(EngineConfig::default());
        let peer = second.connect(server.local_addr().unwrap(), 1, 0).unwrap();

        let accepted = pump_until(&mut server, &mut second, |_, event| {
            matches!(event, EngineEvent::Connect { .. })
        });
        assert!(!accepted);
        assert_eq!(second.peer_state(peer), PeerState::Connecting);
    }

    #[test]
    fn connect_limits() {
        let target: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut client = engine(EngineConfig {
            max_peers: 1,
            ..Default::default()
        });
        client.connect(target, 1, 0).unwrap();
        assert!(matches!(
            client.connect(target, 1, 0),
            Err(TransportError::AlreadyConnected(_))
        ));
        assert!(matches!(
            client.connect("127.0.0.1:10".parse().unwrap(), 1, 0),
            Err(TransportError::NoAvailablePeers { capacity: 1 })
        ));
    }

    #[test]
    fn reset_recycles_slot_generation() {
        let target: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut client = engine(EngineConfig::default());
        let first = client.connect(target, 1, 0).unwrap();
        client.reset(first);
        assert_eq!(client.peer_state(first), PeerState::Disconnected);
        assert_eq!(client.peer_address(first), None);

        let second = client.connect(target, 1, 0).unwrap();
        assert_eq!(second.index, first.index);
        assert_ne!(second.generation, first.generation);
        assert!(client.service(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn bind_conflict_is_reported() {
        let first = engine(EngineConfig::default());
        let taken = first.local_addr().unwrap();
        let err = UdpEngine::bind(Some(taken), &EngineConfig::default()).err().unwrap();
        assert!(matches!(err, TransportError::Bind { .. }));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            max_channels: 0,
            ..Default::default()
        };
        assert!(matches!(
            UdpEngine::bind(loopback(), &config),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[test]
    fn service_times_out_quietly() {
        let mut idle = engine(EngineConfig::default());
        let started = Instant::now();
        assert!(idle.service(Duration::from_millis(30)).unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn inflate_enforces_limit() {
        let packed = deflate(&[0u8; 4096]).unwrap();
        assert_eq!(inflate(&packed, 4096).unwrap().len(), 4096);
        assert!(inflate(&packed, 100).is_err());
    }

    #[test]
    fn sessions_are_not_sequential() {
        let mut client = engine(EngineConfig::default());
        let sessions: Vec<u32> = (0..16u16)
            .map(|i| {
                let target = SocketAddr::from(([127, 0, 0, 1], 9000 + i));
                let peer = client.connect(target, 1, 0).unwrap();
                client.slots[usize::from(peer.index)].session
            })
            .collect();
        assert!(sessions
            .windows(2)
            .any(|pair| pair[1] != pair[0].wrapping_add(1)));
    }

    #[test]
    fn silent_peer_times_out() {
        let (mut server, client, server_side, _) = connected_pair(EngineConfig::default());
        server.set_timeout(server_side, 1, Duration::from_millis(100), Duration::from_millis(200));
        drop(client);

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut timed_out = false;
        while !timed_out && Instant::now() < deadline {
            if let Some(EngineEvent::Disconnect { peer, data, .. }) =
                server.service(Duration::from_millis(10)).unwrap()
            {
                assert_eq!(peer, server_side);
                assert_eq!(data, 0);
                timed_out = true;
            }
        }
        assert!(timed_out);
        assert_eq!(server.peer_state(server_side), PeerState::Disconnected);
    }

    #[test]
    fn unanswered_connect_expires() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut client = engine(EngineConfig::default());
        let peer = client.connect(silent.local_addr().unwrap(), 1, 0).unwrap();

        let index = usize::from(peer.index);
        client.slots[index].state_since = Instant::now().checked_sub(CONNECT_TIMEOUT).unwrap();

        match client.service(Duration::from_millis(10)).unwrap() {
            Some(EngineEvent::Disconnect { peer: expired, data, .. }) => {
                assert_eq!(expired, peer);
                assert_eq!(data, 0);
            }
            other => panic!("expected a disconnect, got {other:?}"),
        }
        assert_eq!(client.peer_state(peer), PeerState::Disconnected);
        assert!(client.by_address.is_empty());
    }

    #[test]
    fn outgoing_bandwidth_limits_each_window() {
        let config = EngineConfig {
            outgoing_bandwidth: 100,
            ..Default::default()
        };
        let (mut server, _client, server_side, _) = connected_pair(config);
        for _ in 0..3 {
            server.send(server_side, 0, Packet::unreliable([7u8; 60])).unwrap();
        }

        let index = usize::from(server_side.index);
        server.slots[index].window_start = Instant::now();
        server.flush();
        assert_eq!(server.slots[index].outgoing.len(), 2);
        assert_eq!(server.slots[index].window_sent, SEND_HEADER_LEN + 60);

        server.flush();
        assert_eq!(server.slots[index].outgoing.len(), 2);

        server.slots[index].window_start = Instant::now().checked_sub(BANDWIDTH_WINDOW).unwrap();
        server.flush();
        assert_eq!(server.slots[index].outgoing.len(), 1);
    }

    #[test]
    fn pong_smooths_round_trip_time() {
        let (mut server, mut client, server_side, _) = connected_pair(EngineConfig::default());
        let before = server.round_trip_time(server_side);
        server.ping(server_side);

        let deadline = Instant::now() + Duration::from_secs(2);
        while server.round_trip_time(server_side) == before && Instant::now() < deadline {
            client.service(Duration::from_millis(5)).unwrap();
            server.service(Duration::from_millis(5)).unwrap();
        }

        let rtt = server.round_trip_time(server_side);
        assert!(rtt < before, "rtt {rtt:?} did not move from {before:?}");
        assert!(rtt >= before * 3 / 4, "rtt {rtt:?} dropped too far from {before:?}");
    }

    #[test]
    fn service_returns_at_deadline_under_load() {
        let mut target = engine(EngineConfig::default());
        let addr = target.local_addr().unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let flood = thread::spawn(move || {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            while !flag.load(Ordering::Relaxed) {
                let _ = socket.send_to(&[0xFF; 8], addr);
            }
        });
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        let event = target.service(Duration::from_millis(20)).unwrap();
        let elapsed = started.elapsed();
        stop.store(true, Ordering::Relaxed);
        flood.join().unwrap();

        assert!(event.is_none());
        assert!(elapsed < Duration::from_millis(200), "service ran for {elapsed:?}");
    }
}
