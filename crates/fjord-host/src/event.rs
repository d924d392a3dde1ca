//! Typed events delivered to handlers

use std::sync::Arc;

use fjord_framing::Packet;
use fjord_transport::{ChannelId, Endpoint};

use crate::peer::Peer;

/// A connection completed (either direction).
#[derive(Debug)]
pub struct ConnectEvent {
    pub peer: Arc<Peer>,
    pub endpoint: Endpoint,
    /// Application value passed to `connect` by the initiating side
    pub data: u32,
}

/// A connection ended, gracefully or by timeout.
#[derive(Debug)]
pub struct DisconnectEvent {
    pub peer: Arc<Peer>,
    pub endpoint: Endpoint,
    /// Application value given to `disconnect`; 0 for timeouts
    pub data: u32,
}

/// A packet arrived.
#[derive(Debug)]
pub struct ReceiveEvent {
    pub peer: Arc<Peer>,
    pub endpoint: Endpoint,
    pub channel: ChannelId,
    pub packet: Packet,
}

#[derive(Debug)]
pub enum Event {
    Connect(ConnectEvent),
    Disconnect(DisconnectEvent),
    Receive(ReceiveEvent),
}

impl Event {
    pub fn peer(&self) -> &Arc<Peer> {
        match self {
            Self::Connect(e) => &e.peer,
            Self::Disconnect(e) => &e.peer,
            Self::Receive(e) => &e.peer,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        match self {
            Self::Connect(e) => &e.endpoint,
            Self::Disconnect(e) => &e.endpoint,
            Self::Receive(e) => &e.endpoint,
        }
    }
}

impl From<ConnectEvent> for Event {
    fn from(event: ConnectEvent) -> Self {
        Self::Connect(event)
    }
}

impl From<DisconnectEvent> for Event {
    fn from(event: DisconnectEvent) -> Self {
        Self::Disconnect(event)
    }
}

impl From<ReceiveEvent> for Event {
    fn from(event: ReceiveEvent) -> Self {
        Self::Receive(event)
    }
}
