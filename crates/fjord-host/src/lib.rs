//! Fjord Host - peers, events and dispatch over a transport engine
//!
//! This crate provides:
//! - [`Host`]: owns one engine, services it and dispatches events
//! - [`Peer`]: shared handle to one connection, weakly linked to its host
//! - [`EventDispatcher`]: ordered closure and trait-object handlers
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use fjord_host::{Endpoint, Host, HostConfig, Packet};
//!
//! let server = Host::create_server(&Endpoint::any(7777), HostConfig::default())?;
//! server.on_receive(|event| {
//!     let reply = Packet::reliable(event.packet.data());
//!     let _ = event.peer.send(event.channel, reply);
//! });
//!
//! loop {
//!     server.service(Duration::from_millis(100))?;
//! }
//! # Ok::<(), fjord_host::HostError>(())
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod host;
pub mod peer;

// Re-export main types at crate root
pub use config::HostConfig;
pub use dispatcher::{EventDispatcher, EventHandler};
pub use error::{HostError, Result, SendError};
pub use event::{ConnectEvent, DisconnectEvent, Event, ReceiveEvent};
pub use host::{Host, HostRole, SERVICE_SLICE};
pub use peer::Peer;

pub use fjord_framing::{Packet, PacketBuilder, PacketFlags, PacketReader};
pub use fjord_transport::{
    ChannelId, DisconnectMode, Endpoint, Engine, EngineEvent, PeerId, PeerState, DEFAULT_TIMEOUT,
    MAX_CHANNELS, MAX_PEERS,
};
