//! Fjord Transport - engine seam and UDP engine
//!
//! This crate provides:
//! - The [`Engine`] trait the host layer drives
//! - [`UdpEngine`], a session-based connection engine over one UDP socket
//! - Endpoint resolution and the shared peer/event vocabulary
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use fjord_transport::{Engine, EngineConfig, EngineEvent, Endpoint, UdpEngine};
//!
//! let config = EngineConfig::default();
//! let mut server = UdpEngine::bind(Some(Endpoint::any(7777).to_socket_addr()?), &config)?;
//!
//! while let Some(event) = server.service(Duration::from_millis(100))? {
//!     if let EngineEvent::Receive { peer, packet, .. } = event {
//!         println!("{} sent {} bytes", peer, packet.len());
//!     }
//! }
//! # Ok::<(), fjord_transport::TransportError>(())
//! ```

pub mod endpoint;
pub mod engine;
pub mod error;
pub mod library;
pub mod types;
pub mod udp;
mod wire;

// Re-export main types at crate root
pub use endpoint::Endpoint;
pub use engine::{Engine, EngineConfig};
pub use error::{Result, TransportError};
pub use library::{deinitialize, initialize, is_initialized, version, VERSION};
pub use types::{ChannelId, DisconnectMode, EngineEvent, PeerId, PeerState, MAX_CHANNELS, MAX_PEERS};
pub use udp::UdpEngine;

/// Default time an operation waits on the network
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);
