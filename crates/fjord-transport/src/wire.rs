//! Datagram layout of the UDP engine's control protocol.
//!
//! Every datagram starts with a one-byte command and the 4-byte session id of
//! the connection it belongs to. All integers are little-endian.
//!
//! ```text
//! CONNECT         | 0x01 | session | channels u8 | data u32 | incoming_bw u32 |
//! VERIFY_CONNECT  | 0x02 | session | channels u8 | incoming_bw u32 |
//! DISCONNECT      | 0x03 | session | data u32 |
//! ACK_DISCONNECT  | 0x04 | session |
//! PING            | 0x05 | session | timestamp u32 |
//! PONG            | 0x06 | session | timestamp u32 |
//! SEND            | 0x07 | session | channel u8 | flags u8 | payload ... |
//! ```

use bytes::Bytes;
use fjord_framing::{FramingError, PacketBuilder, PacketFlags, PacketReader};

const CMD_CONNECT: u8 = 0x01;
const CMD_VERIFY_CONNECT: u8 = 0x02;
const CMD_DISCONNECT: u8 = 0x03;
const CMD_ACK_DISCONNECT: u8 = 0x04;
const CMD_PING: u8 = 0x05;
const CMD_PONG: u8 = 0x06;
const CMD_SEND: u8 = 0x07;

/// Bytes in front of every SEND payload.
pub(crate) const SEND_HEADER_LEN: usize = 1 + 4 + 1 + 1;

/// Largest UDP payload over IPv4.
pub(crate) const MAX_DATAGRAM: usize = 65_507;

/// Largest application payload carried by one SEND.
pub(crate) const MAX_PAYLOAD: usize = MAX_DATAGRAM - SEND_HEADER_LEN;

/// Per-datagram flag bits on SEND.
pub(crate) mod send_flags {
    pub const RELIABLE: u8 = 1 << 0;
    pub const UNSEQUENCED: u8 = 1 << 1;
    pub const UNRELIABLE_FRAGMENT: u8 = 1 << 2;
    pub const COMPRESSED: u8 = 1 << 7;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Connect {
        session: u32,
        channels: u8,
        data: u32,
        incoming_bandwidth: u32,
    },
    VerifyConnect {
        session: u32,
        channels: u8,
        incoming_bandwidth: u32,
    },
    Disconnect {
        session: u32,
        data: u32,
    },
    AckDisconnect {
        session: u32,
    },
    Ping {
        session: u32,
        timestamp: u32,
    },
    Pong {
        session: u32,
        timestamp: u32,
    },
    Send {
        session: u32,
        channel: u8,
        flags: u8,
        payload: Bytes,
    },
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum WireError {
    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),
    #[error("truncated datagram: {0}")]
    Truncated(#[from] FramingError),
}

impl Command {
    pub(crate) fn session(&self) -> u32 {
        match self {
            Self::Connect { session, .. }
            | Self::VerifyConnect { session, .. }
            | Self::Disconnect { session, .. }
            | Self::AckDisconnect { session }
            | Self::Ping { session, .. }
            | Self::Pong { session, .. }
            | Self::Send { session, .. } => *session,
        }
    }

    pub(crate) fn encode(&self) -> Bytes {
        let mut out = PacketBuilder::with_capacity(16);
        match self {
            Self::Connect {
                session,
                channels,
                data,
                incoming_bandwidth,
            } => {
                out.write_u8(CMD_CONNECT)
                    .write_u32(*session)
                    .write_u8(*channels)
                    .write_u32(*data)
                    .write_u32(*incoming_bandwidth);
            }
            Self::VerifyConnect {
                session,
                channels,
                incoming_bandwidth,
            } => {
                out.write_u8(CMD_VERIFY_CONNECT)
                    .write_u32(*session)
                    .write_u8(*channels)
                    .write_u32(*incoming_bandwidth);
            }
            Self::Disconnect { session, data } => {
                out.write_u8(CMD_DISCONNECT).write_u32(*session).write_u32(*data);
            }
            Self::AckDisconnect { session } => {
                out.write_u8(CMD_ACK_DISCONNECT).write_u32(*session);
            }
            Self::Ping { session, timestamp } => {
                out.write_u8(CMD_PING).write_u32(*session).write_u32(*timestamp);
            }
            Self::Pong { session, timestamp } => {
                out.write_u8(CMD_PONG).write_u32(*session).write_u32(*timestamp);
            }
            Self::Send {
                session,
                channel,
                flags,
                payload,
            } => {
                return encode_send(*session, *channel, *flags, payload);
            }
        }
        Bytes::copy_from_slice(out.data())
    }

    /// Decode one datagram. SEND payloads are sliced out of `datagram` without copying.
    pub(crate) fn decode(datagram: &Bytes) -> Result<Self, WireError> {
        let mut reader = PacketReader::new(datagram);
        let command = reader.read_u8()?;
        let session = reader.read_u32()?;

        let decoded = match command {
            CMD_CONNECT => Self::Connect {
                session,
                channels: reader.read_u8()?,
                data: reader.read_u32()?,
                incoming_bandwidth: reader.read_u32()?,
            },
            CMD_VERIFY_CONNECT => Self::VerifyConnect {
                session,
                channels: reader.read_u8()?,
                incoming_bandwidth: reader.read_u32()?,
            },
            CMD_DISCONNECT => Self::Disconnect {
                session,
                data: reader.read_u32()?,
            },
            CMD_ACK_DISCONNECT => Self::AckDisconnect { session },
            CMD_PING => Self::Ping {
                session,
                timestamp: reader.read_u32()?,
            },
            CMD_PONG => Self::Pong {
                session,
                timestamp: reader.read_u32()?,
            },
            CMD_SEND => {
                let channel = reader.read_u8()?;
                let flags = reader.read_u8()?;
                Self::Send {
                    session,
                    channel,
                    flags,
                    payload: datagram.slice(reader.position()..),
                }
            }
            other => return Err(WireError::UnknownCommand(other)),
        };
        Ok(decoded)
    }
}

/// Encode a SEND datagram around an already prepared payload.
pub(crate) fn encode_send(session: u32, channel: u8, flags: u8, payload: &[u8]) -> Bytes {
    let mut out = PacketBuilder::with_capacity(SEND_HEADER_LEN + payload.len());
    out.write_u8(CMD_SEND)
        .write_u32(session)
        .write_u8(channel)
        .write_u8(flags)
        .write_bytes(payload);
    Bytes::copy_from_slice(out.data())
}

/// Map packet flags onto the SEND flag byte.
pub(crate) fn wire_flags(flags: PacketFlags) -> u8 {
    let mut out = 0;
    if flags.contains(PacketFlags::RELIABLE) {
        out |= send_flags::RELIABLE;
    }
    if flags.contains(PacketFlags::UNSEQUENCED) {
        out |= send_flags::UNSEQUENCED;
    }
    if flags.contains(PacketFlags::UNRELIABLE_FRAGMENT) {
        out |= send_flags::UNRELIABLE_FRAGMENT;
    }
    out
}

/// Recover packet flags from a SEND flag byte.
pub(crate) fn packet_flags(wire: u8) -> PacketFlags {
    let mut out = PacketFlags::NONE;
    if wire & send_flags::RELIABLE != 0 {
        out |= PacketFlags::RELIABLE;
    }
    if wire & send_flags::UNSEQUENCED != 0 {
        out |= PacketFlags::UNSEQUENCED;
    }
    if wire & send_flags::UNRELIABLE_FRAGMENT != 0 {
        out |= PacketFlags::UNRELIABLE_FRAGMENT;
    }
    out
}
