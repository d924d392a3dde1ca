//! Fjord Framing
//!
//! Byte-level building blocks shared by every fjord host:
//!
//! - [`Packet`]: an owned, move-only payload plus delivery [`PacketFlags`]
//! - [`PacketBuilder`]: growable buffer with fixed-width and length-prefixed writes
//! - [`PacketReader`]: bounds-checked cursor over a packet or raw slice
//!
//! Nothing in this crate touches the network. Packets are handed to a transport
//! by value, so a packet that has been sent cannot be reused.
//!
//! # Example
//!
//! ```
//! use fjord_framing::{PacketBuilder, PacketFlags, PacketReader};
//!
//! let packet = PacketBuilder::new()
//!     .write_u32(7)
//!     .write_string("hello")
//!     .build(PacketFlags::RELIABLE);
//!
//! let mut reader = PacketReader::from_packet(&packet);
//! assert_eq!(reader.read_u32().unwrap(), 7);
//! assert_eq!(reader.read_prefixed_string().unwrap(), "hello");
//! assert!(reader.is_at_end());
//! ```

mod builder;
mod error;
mod flags;
mod packet;
mod reader;

pub use builder::PacketBuilder;
pub use error::{FramingError, Result};
pub use flags::PacketFlags;
pub use packet::Packet;
pub use reader::PacketReader;

/// Plain-old-data values accepted by [`PacketBuilder::write`] and [`PacketReader::read`].
pub use bytemuck::Pod;

/// Width in bytes of the length prefix written by [`PacketBuilder::write_string`].
pub const STRING_PREFIX_LEN: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_round_trip() {
        let packet = PacketBuilder::new()
            .write_u32(0x1234_5678)
            .write_string("Hello, World!")
            .write_u32(314_159)
            .write_u8(255)
            .build_reliable();

        assert_eq!(packet.len(), 4 + STRING_PREFIX_LEN + 13 + 4 + 1);

        let mut reader = PacketReader::from_packet(&packet);
        assert_eq!(reader.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(reader.read_prefixed_string().unwrap(), "Hello, World!");
        assert_eq!(reader.read_u32().unwrap(), 314_159);
        assert_eq!(reader.read_u8().unwrap(), 255);
        assert!(reader.is_at_end());
    }
}
