//! Owned, move-only packet payloads.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::error::{FramingError, Result};
use crate::flags::PacketFlags;

/// A payload plus delivery flags.
///
/// `Packet` deliberately does not implement `Clone`: handing one to a transport
/// moves it, and the moved-from binding can no longer be used.
///
/// ```compile_fail
/// use fjord_framing::Packet;
///
/// let packet = Packet::reliable(b"once");
/// let first = packet.into_bytes();
/// let second = packet.into_bytes(); // error: use of moved value
/// ```
pub struct Packet {
    payload: Bytes,
    flags: PacketFlags,
}

impl Packet {
    /// Copy `data` into a new packet.
    pub fn new(data: impl AsRef<[u8]>, flags: PacketFlags) -> Self {
        Self {
            payload: Bytes::copy_from_slice(data.as_ref()),
            flags,
        }
    }

    /// Reliable packet (the default flags).
    pub fn reliable(data: impl AsRef<[u8]>) -> Self {
        Self::new(data, PacketFlags::RELIABLE)
    }

    /// Packet with no delivery guarantees.
    pub fn unreliable(data: impl AsRef<[u8]>) -> Self {
        Self::new(data, PacketFlags::NONE)
    }

    /// Wrap an existing buffer without copying it.
    pub fn from_bytes(payload: Bytes, flags: PacketFlags) -> Self {
        Self { payload, flags }
    }

    /// Packet holding the raw in-memory bytes of a plain-old-data value.
    pub fn from_value<T: bytemuck::Pod>(value: &T, flags: PacketFlags) -> Self {
        Self::new(bytemuck::bytes_of(value), flags)
    }

    pub fn data(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn has_flag(&self, flag: PacketFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Read the leading bytes as a plain-old-data value.
    pub fn as_value<T: bytemuck::Pod>(&self) -> Result<T> {
        let needed = std::mem::size_of::<T>();
        match self.payload.get(..needed) {
            Some(bytes) => Ok(bytemuck::pod_read_unaligned(bytes)),
            None => Err(FramingError::TooSmall {
                needed,
                actual: self.payload.len(),
            }),
        }
    }

    /// Payload as text; invalid UTF-8 sequences are replaced.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.payload.to_vec()
    }

    /// Truncate, or zero-extend, the payload to `new_len` bytes.
    pub fn resize(&mut self, new_len: usize) {
        if new_len <= self.payload.len() {
            self.payload.truncate(new_len);
            return;
        }
        let mut grown = BytesMut::with_capacity(new_len);
        grown.extend_from_slice(&self.payload);
        grown.resize(new_len, 0);
        self.payload = grown.freeze();
    }

    /// Consume the packet, yielding its payload.
    pub fn into_bytes(self) -> Bytes {
        self.payload
    }

    /// Consume the packet, yielding payload and flags.
    pub fn into_parts(self) -> (Bytes, PacketFlags) {
        (self.payload, self.flags)
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(Bytes::from(data), PacketFlags::default())
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.payload.len())
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_input() {
        let mut source = b"abc".to_vec();
        let packet = Packet::reliable(&source);
        source[0] = b'z';
        assert_eq!(packet.data(), b"abc");
        assert!(packet.has_flag(PacketFlags::RELIABLE));
    }

    #[test]
    fn from_bytes_shares_buffer() {
        let buf = Bytes::from_static(b"static payload");
        let packet = Packet::from_bytes(buf.clone(), PacketFlags::NO_ALLOCATE);
        assert_eq!(packet.data().as_ptr(), buf.as_ptr());
    }

    #[test]
    fn value_round_trip() {
        let packet = Packet::from_value(&0xDEAD_BEEF_u32, PacketFlags::default());
        assert_eq!(packet.len(), 4);
        assert_eq!(packet.as_value::<u32>().unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn as_value_too_small() {
        let packet = Packet::reliable([1u8, 2]);
        assert_eq!(
            packet.as_value::<u64>(),
            Err(FramingError::TooSmall { needed: 8, actual: 2 })
        );
    }

    #[test]
    fn resize_truncates_and_extends() {
        let mut packet = Packet::reliable(b"hello");
        packet.resize(2);
        assert_eq!(packet.data(), b"he");
        packet.resize(4);
        assert_eq!(packet.data(), b"he\0\0");
    }

    #[test]
    fn lossy_string() {
        let packet = Packet::unreliable([b'o', b'k', 0xFF]);
        assert_eq!(packet.to_string_lossy(), "ok\u{FFFD}");
        assert!(packet.flags().is_empty());
    }
}
