//! Growable write buffer that snapshots into packets.

use crate::flags::PacketFlags;
use crate::packet::Packet;

/// Appends fixed-width values and strings to an in-memory buffer.
///
/// Fixed-width helpers (`write_u16`, `write_u32`, ...) are little-endian.
/// [`write`](Self::write) copies the in-memory representation of any
/// [`Pod`](bytemuck::Pod) value, i.e. host byte order.
#[derive(Debug, Clone, Default)]
pub struct PacketBuilder {
    buffer: Vec<u8>,
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Append the raw bytes of a plain-old-data value.
    pub fn write<T: bytemuck::Pod>(&mut self, value: &T) -> &mut Self {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(data);
        self
    }

    /// Append UTF-8 bytes with no length prefix.
    pub fn write_str(&mut self, text: &str) -> &mut Self {
        self.write_bytes(text.as_bytes())
    }

    /// Append a `u32` length followed by the UTF-8 bytes of `text`.
    ///
    /// No terminator is written. Strings longer than `u32::MAX` bytes cannot be
    /// framed and have their prefix wrapped.
    pub fn write_string(&mut self, text: &str) -> &mut Self {
        self.write_u32(text.len() as u32);
        self.write_str(text)
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i8(&mut self, value: i8) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn reserve(&mut self, additional: usize) -> &mut Self {
        self.buffer.reserve(additional);
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.buffer.clear();
        self
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Copy the current contents into a new packet. The builder is left intact.
    pub fn build(&self, flags: PacketFlags) -> Packet {
        Packet::new(&self.buffer, flags)
    }

    /// [`build`](Self::build) with the default (reliable) flags.
    pub fn build_reliable(&self) -> Packet {
        self.build(PacketFlags::default())
    }
}
