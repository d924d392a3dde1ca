//! Bounds-checked read cursor.

use crate::error::{FramingError, Result};
use crate::packet::Packet;

/// Cursor over a borrowed byte slice.
///
/// Every read either consumes exactly the bytes it decodes or fails with
/// [`FramingError::Underflow`] without moving. `seek` and `skip` clamp to the
/// buffer instead of failing, so they cannot be used for validation.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn from_packet(packet: &'a Packet) -> Self {
        Self::new(packet.data())
    }

    /// Borrow the next `len` bytes without consuming them.
    fn peek(&self, len: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(FramingError::Underflow {
                requested: len,
                remaining,
            });
        }
        Ok(&self.data[self.position..self.position + len])
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.peek(N)?);
        self.position += N;
        Ok(out)
    }

    /// Read a plain-old-data value in host byte order.
    pub fn read<T: bytemuck::Pod>(&mut self) -> Result<T> {
        let bytes = self.peek(std::mem::size_of::<T>())?;
        self.position += bytes.len();
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Fill `buf` completely, or fail without consuming anything.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        buf.copy_from_slice(self.peek(buf.len())?);
        self.position += buf.len();
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self.peek(len)?;
        self.position += len;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.take::<1>().map(u8::from_le_bytes)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.take::<1>().map(i8::from_le_bytes)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.take::<2>().map(i16::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.take::<4>().map(i32::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.take::<8>().map(i64::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.take::<4>().map(f32::from_le_bytes)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.take::<8>().map(f64::from_le_bytes)
    }

    /// Read exactly `len` bytes as UTF-8.
    pub fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.peek(len)?;
        let text = std::str::from_utf8(bytes).map_err(|e| FramingError::InvalidUtf8 {
            offset: self.position + e.valid_up_to(),
        })?;
        self.position += len;
        Ok(text.to_owned())
    }

    /// Read a string written by [`PacketBuilder::write_string`](crate::PacketBuilder::write_string).
    ///
    /// Prefix and body are consumed together: if the body is short, the prefix
    /// is left unread as well.
    pub fn read_prefixed_string(&mut self) -> Result<String> {
        let start = self.position;
        let len = self.read_u32()? as usize;
        self.read_string(len).inspect_err(|_| {
            self.position = start;
        })
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_at_end(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Move to `position`, clamped to the end of the buffer.
    pub fn seek(&mut self, position: usize) {
        self.position = position.min(self.data.len());
    }

    /// Advance by `bytes`, clamped to the end of the buffer.
    pub fn skip(&mut self, bytes: usize) {
        self.seek(self.position.saturating_add(bytes));
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Whole buffer (not just the unread part) as lossy text.
    pub fn as_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.data).into_owned()
    }
}
