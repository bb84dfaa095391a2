//! Incoming message buffer.

use std::sync::Arc;

use crate::buffer::pool::BufferPool;
use crate::core::ByteOrder;
use crate::error::{LinkError, Result};

/// Cursor wrapper over a pool-backed region holding one received frame.
///
/// The cursor starts at 0 and advances monotonically by the byte width of
/// each decode call. Views returned by [`slice`](InBuffer::slice) borrow the
/// backing region and become invalid once the buffer is reset.
pub struct InBuffer {
    pool: Arc<BufferPool>,
    data: Vec<u8>,
    read_pos: usize,
}

impl InBuffer {
    /// Create an empty buffer bound to `pool`. The first use requires
    /// [`prepare`](InBuffer::prepare).
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            data: Vec::new(),
            read_pos: 0,
        }
    }

    /// Ensure the backing region covers `size` bytes and set the logical
    /// length to `size`.
    ///
    /// Cursor management is owned by the caller; framing calls `prepare`
    /// immediately before each fixed-size read and never touches the cursor.
    pub fn prepare(&mut self, size: usize) {
        if self.data.capacity() < size {
            let old = std::mem::take(&mut self.data);
            self.pool.put(old);
            self.data = self.pool.get(size);
        } else {
            self.data.clear();
            self.data.resize(size, 0);
        }
    }

    /// Cursor to 0, region released back to the pool.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        let old = std::mem::take(&mut self.data);
        self.pool.put(old);
    }

    /// The full logical contents, independent of the cursor.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view of the logical contents, for filling from a reader.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes remaining after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// View over the next `n` bytes, advancing the cursor.
    pub fn slice(&mut self, n: usize) -> Result<&[u8]> {
        if self.read_pos + n > self.data.len() {
            return Err(LinkError::BufferTooShort {
                needed: n,
                available: self.remaining(),
            });
        }
        let view = &self.data[self.read_pos..self.read_pos + n];
        self.read_pos += n;
        Ok(view)
    }

    /// Copy the next `n` bytes out of the buffer.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.slice(n)?.to_vec())
    }

    /// Read `n` bytes as a string, replacing invalid UTF-8.
    pub fn read_string(&mut self, n: usize) -> Result<String> {
        Ok(String::from_utf8_lossy(self.slice(n)?).into_owned())
    }

    /// Decode one UTF-8 scalar from the buffer.
    ///
    /// An invalid leading byte consumes one byte and yields U+FFFD, matching
    /// the usual incremental-decode convention.
    pub fn read_rune(&mut self) -> Result<char> {
        let rest = &self.data[self.read_pos..];
        if rest.is_empty() {
            return Err(LinkError::BufferTooShort {
                needed: 1,
                available: 0,
            });
        }
        let take = rest.len().min(4);
        let ch = match std::str::from_utf8(&rest[..take]) {
            Ok(s) => s.chars().next(),
            Err(e) if e.valid_up_to() > 0 => std::str::from_utf8(&rest[..e.valid_up_to()])
                .ok()
                .and_then(|s| s.chars().next()),
            Err(_) => None,
        };
        match ch {
            Some(ch) => {
                self.read_pos += ch.len_utf8();
                Ok(ch)
            }
            None => {
                self.read_pos += 1;
                Ok('\u{FFFD}')
            }
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.slice(1)?[0])
    }

    pub fn read_u16(&mut self, order: ByteOrder) -> Result<u16> {
        Ok(order.get_u16(self.slice(2)?))
    }

    pub fn read_u32(&mut self, order: ByteOrder) -> Result<u32> {
        Ok(order.get_u32(self.slice(4)?))
    }

    pub fn read_u64(&mut self, order: ByteOrder) -> Result<u64> {
        Ok(order.get_u64(self.slice(8)?))
    }

    pub fn read_f32(&mut self, order: ByteOrder) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(order)?))
    }

    pub fn read_f64(&mut self, order: ByteOrder) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64(order)?))
    }

    /// Read a LEB128-encoded unsigned integer.
    pub fn read_uvarint(&mut self) -> Result<u64> {
        let mut x: u64 = 0;
        let mut shift = 0u32;
        for (i, &byte) in self.data[self.read_pos..].iter().enumerate() {
            if i >= 10 || (i == 9 && byte > 1) {
                return Err(LinkError::Custom("uvarint overflows 64 bits".into()));
            }
            if byte < 0x80 {
                self.read_pos += i + 1;
                return Ok(x | u64::from(byte) << shift);
            }
            x |= u64::from(byte & 0x7f) << shift;
            shift += 7;
        }
        Err(LinkError::BufferTooShort {
            needed: self.remaining() + 1,
            available: self.remaining(),
        })
    }

    /// Read a zigzag-encoded signed integer.
    pub fn read_varint(&mut self) -> Result<i64> {
        let ux = self.read_uvarint()?;
        Ok((ux >> 1) as i64 ^ -((ux & 1) as i64))
    }
}

impl Drop for InBuffer {
    fn drop(&mut self) {
        let old = std::mem::take(&mut self.data);
        self.pool.put(old);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(bytes: &[u8]) -> InBuffer {
        let mut buffer = InBuffer::new(Arc::new(BufferPool::default()));
        buffer.prepare(bytes.len());
        buffer.data_mut().copy_from_slice(bytes);
        buffer
    }

    #[test]
    fn test_typed_reads_both_orders() {
        let mut wire = vec![123u8];
        wire.extend_from_slice(&0xFFEEu16.to_le_bytes());
        wire.extend_from_slice(&0xFFEEu16.to_be_bytes());
        wire.extend_from_slice(&0xFFEE_DDCCu32.to_le_bytes());
        wire.extend_from_slice(&0xFFEE_DDCCu32.to_be_bytes());
        wire.extend_from_slice(&0xFFEE_DDCC_BBAA_9988u64.to_le_bytes());
        wire.extend_from_slice(&0xFFEE_DDCC_BBAA_9988u64.to_be_bytes());

        let mut buffer = filled(&wire);
        assert_eq!(buffer.read_u8().unwrap(), 123);
        assert_eq!(buffer.read_u16(ByteOrder::LittleEndian).unwrap(), 0xFFEE);
        assert_eq!(buffer.read_u16(ByteOrder::BigEndian).unwrap(), 0xFFEE);
        assert_eq!(
            buffer.read_u32(ByteOrder::LittleEndian).unwrap(),
            0xFFEE_DDCC
        );
        assert_eq!(buffer.read_u32(ByteOrder::BigEndian).unwrap(), 0xFFEE_DDCC);
        assert_eq!(
            buffer.read_u64(ByteOrder::LittleEndian).unwrap(),
            0xFFEE_DDCC_BBAA_9988
        );
        assert_eq!(
            buffer.read_u64(ByteOrder::BigEndian).unwrap(),
            0xFFEE_DDCC_BBAA_9988
        );
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_floats() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&1.5f32.to_bits().to_be_bytes());
        wire.extend_from_slice(&(-2.25f64).to_bits().to_le_bytes());

        let mut buffer = filled(&wire);
        assert_eq!(buffer.read_f32(ByteOrder::BigEndian).unwrap(), 1.5);
        assert_eq!(buffer.read_f64(ByteOrder::LittleEndian).unwrap(), -2.25);
    }

    #[test]
    fn test_slice_overrun() {
        let mut buffer = filled(&[1, 2, 3]);
        buffer.slice(2).unwrap();
        let err = buffer.slice(2).unwrap_err();
        assert!(matches!(
            err,
            LinkError::BufferTooShort {
                needed: 2,
                available: 1
            }
        ));
    }

    #[test]
    fn test_varints() {
        // 300 = LEB128 [0xAC, 0x02]; -3 zigzags to 5.
        let mut buffer = filled(&[0xAC, 0x02, 0x05]);
        assert_eq!(buffer.read_uvarint().unwrap(), 300);
        assert_eq!(buffer.read_varint().unwrap(), -3);
    }

    #[test]
    fn test_uvarint_truncated() {
        let mut buffer = filled(&[0x80, 0x80]);
        assert!(buffer.read_uvarint().is_err());
    }

    #[test]
    fn test_read_rune() {
        let mut wire = "aé€".as_bytes().to_vec();
        wire.push(0xFF);
        let mut buffer = filled(&wire);
        assert_eq!(buffer.read_rune().unwrap(), 'a');
        assert_eq!(buffer.read_rune().unwrap(), 'é');
        assert_eq!(buffer.read_rune().unwrap(), '€');
        assert_eq!(buffer.read_rune().unwrap(), '\u{FFFD}');
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_reset_returns_region() {
        let pool = Arc::new(BufferPool::default());
        let mut buffer = InBuffer::new(pool.clone());
        buffer.prepare(16);
        assert_eq!(pool.available(), 0);
        buffer.reset();
        assert_eq!(pool.available(), 1);
        assert_eq!(buffer.data().len(), 0);
    }

    #[test]
    fn test_prepare_keeps_cursor() {
        let mut buffer = filled(&[9, 9]);
        buffer.read_u8().unwrap();
        buffer.prepare(4);
        // The cursor is the caller's to manage.
        assert_eq!(buffer.remaining(), 3);
    }
}
