//! Outgoing message buffer.

use std::sync::Arc;

use crate::buffer::pool::BufferPool;
use crate::core::{ByteOrder, Message};
use crate::error::{LinkError, Result};

/// Cursor wrapper over a pool-backed region composing one outgoing frame.
///
/// `pos` marks the end of already-written bytes. Every `write_*` call must
/// be preceded by a [`prepare`](OutBuffer::prepare) covering at least that
/// many bytes; writing into a window shorter than the value's width fails in
/// place instead of panicking or truncating, so callers can detect a prepare
/// that did not request enough space.
pub struct OutBuffer {
    pool: Arc<BufferPool>,
    data: Vec<u8>,
    pos: usize,
}

impl OutBuffer {
    /// Create an empty buffer bound to `pool`.
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            data: Vec::new(),
            pos: 0,
        }
    }

    /// Grow the logical window by `size` bytes past `pos`.
    ///
    /// When the held region cannot fit `pos + size`, a region of that
    /// capacity is acquired from the pool, the written prefix `[0..pos)` is
    /// carried over and the old region is released. The grown window is
    /// zero-filled either way.
    pub fn prepare(&mut self, size: usize) {
        if self.data.capacity() - self.pos < size {
            let mut grown = self.pool.get(self.pos + size);
            grown[..self.pos].copy_from_slice(&self.data[..self.pos]);
            let old = std::mem::replace(&mut self.data, grown);
            self.pool.put(old);
        } else {
            self.data.resize(self.pos + size, 0);
        }
    }

    /// `pos` to 0, region released back to the pool.
    pub fn reset(&mut self) {
        self.pos = 0;
        let old = std::mem::take(&mut self.data);
        self.pool.put(old);
    }

    /// End of the written bytes.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// The written frame bytes `[0..pos)`, ready to flush.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.pos]
    }

    /// The writable window `[pos..]`.
    pub fn container(&mut self) -> &mut [u8] {
        &mut self.data[self.pos..]
    }

    /// Marshal a message into the write window, advancing `pos` by the bytes
    /// actually written.
    pub fn write_message(&mut self, message: &dyn Message) -> Result<()> {
        let n = message.marshal_to(self.container())?;
        self.pos += n;
        Ok(())
    }

    /// Copy raw bytes into the write window.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_window(bytes.len())?;
        self.data[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.check_window(1)?;
        self.data[self.pos] = v;
        self.pos += 1;
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16, order: ByteOrder) -> Result<()> {
        self.check_window(2)?;
        order.put_u16(&mut self.data[self.pos..], v);
        self.pos += 2;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32, order: ByteOrder) -> Result<()> {
        self.check_window(4)?;
        order.put_u32(&mut self.data[self.pos..], v);
        self.pos += 4;
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64, order: ByteOrder) -> Result<()> {
        self.check_window(8)?;
        order.put_u64(&mut self.data[self.pos..], v);
        self.pos += 8;
        Ok(())
    }

    fn check_window(&self, needed: usize) -> Result<()> {
        let available = self.data.len() - self.pos;
        if available < needed {
            return Err(LinkError::BufferTooShort { needed, available });
        }
        Ok(())
    }
}

impl Drop for OutBuffer {
    fn drop(&mut self) {
        let old = std::mem::take(&mut self.data);
        self.pool.put(old);
    }
}
