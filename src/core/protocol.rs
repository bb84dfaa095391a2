//! Length-prefixed framing protocol.
//!
//! A [`Protocol`] is immutable configuration shared safely across many
//! connections; [`Protocol::new_state`] binds it to one connection side. The
//! framing itself is stateless per call, so a state is the configuration
//! plus the side it serves.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::buffer::{InBuffer, OutBuffer};
use crate::core::auth::AuthProtocol;
use crate::core::{ByteOrder, Message, ProtocolSide};
use crate::error::{LinkError, Result};

/// Packet protocol: plain length-prefixed framing or the authenticated
/// variant with an integrity trailer.
///
/// Exactly two variants exist, each holding its own immutable configuration.
#[derive(Debug, Clone)]
pub enum Protocol {
    Plain(PlainProtocol),
    Auth(AuthProtocol),
}

impl Protocol {
    /// Create a `{packet, N}` protocol splitting the stream on a fixed
    /// length header.
    ///
    /// `head_len` must be 1, 2, 4 or 8; anything else is a programming
    /// error and panics at configuration time, never per packet. A
    /// `max_read`/`max_write` of 0 disables that limit.
    pub fn packet_n(
        head_len: usize,
        byte_order: ByteOrder,
        max_read: usize,
        max_write: usize,
    ) -> Protocol {
        assert!(
            matches!(head_len, 1 | 2 | 4 | 8),
            "unsupported packet head size: {head_len}"
        );
        Protocol::Plain(PlainProtocol {
            head_len,
            byte_order,
            max_read,
            max_write,
        })
    }

    /// Create an authenticated `{packet, N}` protocol. See
    /// [`AuthProtocol`] for the trailer layout.
    pub fn auth_packet_n(
        head_len: usize,
        key: &str,
        byte_order: ByteOrder,
        max_size: usize,
    ) -> Protocol {
        assert!(
            matches!(head_len, 1 | 2 | 4 | 8),
            "unsupported packet head size: {head_len}"
        );
        Protocol::Auth(AuthProtocol::new(head_len, key, byte_order, max_size))
    }

    /// Bind the protocol to one side of a connection.
    pub fn new_state(&self, side: ProtocolSide) -> Result<ProtocolState> {
        Ok(ProtocolState {
            protocol: self.clone(),
            side,
        })
    }
}

/// A protocol bound to one connection side.
#[derive(Debug, Clone)]
pub struct ProtocolState {
    protocol: Protocol,
    side: ProtocolSide,
}

impl ProtocolState {
    pub fn side(&self) -> ProtocolSide {
        self.side
    }

    /// Read one frame from `reader` into `buffer`.
    ///
    /// Runs the full `header -> body` cycle synchronously against the
    /// connection; short reads and EOF propagate as I/O errors and the
    /// caller is expected to close the session.
    pub async fn read<R>(&self, reader: &mut R, buffer: &mut InBuffer) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        match &self.protocol {
            Protocol::Plain(p) => p.read(reader, buffer).await,
            Protocol::Auth(p) => p.read(reader, buffer).await,
        }
    }

    /// Frame `message` into `buffer`: header, optional trailer, body.
    pub fn write_to_buffer(&self, buffer: &mut OutBuffer, message: &dyn Message) -> Result<()> {
        match &self.protocol {
            Protocol::Plain(p) => p.write_to_buffer(buffer, message),
            Protocol::Auth(p) => p.write_to_buffer(buffer, message),
        }
    }

    /// Flush a composed frame to `writer` in one call.
    ///
    /// A buffer with no pending bytes is a no-op. A short write from the
    /// underlying transport is fatal, never retried here.
    pub async fn write<W>(&self, writer: &mut W, buffer: &OutBuffer) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if buffer.pos() == 0 {
            return Ok(());
        }
        writer.write_all(buffer.data()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// The packet splitting protocol like Erlang's `{packet, N}`: each packet
/// carries a fixed-length header holding the body length.
#[derive(Debug, Clone)]
pub struct PlainProtocol {
    head_len: usize,
    byte_order: ByteOrder,
    max_read: usize,
    max_write: usize,
}

impl PlainProtocol {
    async fn read<R>(&self, reader: &mut R, buffer: &mut InBuffer) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        buffer.prepare(self.head_len);
        reader.read_exact(buffer.data_mut()).await?;

        let size = decode_head(buffer.data(), self.byte_order);
        if self.max_read > 0 && size > self.max_read {
            return Err(LinkError::PacketTooLargeForRead);
        }
        if size == 0 {
            buffer.prepare(0);
            return Ok(());
        }
        buffer.prepare(size);
        reader.read_exact(buffer.data_mut()).await?;
        Ok(())
    }

    fn write_to_buffer(&self, buffer: &mut OutBuffer, message: &dyn Message) -> Result<()> {
        let msg_size = message.size();
        if self.max_write > 0 && msg_size > self.max_write {
            return Err(LinkError::PacketTooLargeForWrite);
        }
        if !head_fits(self.head_len, msg_size) {
            return Err(LinkError::PacketTooLargeForWrite);
        }
        buffer.prepare(self.head_len + msg_size);
        encode_head(buffer, msg_size, self.head_len, self.byte_order)?;
        buffer.write_message(message)
    }
}

/// Whether `size` is representable in a `head_len`-byte header.
pub(crate) fn head_fits(head_len: usize, size: usize) -> bool {
    head_len >= 8 || (size as u64) <= (u64::MAX >> (64 - 8 * head_len as u32))
}

pub(crate) fn decode_head(head: &[u8], order: ByteOrder) -> usize {
    match head.len().min(8) {
        1 => head[0] as usize,
        2 => order.get_u16(head) as usize,
        4 => order.get_u32(head) as usize,
        _ => order.get_u64(head) as usize,
    }
}

pub(crate) fn encode_head(
    buffer: &mut OutBuffer,
    size: usize,
    head_len: usize,
    order: ByteOrder,
) -> Result<()> {
    match head_len {
        1 => buffer.write_u8(size as u8),
        2 => buffer.write_u16(size as u16, order),
        4 => buffer.write_u32(size as u32, order),
        _ => buffer.write_u64(size as u64, order),
    }
}
