//! Authenticated framing variant.
//!
//! Appends a fixed 12-byte trailer after the length header:
//!
//! ```text
//! [Length(n)] [Version(4)] [Nonce(4)] [Digest(4)] [Body(Length)]
//! ```
//!
//! The digest is the leading 4 bytes of the raw MD5 of
//! `length ‖ version ‖ nonce`. The decoder recomputes it before trusting the
//! header; a mismatch is a hard decode failure that closes the session, as
//! accepting the frame would silently desynchronize the stream.

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::buffer::{InBuffer, OutBuffer};
use crate::core::protocol::{decode_head, head_fits};
use crate::core::{ByteOrder, Message};
use crate::error::{LinkError, Result};
use crate::utils::digest::md5_digest;

/// Version tag carried in the trailer of every authenticated frame.
pub const AUTH_VERSION: u32 = 1;

const VERSION_LEN: usize = 4;
const NONCE_LEN: usize = 4;
const DIGEST_LEN: usize = 4;

/// Total trailer width between header and body.
pub const TRAILER_LEN: usize = VERSION_LEN + NONCE_LEN + DIGEST_LEN;

/// Length-prefixed framing with an integrity trailer.
#[derive(Clone)]
pub struct AuthProtocol {
    head_len: usize,
    byte_order: ByteOrder,
    key: Arc<str>,
    max_size: usize,
}

impl AuthProtocol {
    pub(crate) fn new(head_len: usize, key: &str, byte_order: ByteOrder, max_size: usize) -> Self {
        Self {
            head_len,
            byte_order,
            key: Arc::from(key),
            max_size,
        }
    }

    /// The configured key material.
    ///
    /// The key is carried with the protocol configuration for wire-level
    /// compatibility with existing deployments, but the trailer digest
    /// covers only the header fields and does not bind it.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) async fn read<R>(&self, reader: &mut R, buffer: &mut InBuffer) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        buffer.prepare(self.head_len + TRAILER_LEN);
        reader.read_exact(buffer.data_mut()).await?;

        let head = buffer.data();
        let signed_len = self.head_len + VERSION_LEN + NONCE_LEN;
        let digest = md5_digest(&head[..signed_len]);
        if digest[..DIGEST_LEN] != head[signed_len..] {
            return Err(LinkError::AuthMismatch);
        }

        let size = decode_head(&head[..self.head_len], self.byte_order);
        if self.max_size > 0 && size > self.max_size {
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

    pub(crate) fn write_to_buffer(
        &self,
        buffer: &mut OutBuffer,
        message: &dyn Message,
    ) -> Result<()> {
        let msg_size = message.size();
        if self.max_size > 0 && msg_size > self.max_size {
            return Err(LinkError::PacketTooLargeForWrite);
        }
        if !head_fits(self.head_len, msg_size) {
            return Err(LinkError::PacketTooLargeForWrite);
        }

        // Side buffer holding the signed prefix: header, version, nonce.
        let mut signed = [0u8; 8 + VERSION_LEN + NONCE_LEN];
        let signed_len = self.head_len + VERSION_LEN + NONCE_LEN;
        put_head(&mut signed, msg_size, self.head_len, self.byte_order);
        self.byte_order
            .put_u32(&mut signed[self.head_len..], AUTH_VERSION);
        let nonce: u32 = rand::random();
        self.byte_order
            .put_u32(&mut signed[self.head_len + VERSION_LEN..], nonce);
        let digest = md5_digest(&signed[..signed_len]);

        buffer.prepare(self.head_len + TRAILER_LEN + msg_size);
        buffer.write_bytes(&signed[..signed_len])?;
        buffer.write_bytes(&digest[..DIGEST_LEN])?;
        buffer.write_message(message)
    }
}

impl fmt::Debug for AuthProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProtocol")
            .field("head_len", &self.head_len)
            .field("byte_order", &self.byte_order)
            .field("key", &"<redacted>")
            .field("max_size", &self.max_size)
            .finish()
    }
}

fn put_head(dst: &mut [u8], size: usize, head_len: usize, order: ByteOrder) {
    match head_len {
        1 => dst[0] = size as u8,
        2 => order.put_u16(dst, size as u16),
        4 => order.put_u32(dst, size as u32),
        _ => order.put_u64(dst, size as u64),
    }
}
