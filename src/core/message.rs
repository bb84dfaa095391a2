//! Message contract for the write path.
//!
//! A [`Message`] declares its encoded size up front and marshals itself
//! directly into the frame buffer's write window, so a full frame is composed
//! without intermediate allocations.

use crate::error::{LinkError, Result};

/// A value that can be framed and sent over a session.
///
/// `marshal_to` must write exactly `size()` bytes into the destination; a
/// destination shorter than `size()` is a [`LinkError::BufferTooShort`]
/// failure, signalling that the caller did not prepare enough space.
pub trait Message: Send + Sync {
    /// Encoded byte length of this message.
    fn size(&self) -> usize;

    /// Marshal the message into `dst`, returning the number of bytes written.
    fn marshal_to(&self, dst: &mut [u8]) -> Result<usize>;
}

/// A raw byte payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesMessage(pub Vec<u8>);

impl Message for BytesMessage {
    fn size(&self) -> usize {
        self.0.len()
    }

    fn marshal_to(&self, dst: &mut [u8]) -> Result<usize> {
        marshal_bytes(&self.0, dst)
    }
}

impl Message for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }

    fn marshal_to(&self, dst: &mut [u8]) -> Result<usize> {
        marshal_bytes(self, dst)
    }
}

impl Message for &[u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn marshal_to(&self, dst: &mut [u8]) -> Result<usize> {
        marshal_bytes(self, dst)
    }
}

fn marshal_bytes(src: &[u8], dst: &mut [u8]) -> Result<usize> {
    if dst.len() < src.len() {
        return Err(LinkError::BufferTooShort {
            needed: src.len(),
            available: dst.len(),
        });
    }
    dst[..src.len()].copy_from_slice(src);
    Ok(src.len())
}
