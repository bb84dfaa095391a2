//! # Error Types
//!
//! Error handling for the session framework.
//!
//! This module defines all error variants that can occur while framing,
//! buffering, and shipping packets over a session.
//!
//! ## Error Categories
//! - **Transport errors**: short reads/writes, connection resets; always
//!   fatal to the session that observed them.
//! - **Framing errors**: oversized packets and digest mismatches; fatal to
//!   the current operation, and on the read side they also close the session.
//! - **Buffer-capacity errors**: a write window smaller than the value being
//!   written; reported to the immediate caller, never fatal to the session.
//! - **Async-queue errors**: enqueuing against a closed session, or a bounded
//!   queue that cannot accept work within the deadline.
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Primary error type for all session and framing operations.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Send to closed session")]
    SendToClosed,

    #[error("Async send timeout")]
    AsyncSendTimeout,

    #[error("Packet too large for read")]
    PacketTooLargeForRead,

    #[error("Packet too large for write")]
    PacketTooLargeForWrite,

    #[error("Buffer too short: needed {needed} bytes, {available} available")]
    BufferTooShort { needed: usize, available: usize },

    #[error("Authentication digest mismatch")]
    AuthMismatch,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl LinkError {
    /// Whether this error is fatal to the session that produced it.
    ///
    /// Buffer-capacity errors are recoverable by the immediate caller;
    /// everything else means the stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LinkError::BufferTooShort { .. })
    }
}

/// Type alias for Results using LinkError
pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_too_short_is_the_only_recoverable_class() {
        assert!(!LinkError::BufferTooShort {
            needed: 4,
            available: 2
        }
        .is_fatal());

        let fatal = [
            LinkError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof")),
            LinkError::SendToClosed,
            LinkError::AsyncSendTimeout,
            LinkError::PacketTooLargeForRead,
            LinkError::PacketTooLargeForWrite,
            LinkError::AuthMismatch,
            LinkError::ConfigError("bad width".into()),
            LinkError::Custom("unknown opcode".into()),
        ];
        for err in fatal {
            assert!(err.is_fatal(), "{err}");
        }
    }
}
