//! # Core Framing Components
//!
//! Low-level packet framing: byte-order primitives, the length-prefixed
//! protocol and its authenticated variant, and the message contract.
//!
//! ## Wire Format
//! ```text
//! plain:         [Length(n)] [Body(Length)]
//! authenticated: [Length(n)] [Version(4)] [Nonce(4)] [Digest(4)] [Body(Length)]
//! ```
//! `n` is the configured header width (1, 2, 4 or 8 bytes) in the configured
//! byte order; the authenticated digest is the leading 4 bytes of the MD5 of
//! `length ‖ version ‖ nonce`.

pub mod auth;
pub mod message;
pub mod protocol;

pub use message::{BytesMessage, Message};
pub use protocol::{Protocol, ProtocolState};

use serde::{Deserialize, Serialize};

/// Byte order of the length header and trailer fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    pub fn get_u16(self, b: &[u8]) -> u16 {
        match self {
            ByteOrder::BigEndian => u16::from_be_bytes([b[0], b[1]]),
            ByteOrder::LittleEndian => u16::from_le_bytes([b[0], b[1]]),
        }
    }

    pub fn get_u32(self, b: &[u8]) -> u32 {
        match self {
            ByteOrder::BigEndian => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            ByteOrder::LittleEndian => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        }
    }

    pub fn get_u64(self, b: &[u8]) -> u64 {
        let bytes = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
        match self {
            ByteOrder::BigEndian => u64::from_be_bytes(bytes),
            ByteOrder::LittleEndian => u64::from_le_bytes(bytes),
        }
    }

    pub fn put_u16(self, b: &mut [u8], v: u16) {
        let bytes = match self {
            ByteOrder::BigEndian => v.to_be_bytes(),
            ByteOrder::LittleEndian => v.to_le_bytes(),
        };
        b[..2].copy_from_slice(&bytes);
    }

    pub fn put_u32(self, b: &mut [u8], v: u32) {
        let bytes = match self {
            ByteOrder::BigEndian => v.to_be_bytes(),
            ByteOrder::LittleEndian => v.to_le_bytes(),
        };
        b[..4].copy_from_slice(&bytes);
    }

    pub fn put_u64(self, b: &mut [u8], v: u64) {
        let bytes = match self {
            ByteOrder::BigEndian => v.to_be_bytes(),
            ByteOrder::LittleEndian => v.to_le_bytes(),
        };
        b[..8].copy_from_slice(&bytes);
    }
}

/// Which side of a connection a protocol state is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolSide {
    Server,
    Client,
}
