//! # Utility Modules
//!
//! Supporting utilities used throughout the framing implementation.
//!
//! ## Components
//! - **Digest**: MD5 primitives backing the authenticated trailer

pub mod digest;
