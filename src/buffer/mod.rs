//! # Buffer Management
//!
//! Pool-backed I/O buffers shared by every session.
//!
//! ## Components
//! - **BufferPool**: tiered, capacity-keyed free-lists of byte regions
//! - **InBuffer**: cursor reader over one received frame
//! - **OutBuffer**: cursor writer composing one outgoing frame
//!
//! The pool is the only resource shared across sessions; a session's own
//! InBuffer/OutBuffer are exclusively owned by that session. Regions move
//! between the pool and exactly one buffer at a time, so per-session buffer
//! reuse needs no cross-session locking.

pub mod in_buffer;
pub mod out_buffer;
pub mod pool;

pub use in_buffer::InBuffer;
pub use out_buffer::OutBuffer;
pub use pool::{BufferPool, DEFAULT_REGION_SIZE};
