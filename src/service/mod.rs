//! # Service Layer
//!
//! Server-side session management on top of the framing core.
//!
//! ## Components
//! - **Server**: accept loop, session registry, lifecycle control
//! - **Broadcaster**: encode-once fan-out to many sessions

pub mod broadcaster;
pub mod server;

pub use broadcaster::{BroadcastWork, Broadcaster};
pub use server::Server;
