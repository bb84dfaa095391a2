//! # packet-link
//!
//! Session framework for length-prefixed TCP protocols.
//!
//! Every packet carries a fixed-width length header (1, 2, 4 or 8 bytes, in
//! either byte order) followed by the body; an authenticated variant inserts
//! an integrity trailer between the two. Sessions own their buffers and
//! protocol state, pull regions from a shared tiered pool, and expose both a
//! blocking send path and bounded async queues drained by a per-session
//! dispatch task.
//!
//! ## Quick Start
//! ```no_run
//! use std::time::SystemTime;
//!
//! use packet_link::core::{ByteOrder, Protocol};
//! use packet_link::service::Server;
//! use packet_link::session::Session;
//!
//! # async fn run() -> packet_link::error::Result<()> {
//! let protocol = Protocol::packet_n(4, ByteOrder::BigEndian, 0, 0);
//!
//! let server = Server::bind("127.0.0.1:9000", protocol.clone()).await?;
//! tokio::spawn({
//!     let server = server.clone();
//!     async move {
//!         let _ = server
//!             .serve(|session| async move {
//!                 // Echo every frame back.
//!                 while let Ok(body) = session.read_packet().await {
//!                     let _ = session.send_bytes(&body, SystemTime::now()).await;
//!                 }
//!             })
//!             .await;
//!     }
//! });
//!
//! let client = Session::dial("127.0.0.1:9000", &protocol).await?;
//! client.send_bytes(b"hello", SystemTime::now()).await?;
//! let echoed = client.read_packet().await?;
//! assert_eq!(echoed, b"hello");
//!
//! client.close();
//! server.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//! - [`buffer`]: tiered pool and cursor buffers
//! - [`core`]: framing protocols and the message contract
//! - [`session`]: per-connection concurrency core
//! - [`service`]: server, registry and broadcast
//! - [`config`]: TOML and environment configuration
//! - [`error`]: the library error type

pub mod buffer;
pub mod config;
pub mod core;
pub mod error;
pub mod service;
pub mod session;
pub mod utils;

pub use buffer::{BufferPool, InBuffer, OutBuffer};
pub use config::LinkConfig;
pub use core::{ByteOrder, BytesMessage, Message, Protocol, ProtocolSide, ProtocolState};
pub use error::{LinkError, Result};
pub use service::{Broadcaster, Server};
pub use session::{AsyncWork, CallbackId, Session};
