//! Encode-once fan-out to many sessions.

use std::sync::Arc;
use std::time::Duration;

use crate::buffer::{BufferPool, OutBuffer};
use crate::core::{Message, Protocol, ProtocolSide};
use crate::error::Result;
use crate::session::{AsyncWork, Session};

/// One queued broadcast delivery, paired with its target session.
pub struct BroadcastWork {
    pub session: Arc<Session>,
    pub work: AsyncWork,
}

/// Frames a message once and shares the encoded buffer across every target
/// session's async buffer queue.
///
/// For the authenticated protocol all recipients see the same nonce; the
/// trailer authenticates the header, not the recipient.
pub struct Broadcaster {
    state: crate::core::ProtocolState,
    pool: Arc<BufferPool>,
}

impl Broadcaster {
    pub fn new(protocol: &Protocol, pool: Arc<BufferPool>) -> Result<Self> {
        Ok(Broadcaster {
            state: protocol.new_state(ProtocolSide::Server)?,
            pool,
        })
    }

    /// Queue `message` to every session in `sessions`.
    ///
    /// Encoding happens exactly once regardless of fan-out width. Each
    /// returned [`BroadcastWork`] completes independently; a slow or closed
    /// session affects only its own delivery.
    pub fn broadcast(
        &self,
        sessions: &[Arc<Session>],
        message: &dyn Message,
        timeout: Duration,
    ) -> Result<Vec<BroadcastWork>> {
        let mut buffer = OutBuffer::new(self.pool.clone());
        self.state.write_to_buffer(&mut buffer, message)?;
        let buffer = Arc::new(buffer);

        Ok(sessions
            .iter()
            .map(|session| BroadcastWork {
                session: session.clone(),
                work: session.async_send_buffer(buffer.clone(), timeout),
            })
            .collect())
    }
}
