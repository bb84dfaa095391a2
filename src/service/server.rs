//! TCP server: accept loop, session registry, lifecycle control.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::BufferPool;
use crate::core::{Message, Protocol, ProtocolSide};
use crate::error::Result;
use crate::service::broadcaster::{BroadcastWork, Broadcaster};
use crate::session::{Session, DEFAULT_READ_BUFFER_SIZE, DEFAULT_SEND_QUEUE_SIZE};

/// Accepts connections and tracks the sessions spawned for them.
///
/// Sessions deregister themselves through a close callback, so the registry
/// only ever holds live sessions. [`stop`](Server::stop) is idempotent and
/// closes everything still registered.
pub struct Server {
    listener: TcpListener,
    protocol: Protocol,
    pool: Arc<BufferPool>,

    send_queue_size: usize,
    read_buffer_size: usize,
    max_sessions: usize,
    async_send_timeout: Duration,

    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    next_session_id: AtomicU64,
    serving: AtomicBool,
    stopped: AtomicBool,
    stop_token: CancellationToken,
}

impl Server {
    /// Wrap an already-bound listener.
    pub fn new(listener: TcpListener, protocol: Protocol) -> Arc<Self> {
        Arc::new(Server {
            listener,
            protocol,
            pool: Arc::new(BufferPool::default()),
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_sessions: 0,
            async_send_timeout: Duration::from_secs(1),
            sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(0),
            serving: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_token: CancellationToken::new(),
        })
    }

    /// Bind `addr` and wrap the listener.
    pub async fn bind<A: ToSocketAddrs>(addr: A, protocol: Protocol) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Server::new(listener, protocol))
    }

    /// Bind `addr` with protocol and limits taken from `config`.
    pub async fn from_config<A: ToSocketAddrs>(
        addr: A,
        config: &crate::config::LinkConfig,
    ) -> Result<Arc<Self>> {
        config.validate_strict()?;
        let server = Server::bind(addr, config.protocol.build_protocol()?)
            .await?
            .with_send_queue_size(config.session.send_queue_size)
            .with_read_buffer_size(config.session.read_buffer_size)
            .with_max_sessions(config.server.max_sessions)
            .with_async_send_timeout(config.session.async_send_timeout);
        Ok(server.with_pool(Arc::new(BufferPool::new(config.pool.region_size))))
    }

    /// Async send queue capacity for accepted sessions.
    pub fn with_send_queue_size(self: Arc<Self>, size: usize) -> Arc<Self> {
        self.rebuild(|s| s.send_queue_size = size)
    }

    /// Read-buffering size for accepted sessions; 0 disables buffering.
    pub fn with_read_buffer_size(self: Arc<Self>, size: usize) -> Arc<Self> {
        self.rebuild(|s| s.read_buffer_size = size)
    }

    /// Cap on concurrent sessions; connections over the cap are dropped at
    /// accept time. 0 means unlimited.
    pub fn with_max_sessions(self: Arc<Self>, max: usize) -> Arc<Self> {
        self.rebuild(|s| s.max_sessions = max)
    }

    /// Deadline for a queue slot when a broadcast hits a session with a
    /// full async queue; the deadline elapsing closes that session.
    pub fn with_async_send_timeout(self: Arc<Self>, timeout: Duration) -> Arc<Self> {
        self.rebuild(|s| s.async_send_timeout = timeout)
    }

    /// Share a buffer pool across servers instead of the per-server default.
    pub fn with_pool(self: Arc<Self>, pool: Arc<BufferPool>) -> Arc<Self> {
        self.rebuild(|s| s.pool = pool)
    }

    // Builder setters only make sense before serve(); sole ownership of the
    // Arc is how that is enforced.
    fn rebuild(self: Arc<Self>, f: impl FnOnce(&mut Server)) -> Arc<Self> {
        let mut server =
            Arc::try_unwrap(self).unwrap_or_else(|_| panic!("server configured while shared"));
        f(&mut server);
        Arc::new(server)
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn get_session(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.lock().ok().and_then(|s| s.get(&id).cloned())
    }

    /// Visit every registered session. The registry lock is not held during
    /// the visits, so sessions may close concurrently.
    pub fn for_each_session(&self, mut f: impl FnMut(&Arc<Session>)) {
        let sessions: Vec<Arc<Session>> = match self.sessions.lock() {
            Ok(sessions) => sessions.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        for session in &sessions {
            f(session);
        }
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::Acquire) && !self.is_stopped()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Accept one connection and construct its server-side session.
    ///
    /// The session is registered and deregisters itself through a close
    /// callback. Connections over the session cap are dropped and the wait
    /// continues; transport-level accept failures propagate to the caller.
    pub async fn accept(self: &Arc<Self>) -> Result<Arc<Session>> {
        loop {
            let (stream, peer) = self.listener.accept().await?;

            if self.max_sessions > 0 && self.session_count() >= self.max_sessions {
                warn!(%peer, max = self.max_sessions, "session limit reached, dropping connection");
                continue;
            }

            let id = self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
            let session = Session::new(
                id,
                stream,
                &self.protocol,
                ProtocolSide::Server,
                self.pool.clone(),
                self.send_queue_size,
                self.read_buffer_size,
            )?;
            debug!(session_id = id, %peer, "session accepted");
            self.register(&session);
            return Ok(session);
        }
    }

    /// Run the accept loop, spawning `handler` on a fresh task per session,
    /// until [`stop`](Server::stop).
    ///
    /// The handler owns the session's read side; the session stays
    /// registered until its connection closes.
    pub async fn serve<H, F>(self: &Arc<Self>, handler: H) -> Result<()>
    where
        H: Fn(Arc<Session>) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.serving.store(true, Ordering::Release);
        let handler = Arc::new(handler);
        info!(addr = ?self.listener.local_addr(), "server accepting connections");

        loop {
            let session = tokio::select! {
                res = self.accept() => match res {
                    Ok(session) => session,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                },
                _ = self.stop_token.cancelled() => {
                    debug!("accept loop stopped");
                    return Ok(());
                }
            };

            let handler = handler.clone();
            tokio::spawn(async move {
                handler(session).await;
            });
        }
    }

    fn register(self: &Arc<Self>, session: &Arc<Session>) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(session.id(), session.clone());
        }
        let server = Arc::downgrade(self);
        let id = session.id();
        session.add_close_callback(move || {
            Server::deregister(&server, id);
        });
    }

    fn deregister(server: &Weak<Server>, id: u64) {
        if let Some(server) = server.upgrade() {
            if let Ok(mut sessions) = server.sessions.lock() {
                sessions.remove(&id);
            }
            debug!(session_id = id, "session deregistered");
        }
    }

    /// Stop accepting and close every registered session. Idempotent.
    pub fn stop(self: &Arc<Self>) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        info!("server stopping");
        self.stop_token.cancel();

        let sessions: Vec<Arc<Session>> = match self.sessions.lock() {
            Ok(sessions) => sessions.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        for session in sessions {
            session.close();
        }
    }

    /// Encode `message` once and queue it to every registered session,
    /// bounded per session by the configured async send timeout.
    pub fn broadcast(self: &Arc<Self>, message: &dyn Message) -> Result<Vec<BroadcastWork>> {
        let sessions: Vec<Arc<Session>> = match self.sessions.lock() {
            Ok(sessions) => sessions.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        let broadcaster = Broadcaster::new(&self.protocol, self.pool.clone())?;
        broadcaster.broadcast(&sessions, message, self.async_send_timeout)
    }
}
