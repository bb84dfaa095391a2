//! # Session
//!
//! One logical connection with its own buffers, protocol state, and
//! background dispatch task.
//!
//! ## Concurrency Model
//! All physical writes for a session are totally ordered through a single
//! narrow write lock, whether they originate from a synchronous [`send`]
//! call or from the dispatch task draining the async queues; partial frames
//! can never interleave. Reads are totally ordered through the read lock.
//! There is no ordering guarantee between independent sessions.
//!
//! Closing the session is the only cancellation primitive: it cancels the
//! shared close token, which the dispatch task, pending async waiters, and
//! in-flight reads and writes all observe. Pending work fails with
//! [`LinkError::SendToClosed`] rather than silently dropping.
//!
//! [`send`]: Session::send

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::buffer::{BufferPool, InBuffer, OutBuffer};
use crate::core::{BytesMessage, Message, Protocol, ProtocolSide, ProtocolState};
use crate::error::{LinkError, Result};

/// Default capacity of each async send queue.
pub const DEFAULT_SEND_QUEUE_SIZE: usize = 1;

/// Default read-buffering size for new connections.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

static DIAL_SESSION_ID: AtomicU64 = AtomicU64::new(0);

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct ReadState {
    reader: BoxReader,
    buffer: InBuffer,
}

struct FrameState {
    buffer: OutBuffer,
}

struct AsyncMessage {
    done: oneshot::Sender<Result<()>>,
    message: Box<dyn Message + Send>,
}

struct AsyncBuffer {
    done: oneshot::Sender<Result<()>>,
    buffer: Arc<OutBuffer>,
}

/// Work queued to a session's dispatch task; completion is signalled exactly
/// once, whichever path consumes the item.
trait QueueWork: Send + 'static {
    fn complete(self, res: Result<()>);
}

impl QueueWork for AsyncMessage {
    fn complete(self, res: Result<()>) {
        let _ = self.done.send(res);
    }
}

impl QueueWork for AsyncBuffer {
    fn complete(self, res: Result<()>) {
        let _ = self.done.send(res);
    }
}

/// One-shot completion handle for a queued async send.
pub struct AsyncWork {
    completion: oneshot::Receiver<Result<()>>,
}

impl AsyncWork {
    /// Wait for the queued operation to finish. Consumes the handle; the
    /// completion is delivered at most once.
    pub async fn wait(self) -> Result<()> {
        match self.completion.await {
            Ok(res) => res,
            Err(_) => Err(LinkError::SendToClosed),
        }
    }
}

/// Opaque token identifying one registered close callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

#[derive(Default)]
struct CallbackRegistry {
    next_id: u64,
    entries: Vec<(u64, Box<dyn FnOnce() + Send>)>,
}

/// A session owns one connection, one in/out buffer pair, and one protocol
/// state, created as `Arc<Session>` with a background dispatch task.
pub struct Session {
    id: u64,
    state: ProtocolState,

    read_state: Mutex<ReadState>,
    frame_state: Mutex<FrameState>,
    writer: Mutex<BoxWriter>,

    msg_tx: mpsc::Sender<AsyncMessage>,
    buf_tx: mpsc::Sender<AsyncBuffer>,

    close_token: CancellationToken,
    close_flag: AtomicBool,
    callbacks: StdMutex<CallbackRegistry>,

    created_at: SystemTime,
    last_send_ms: AtomicU64,
    last_recv_ms: AtomicU64,

    user_state: StdMutex<Option<Box<dyn Any + Send>>>,
}

impl Session {
    /// Create a session over `stream` and start its dispatch task.
    ///
    /// A nonzero `read_buffer_size` wraps the read half in a buffered
    /// reader of that capacity. The send queues hold at most
    /// `send_queue_size` pending items each.
    pub fn new<S>(
        id: u64,
        stream: S,
        protocol: &Protocol,
        side: ProtocolSide,
        pool: Arc<BufferPool>,
        send_queue_size: usize,
        read_buffer_size: usize,
    ) -> Result<Arc<Self>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let state = protocol.new_state(side)?;

        let (read_half, write_half) = tokio::io::split(stream);
        let reader: BoxReader = if read_buffer_size > 0 {
            Box::new(BufReader::with_capacity(read_buffer_size, read_half))
        } else {
            Box::new(read_half)
        };
        let writer: BoxWriter = Box::new(write_half);

        let (msg_tx, msg_rx) = mpsc::channel(send_queue_size.max(1));
        let (buf_tx, buf_rx) = mpsc::channel(send_queue_size.max(1));

        let now_ms = unix_millis(SystemTime::now());
        let session = Arc::new(Session {
            id,
            state,
            read_state: Mutex::new(ReadState {
                reader,
                buffer: InBuffer::new(pool.clone()),
            }),
            frame_state: Mutex::new(FrameState {
                buffer: OutBuffer::new(pool),
            }),
            writer: Mutex::new(writer),
            msg_tx,
            buf_tx,
            close_token: CancellationToken::new(),
            close_flag: AtomicBool::new(false),
            callbacks: StdMutex::new(CallbackRegistry::default()),
            created_at: SystemTime::now(),
            last_send_ms: AtomicU64::new(now_ms),
            last_recv_ms: AtomicU64::new(now_ms),
            user_state: StdMutex::new(None),
        });

        let this = session.clone();
        tokio::spawn(async move {
            let outcome =
                std::panic::AssertUnwindSafe(this.clone().dispatch_loop(msg_rx, buf_rx))
                    .catch_unwind()
                    .await;
            if let Err(panic) = outcome {
                error!(
                    session_id = this.id,
                    panic = panic_message(&panic),
                    "session dispatch loop panicked"
                );
                this.close();
            }
        });

        Ok(session)
    }

    /// Connect to `addr` and create a client-side session with default
    /// queue and buffer sizes over a fresh pool.
    pub async fn dial<A: ToSocketAddrs>(addr: A, protocol: &Protocol) -> Result<Arc<Self>> {
        Session::dial_with(
            addr,
            protocol,
            DEFAULT_SEND_QUEUE_SIZE,
            DEFAULT_READ_BUFFER_SIZE,
        )
        .await
    }

    /// [`dial`](Session::dial) bounded by a connect deadline. An elapsed
    /// deadline surfaces as a timed-out I/O error.
    pub async fn dial_timeout<A: ToSocketAddrs>(
        addr: A,
        protocol: &Protocol,
        timeout: Duration,
    ) -> Result<Arc<Self>> {
        match tokio::time::timeout(timeout, Session::dial(addr, protocol)).await {
            Ok(res) => res,
            Err(_) => Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            ))),
        }
    }

    /// Connect to `addr` with explicit queue and read-buffering sizes.
    pub async fn dial_with<A: ToSocketAddrs>(
        addr: A,
        protocol: &Protocol,
        send_queue_size: usize,
        read_buffer_size: usize,
    ) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr).await?;
        let id = DIAL_SESSION_ID.fetch_add(1, Ordering::Relaxed) + 1;
        Session::new(
            id,
            stream,
            protocol,
            ProtocolSide::Client,
            Arc::new(BufferPool::default()),
            send_queue_size,
            read_buffer_size,
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.close_flag.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn last_send_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.last_send_ms.load(Ordering::Relaxed))
    }

    pub fn last_recv_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.last_recv_ms.load(Ordering::Relaxed))
    }

    /// Stash opaque application state on the session.
    pub fn set_state(&self, state: Box<dyn Any + Send>) {
        if let Ok(mut slot) = self.user_state.lock() {
            *slot = Some(state);
        }
    }

    /// Take the application state back out of the session.
    pub fn take_state(&self) -> Option<Box<dyn Any + Send>> {
        self.user_state.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Close the session exactly once.
    ///
    /// Cancels the close token (unblocking the dispatch task, pending async
    /// waiters, and in-flight I/O), shuts the connection down, and invokes
    /// every registered close callback in registration order. Subsequent
    /// calls are no-ops.
    pub fn close(self: &Arc<Self>) {
        if self
            .close_flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!(session_id = self.id, "session closing");
        self.close_token.cancel();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let this = self.clone();
            handle.spawn(async move {
                use tokio::io::AsyncWriteExt;
                let mut writer = this.writer.lock().await;
                let _ = writer.shutdown().await;
            });
        }

        self.invoke_close_callbacks();
    }

    /// Register a callback to run when the session closes. Returns a token
    /// usable with [`remove_close_callback`](Session::remove_close_callback).
    /// A no-op once the session is closed.
    pub fn add_close_callback(&self, callback: impl FnOnce() + Send + 'static) -> CallbackId {
        let Ok(mut registry) = self.callbacks.lock() else {
            return CallbackId(0);
        };
        if self.is_closed() {
            return CallbackId(0);
        }
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.push((id, Box::new(callback)));
        CallbackId(id)
    }

    /// Remove a close callback by its registration token. A no-op once the
    /// session is closed.
    pub fn remove_close_callback(&self, id: CallbackId) {
        if let Ok(mut registry) = self.callbacks.lock() {
            registry.entries.retain(|(entry_id, _)| *entry_id != id.0);
        }
    }

    fn invoke_close_callbacks(&self) {
        let entries = match self.callbacks.lock() {
            Ok(mut registry) => std::mem::take(&mut registry.entries),
            Err(_) => return,
        };
        for (_, callback) in entries {
            callback();
        }
    }

    /// Sync send: frame `message` into the session's out buffer and flush
    /// it, blocking on I/O. `now` is recorded as the last-send timestamp.
    pub async fn send(self: &Arc<Self>, message: &dyn Message, now: SystemTime) -> Result<()> {
        let mut frame = self.frame_state.lock().await;

        let res = match self.state.write_to_buffer(&mut frame.buffer, message) {
            Ok(()) => self.send_out_buffer(&frame.buffer).await,
            Err(err) => Err(err),
        };

        frame.buffer.reset();
        self.last_send_ms
            .store(unix_millis(now), Ordering::Relaxed);
        res
    }

    /// Sync send of a raw byte payload.
    pub async fn send_bytes(self: &Arc<Self>, data: &[u8], now: SystemTime) -> Result<()> {
        self.send(&BytesMessage(data.to_vec()), now).await
    }

    /// Flush one pre-encoded frame through the narrow write lock.
    ///
    /// Both the sync path and the dispatch task funnel physical writes
    /// through here, so frames never interleave regardless of origin.
    async fn send_out_buffer(self: &Arc<Self>, buffer: &OutBuffer) -> Result<()> {
        let mut writer = self.writer.lock().await;
        tokio::select! {
            biased;
            _ = self.close_token.cancelled() => Err(LinkError::SendToClosed),
            res = self.state.write(&mut *writer, buffer) => res,
        }
    }

    /// Read and decode one frame, handing the populated in buffer to
    /// `decoder`.
    ///
    /// A decode failure resets the buffer, closes the session, and returns
    /// the error; a decoder failure only ends the caller's read loop.
    pub async fn process_once<F>(self: &Arc<Self>, decoder: &mut F) -> Result<()>
    where
        F: FnMut(&mut InBuffer) -> Result<()>,
    {
        let mut guard = self.read_state.lock().await;
        let ReadState { reader, buffer } = &mut *guard;

        let read_res = tokio::select! {
            biased;
            _ = self.close_token.cancelled() => Err(LinkError::SendToClosed),
            res = self.state.read(reader, buffer) => res,
        };
        if let Err(err) = read_res {
            buffer.reset();
            drop(guard);
            self.close();
            return Err(err);
        }

        let res = decoder(buffer);
        buffer.reset();
        self.last_recv_ms
            .store(unix_millis(SystemTime::now()), Ordering::Relaxed);
        res
    }

    /// Drive the session's read side, invoking `decoder` once per frame
    /// until the first failure.
    ///
    /// Expected to run on a dedicated task per session; it blocks that task
    /// for the session's lifetime.
    pub async fn process<F>(self: &Arc<Self>, mut decoder: F) -> Result<()>
    where
        F: FnMut(&mut InBuffer) -> Result<()>,
    {
        loop {
            self.process_once(&mut decoder).await?;
        }
    }

    /// Read one frame and copy its body out. Debug path; prefer
    /// [`process`](Session::process).
    pub async fn read_packet(self: &Arc<Self>) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.process_once(&mut |buffer: &mut InBuffer| {
            data = buffer.data().to_vec();
            Ok(())
        })
        .await?;
        Ok(data)
    }

    /// Queue a message for the dispatch task to encode and send.
    ///
    /// Never blocks: on a full queue with a zero timeout the session is
    /// closed and the work completes with [`LinkError::AsyncSendTimeout`];
    /// with a nonzero timeout a waiter races enqueueing against the close
    /// signal and the deadline.
    pub fn async_send<M>(self: &Arc<Self>, message: M, timeout: Duration) -> AsyncWork
    where
        M: Message + Send + 'static,
    {
        let (done, completion) = oneshot::channel();
        let work = AsyncMessage {
            done,
            message: Box::new(message),
        };
        self.enqueue(self.msg_tx.clone(), work, timeout);
        AsyncWork { completion }
    }

    /// Queue a pre-encoded frame for the dispatch task to flush. Used by
    /// the broadcaster to reuse one encoded buffer across sessions.
    pub fn async_send_buffer(self: &Arc<Self>, buffer: Arc<OutBuffer>, timeout: Duration) -> AsyncWork {
        let (done, completion) = oneshot::channel();
        let work = AsyncBuffer { done, buffer };
        self.enqueue(self.buf_tx.clone(), work, timeout);
        AsyncWork { completion }
    }

    fn enqueue<T: QueueWork>(self: &Arc<Self>, tx: mpsc::Sender<T>, work: T, timeout: Duration) {
        if self.is_closed() {
            work.complete(Err(LinkError::SendToClosed));
            return;
        }
        match tx.try_send(work) {
            Ok(()) => {}
            Err(TrySendError::Closed(work)) => work.complete(Err(LinkError::SendToClosed)),
            Err(TrySendError::Full(work)) => {
                if timeout.is_zero() {
                    self.close();
                    work.complete(Err(LinkError::AsyncSendTimeout));
                } else {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.enqueue_with_deadline(tx, work, timeout).await;
                    });
                }
            }
        }
    }

    /// Fallback waiter for a full queue: races slot reservation against the
    /// close signal and the deadline. The deadline winning closes the
    /// session.
    async fn enqueue_with_deadline<T: QueueWork>(
        self: Arc<Self>,
        tx: mpsc::Sender<T>,
        work: T,
        timeout: Duration,
    ) {
        tokio::select! {
            permit = tx.reserve() => match permit {
                Ok(permit) => permit.send(work),
                Err(_) => work.complete(Err(LinkError::SendToClosed)),
            },
            _ = self.close_token.cancelled() => {
                work.complete(Err(LinkError::SendToClosed));
            }
            _ = tokio::time::sleep(timeout) => {
                self.close();
                work.complete(Err(LinkError::AsyncSendTimeout));
            }
        }
    }

    /// Per-session dispatch task: multiplexes pre-encoded buffers, queued
    /// messages, and the close signal, with no priority among them.
    async fn dispatch_loop(
        self: Arc<Self>,
        mut msg_rx: mpsc::Receiver<AsyncMessage>,
        mut buf_rx: mpsc::Receiver<AsyncBuffer>,
    ) {
        loop {
            tokio::select! {
                Some(work) = buf_rx.recv() => {
                    let res = self.send_out_buffer(&work.buffer).await;
                    work.complete(res);
                }
                Some(work) = msg_rx.recv() => {
                    let res = self.send(&*work.message, SystemTime::now()).await;
                    work.complete(res);
                }
                _ = self.close_token.cancelled() => {
                    debug!(session_id = self.id, "dispatch loop exiting");
                    return;
                }
            }
        }
    }
}

fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
