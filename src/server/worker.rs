//! Bounded-queue worker pool
//!
//! Listeners enqueue requests with a non-blocking send; a fixed bank of
//! workers drains the queue and runs the handler. DNS is lossy by design,
//! so a full queue drops the query and counts it rather than applying
//! backpressure to the socket loop.
//!
//! # Architecture
//!
//! ```text
//! UDP listener ──┐
//!                ├──► bounded queue (20 × workers) ──► worker 0..N
//! TCP listener ──┘         │ try_send, overflow drops       │
//!                          ▼                                ▼
//!                    overflow counter          handler → ReplyTarget
//! ```
//!
//! # Retry policy
//!
//! A failed handler call is retried only when the error is recoverable
//! (internal/cache faults). Deterministic rejections — parse, validation,
//! rate limit — are final: re-running them cannot change the outcome and
//! would double-count the rejection. Retries back off exponentially
//! (100 ms base, factor 2, 10 % jitter, 2 s cap) and stop at the 5-second
//! request deadline. The deadline is also checked before the reply write;
//! it is a deadline, not a hard interrupt.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::buffer::PooledBuffer;
use crate::metrics::Metrics;

use super::handler::RequestHandler;
use super::Transport;

/// Deadline for one request, from dequeue to reply write
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum handler attempts per request
pub const MAX_RETRIES: u32 = 3;

/// Queue capacity per worker
pub const QUEUE_FACTOR: usize = 20;

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(2);
const BACKOFF_FACTOR: f64 = 2.0;
const BACKOFF_JITTER: f64 = 0.1;

/// Jittered exponential backoff for the given attempt (1-based)
#[must_use]
pub fn backoff(attempt: u32) -> Duration {
    if attempt == 0 {
        return BACKOFF_BASE;
    }
    let base = BACKOFF_BASE.as_secs_f64() * BACKOFF_FACTOR.powi(attempt.saturating_sub(1) as i32);
    let jittered = base * (1.0 + BACKOFF_JITTER * rand::thread_rng().gen::<f64>());
    Duration::from_secs_f64(jittered.min(BACKOFF_MAX.as_secs_f64()))
}

/// Where a worker writes the response for a request
///
/// Listeners construct the target, so the worker never needs a reference
/// back into listener state.
#[async_trait]
pub trait ReplyTarget: Send + Sync {
    /// Write the response bytes to the originating client
    async fn send_reply(&self, response: &[u8]) -> io::Result<()>;
}

/// Replies over the shared UDP socket to the datagram's source address
pub struct UdpReply {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl UdpReply {
    /// Create a reply target for one datagram
    #[must_use]
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }
}

#[async_trait]
impl ReplyTarget for UdpReply {
    async fn send_reply(&self, response: &[u8]) -> io::Result<()> {
        self.socket.send_to(response, self.peer).await.map(|_| ())
    }
}

/// Hands the response back to the TCP connection task for framed writing
///
/// The connection owns the stream and writes the 2-byte length prefix
/// itself, which keeps responses ordered per connection.
pub struct TcpReply {
    slot: Mutex<Option<oneshot::Sender<Bytes>>>,
}

impl TcpReply {
    /// Create a reply target around the connection's reply slot
    #[must_use]
    pub fn new(tx: oneshot::Sender<Bytes>) -> Self {
        Self {
            slot: Mutex::new(Some(tx)),
        }
    }
}

#[async_trait]
impl ReplyTarget for TcpReply {
    async fn send_reply(&self, response: &[u8]) -> io::Result<()> {
        let tx = self
            .slot
            .lock()
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "reply already sent"))?;
        tx.send(Bytes::copy_from_slice(response))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection task gone"))
    }
}

/// One queued request
pub struct Request {
    /// Pooled receive buffer holding the query bytes
    pub buffer: PooledBuffer,
    /// Number of valid bytes at the front of `buffer`
    pub len: usize,
    /// Source address
    pub client: SocketAddr,
    /// Transport the query arrived on
    pub transport: Transport,
    /// Where the worker writes the response
    pub reply: Arc<dyn ReplyTarget>,
}

impl Request {
    /// The query bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.len]
    }
}

/// Worker pool statistics
#[derive(Debug, Default)]
pub struct WorkerPoolStats {
    /// Requests accepted onto the queue
    dispatched: AtomicU64,
    /// Requests dropped at a full queue
    overflow: AtomicU64,
    /// Requests whose reply was written
    completed: AtomicU64,
    /// Requests that exhausted the handler without a response
    failed: AtomicU64,
    /// Handler retries performed
    retries: AtomicU64,
    /// Requests abandoned at the deadline
    timeouts: AtomicU64,
    /// Reply writes that failed
    write_errors: AtomicU64,
}

impl WorkerPoolStats {
    /// Get accepted-request count
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Get queue-overflow count
    #[must_use]
    pub fn overflow(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Get completed count
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Get failed count
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Get retry count
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Get deadline-abandonment count
    #[must_use]
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Get reply-write failure count
    #[must_use]
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Snapshot of all counters
    #[must_use]
    pub fn snapshot(&self) -> WorkerPoolStatsSnapshot {
        WorkerPoolStatsSnapshot {
            dispatched: self.dispatched(),
            overflow: self.overflow(),
            completed: self.completed(),
            failed: self.failed(),
            retries: self.retries(),
            timeouts: self.timeouts(),
            write_errors: self.write_errors(),
        }
    }
}

/// Snapshot of worker pool statistics
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolStatsSnapshot {
    /// Requests accepted onto the queue
    pub dispatched: u64,
    /// Requests dropped at a full queue
    pub overflow: u64,
    /// Requests whose reply was written
    pub completed: u64,
    /// Requests that exhausted the handler
    pub failed: u64,
    /// Handler retries
    pub retries: u64,
    /// Deadline abandonments
    pub timeouts: u64,
    /// Reply-write failures
    pub write_errors: u64,
}

/// Fixed bank of workers draining a bounded queue
pub struct WorkerPool {
    tx: Mutex<Option<mpsc::Sender<Request>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<WorkerPoolStats>,
    metrics: Arc<Metrics>,
    capacity: usize,
}

impl WorkerPool {
    /// Spawn `worker_count` workers behind a `20 × worker_count` queue
    #[must_use]
    pub fn start(
        worker_count: usize,
        handler: Arc<RequestHandler>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let capacity = worker_count.max(1) * QUEUE_FACTOR;
        let (tx, rx) = mpsc::channel::<Request>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = Arc::new(WorkerPoolStats::default());

        let handles = (0..worker_count.max(1))
            .map(|id| {
                let rx = Arc::clone(&rx);
                let handler = Arc::clone(&handler);
                let stats = Arc::clone(&stats);
                let metrics = Arc::clone(&metrics);
                tokio::spawn(worker_loop(id, rx, handler, stats, metrics))
            })
            .collect();

        Self {
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            stats,
            metrics,
            capacity,
        }
    }

    /// Enqueue a request without blocking
    ///
    /// Returns `false` when the queue is full or the pool has shut down;
    /// the query is dropped and counted either way.
    pub fn dispatch(&self, request: Request) -> bool {
        let sender = self.tx.lock().clone();
        let Some(sender) = sender else {
            self.stats.overflow.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_dropped_query();
            return false;
        };
        match sender.try_send(request) {
            Ok(()) => {
                self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.stats.overflow.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_dropped_query();
                trace!("request queue full, query dropped");
                false
            }
        }
    }

    /// Queue capacity
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.capacity
    }

    /// Requests currently waiting in the queue
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.tx
            .lock()
            .as_ref()
            .map_or(0, |tx| self.capacity.saturating_sub(tx.capacity()))
    }

    /// Pool counters
    #[must_use]
    pub fn stats(&self) -> &WorkerPoolStats {
        &self.stats
    }

    /// Close the queue and wait for workers to drain it
    ///
    /// Already-queued requests are processed to completion (subject to
    /// their own deadlines); new dispatches fail.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task panicked");
            }
        }
        debug!("worker pool stopped");
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Request>>>,
    handler: Arc<RequestHandler>,
    stats: Arc<WorkerPoolStats>,
    metrics: Arc<Metrics>,
) {
    trace!(worker = id, "worker started");
    loop {
        let request = rx.lock().await.recv().await;
        let Some(request) = request else {
            break;
        };
        process_request(request, &handler, &stats, &metrics).await;
    }
    trace!(worker = id, "worker stopped");
}

async fn process_request(
    request: Request,
    handler: &RequestHandler,
    stats: &WorkerPoolStats,
    metrics: &Metrics,
) {
    let deadline = tokio::time::Instant::now() + REQUEST_TIMEOUT;

    let mut attempt = 1u32;
    let response = loop {
        match handler.handle(request.data(), request.client, request.transport) {
            Ok(response) => break Some(response),
            Err(e) if e.is_recoverable() && attempt < MAX_RETRIES => {
                stats.retries.fetch_add(1, Ordering::Relaxed);
                let delay = backoff(attempt);
                if tokio::time::Instant::now() + delay >= deadline {
                    stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    break None;
                }
                debug!(
                    client = %request.client,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "handler failed, backing off before retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                trace!(client = %request.client, error = %e, "request finished without response");
                stats.failed.fetch_add(1, Ordering::Relaxed);
                break None;
            }
        }
    };

    let Some(response) = response else { return };

    // Deadline check before starting the write, never mid-write.
    if tokio::time::Instant::now() >= deadline {
        stats.timeouts.fetch_add(1, Ordering::Relaxed);
        return;
    }

    match request.reply.send_reply(&response).await {
        Ok(()) => {
            stats.completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            stats.write_errors.fetch_add(1, Ordering::Relaxed);
            metrics.record_error();
            debug!(client = %request.client, error = %e, "reply write failed");
        }
    }
}
