//! TCP listener
//!
//! DNS over TCP frames every message with a 2-byte big-endian length.
//! Each accepted connection is served by its own task:
//!
//! ```text
//! accept ──► connection task
//!              loop:
//!                read u16 length (2 s timeout)
//!                read exactly that many bytes
//!                enqueue to the worker pool with a oneshot reply slot
//!                await the reply ──► write 2-byte length + payload
//! ```
//!
//! One request is outstanding per connection, so responses keep arrival
//! order. A message the handler rejects produces no bytes on the wire and
//! leaves the connection readable for the next framed message; only I/O
//! errors and the idle timeout close it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::buffer::BufferPool;
use crate::codec::MAX_MESSAGE_SIZE;
use crate::error::{SinkholeError, SinkholeResult};

use super::worker::{Request, TcpReply, WorkerPool, REQUEST_TIMEOUT};
use super::Transport;

/// Read timeout per framed message; idle connections are closed
pub const TCP_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest accepted framed message
///
/// RFC 1035 allows the full 16-bit range over TCP; capping lower would
/// reject modern EDNS-sized messages.
pub const MAX_TCP_MESSAGE_SIZE: usize = MAX_MESSAGE_SIZE;

/// Extra slack on top of the request deadline while awaiting the reply
const REPLY_WAIT_SLACK: Duration = Duration::from_secs(1);

/// Buffers kept ready for connection reads
const BUFFER_POOL_CAPACITY: usize = 64;

/// TCP listener statistics
#[derive(Debug, Default)]
pub struct TcpListenerStats {
    /// Connections accepted
    connections_accepted: AtomicU64,
    /// Framed messages read
    messages_received: AtomicU64,
    /// Connections closed by the idle timeout
    idle_timeouts: AtomicU64,
    /// Read failures
    read_errors: AtomicU64,
    /// Framed-response write failures
    write_errors: AtomicU64,
}

impl TcpListenerStats {
    /// Get accepted-connection count
    #[must_use]
    pub fn connections_accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    /// Get framed-message count
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Get idle-timeout count
    #[must_use]
    pub fn idle_timeouts(&self) -> u64 {
        self.idle_timeouts.load(Ordering::Relaxed)
    }

    /// Get read-error count
    #[must_use]
    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }

    /// Get write-error count
    #[must_use]
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }
}

/// TCP side of the sinkhole
pub struct TcpDnsListener {
    listener: TcpListener,
    pool: Arc<WorkerPool>,
    buffers: Arc<BufferPool>,
    stats: Arc<TcpListenerStats>,
    local_addr: SocketAddr,
}

impl TcpDnsListener {
    /// Bind the listener and wire it to the worker pool
    ///
    /// # Errors
    ///
    /// Returns a network error when the bind fails.
    pub async fn bind(addr: SocketAddr, pool: Arc<WorkerPool>) -> SinkholeResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SinkholeError::network_io(format!("failed to bind TCP {addr}"), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SinkholeError::network_io("failed to get TCP local address", e))?;

        info!(addr = %local_addr, "TCP listener bound");

        Ok(Self {
            listener,
            pool,
            buffers: Arc::new(BufferPool::new(BUFFER_POOL_CAPACITY, MAX_TCP_MESSAGE_SIZE)),
            stats: Arc::new(TcpListenerStats::default()),
            local_addr,
        })
    }

    /// The bound address (useful when bound to port 0)
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Listener statistics
    #[must_use]
    pub fn stats(&self) -> &Arc<TcpListenerStats> {
        &self.stats
    }

    /// Accept connections until the shutdown signal fires
    ///
    /// Connection tasks already running finish on their own: their next
    /// dispatch fails once the pool closes, and the idle timeout reaps
    /// silent peers.
    pub async fn run_until_shutdown(self, mut shutdown_rx: oneshot::Receiver<()>) {
        info!(addr = %self.local_addr, "TCP listener started");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                            trace!(peer = %peer, "TCP connection accepted");
                            tokio::spawn(handle_connection(
                                stream,
                                peer,
                                Arc::clone(&self.pool),
                                Arc::clone(&self.buffers),
                                Arc::clone(&self.stats),
                            ));
                        }
                        Err(e) => {
                            warn!(error = %e, "TCP accept failed");
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    debug!(addr = %self.local_addr, "TCP listener shutting down");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    pool: Arc<WorkerPool>,
    buffers: Arc<BufferPool>,
    stats: Arc<TcpListenerStats>,
) {
    loop {
        // Length prefix.
        let mut prefix = [0u8; 2];
        match timeout(TCP_READ_TIMEOUT, stream.read_exact(&mut prefix)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    stats.read_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(peer = %peer, error = %e, "TCP length read failed");
                }
                return;
            }
            Err(_) => {
                stats.idle_timeouts.fetch_add(1, Ordering::Relaxed);
                trace!(peer = %peer, "TCP connection idle, closing");
                return;
            }
        }

        let len = usize::from(u16::from_be_bytes(prefix));
        if len == 0 {
            debug!(peer = %peer, "zero-length TCP frame, closing");
            return;
        }

        // Payload.
        let mut buffer = buffers.get();
        match timeout(TCP_READ_TIMEOUT, stream.read_exact(&mut buffer[..len])).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                stats.read_errors.fetch_add(1, Ordering::Relaxed);
                debug!(peer = %peer, error = %e, "TCP payload read failed");
                return;
            }
            Err(_) => {
                stats.idle_timeouts.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        stats.messages_received.fetch_add(1, Ordering::Relaxed);

        // One outstanding request per connection keeps responses ordered.
        let (reply_tx, reply_rx) = oneshot::channel();
        let dispatched = pool.dispatch(Request {
            buffer,
            len,
            client: peer,
            transport: Transport::Tcp,
            reply: Arc::new(TcpReply::new(reply_tx)),
        });
        if !dispatched {
            continue;
        }

        match timeout(REQUEST_TIMEOUT + REPLY_WAIT_SLACK, reply_rx).await {
            Ok(Ok(response)) => {
                if let Err(e) = write_framed(&mut stream, &response).await {
                    stats.write_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(peer = %peer, error = %e, "TCP response write failed");
                    return;
                }
            }
            // Reply slot dropped: the handler rejected the message. The
            // client sees no bytes and may send the next framed message.
            Ok(Err(_)) => continue,
            // Deadline passed without a reply; stay open.
            Err(_) => continue,
        }
    }
}

async fn write_framed(stream: &mut TcpStream, response: &[u8]) -> std::io::Result<()> {
    let len = u16::try_from(response.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "response too large"))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(response).await?;
    stream.flush().await
}
