//! UDP listener
//!
//! Reads datagrams into pooled 4 KiB buffers and hands them to the worker
//! pool. The pool replies through the same socket via [`UdpReply`], so the
//! listener loop never blocks on a response.
//!
//! Shutdown: the run loop selects on a oneshot signal and returns; the
//! socket closes when the listener drops.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::buffer::BufferPool;
use crate::error::{SinkholeError, SinkholeResult};

use super::worker::{Request, UdpReply, WorkerPool};
use super::Transport;

/// Receive buffer size for one datagram
pub const UDP_BUFFER_SIZE: usize = 4096;

/// Buffers kept ready in the listener's pool
const BUFFER_POOL_CAPACITY: usize = 256;

/// UDP listener statistics
#[derive(Debug, Default)]
pub struct UdpListenerStats {
    /// Datagrams received
    packets_received: AtomicU64,
    /// Bytes received
    bytes_received: AtomicU64,
    /// Socket receive errors
    recv_errors: AtomicU64,
}

impl UdpListenerStats {
    /// Get received-datagram count
    #[must_use]
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Get received-byte count
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Get receive-error count
    #[must_use]
    pub fn recv_errors(&self) -> u64 {
        self.recv_errors.load(Ordering::Relaxed)
    }
}

/// UDP side of the sinkhole
pub struct UdpListener {
    socket: Arc<UdpSocket>,
    pool: Arc<WorkerPool>,
    buffers: Arc<BufferPool>,
    stats: Arc<UdpListenerStats>,
    local_addr: SocketAddr,
}

impl UdpListener {
    /// Bind the socket and wire it to the worker pool
    ///
    /// # Errors
    ///
    /// Returns a network error when the bind fails.
    pub async fn bind(addr: SocketAddr, pool: Arc<WorkerPool>) -> SinkholeResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| SinkholeError::network_io(format!("failed to bind UDP {addr}"), e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| SinkholeError::network_io("failed to get UDP local address", e))?;

        info!(addr = %local_addr, "UDP listener bound");

        Ok(Self {
            socket: Arc::new(socket),
            pool,
            buffers: Arc::new(BufferPool::new(BUFFER_POOL_CAPACITY, UDP_BUFFER_SIZE)),
            stats: Arc::new(UdpListenerStats::default()),
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
    pub fn stats(&self) -> &Arc<UdpListenerStats> {
        &self.stats
    }

    /// Receive datagrams until the shutdown signal fires
    pub async fn run_until_shutdown(self, mut shutdown_rx: oneshot::Receiver<()>) {
        info!(addr = %self.local_addr, "UDP listener started");
        loop {
            let mut buffer = self.buffers.get();
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => {
                    match received {
                        Ok((len, peer)) => {
                            self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
                            self.stats.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
                            trace!(peer = %peer, len, "received datagram");
                            self.dispatch(buffer, len, peer);
                        }
                        Err(e) => {
                            self.stats.recv_errors.fetch_add(1, Ordering::Relaxed);
                            warn!(error = %e, "UDP receive failed");
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    debug!(addr = %self.local_addr, "UDP listener shutting down");
                    break;
                }
            }
        }
    }

    fn dispatch(&self, buffer: crate::buffer::PooledBuffer, len: usize, peer: SocketAddr) {
        if len == 0 {
            return;
        }
        let reply = Arc::new(UdpReply::new(Arc::clone(&self.socket), peer));
        // A full queue drops the datagram; the pool counts the overflow.
        let _ = self.pool.dispatch(Request {
            buffer,
            len,
            client: peer,
            transport: Transport::Udp,
            reply,
        });
    }
}
