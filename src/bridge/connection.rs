//! Guest connection management.
//!
//! Exactly one TCP connection is "current" at a time. A newly accepted
//! connection supersedes the previous one without closing it; the old read
//! loop keeps running until its peer goes away, but host-originated frames
//! only go to the current connection.
//!
//! Each connection runs a read loop that pulls whole 4096-byte frames and
//! hands them to the bridge inline, so frames from one connection are
//! handled in arrival order.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::protocol::FRAME_SIZE;

/// Writing side of one accepted guest connection.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
}

impl Connection {
    /// Generation number, increasing with every accepted connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write one complete frame.
    ///
    /// Concurrent senders are serialized so frames never interleave.
    pub async fn send(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await
    }
}

/// Holder of the current connection.
#[derive(Debug, Default)]
pub(crate) struct ConnectionSlot {
    current: Mutex<Option<Arc<Connection>>>,
    next_id: AtomicU64,
}

impl ConnectionSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Arc<Connection>>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make a new connection current, superseding any previous one.
    pub(crate) fn install(&self, writer: OwnedWriteHalf, peer: SocketAddr) -> Arc<Connection> {
        let connection = Arc::new(Connection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            peer,
            writer: tokio::sync::Mutex::new(writer),
        });

        if let Some(previous) = self.lock().replace(Arc::clone(&connection)) {
            info!(
                "Connection from {} replaced by {}",
                previous.peer(),
                connection.peer()
            );
        }
        connection
    }

    pub(crate) fn current(&self) -> Option<Arc<Connection>> {
        self.lock().clone()
    }

    /// Drop the current connection if it is still generation `id`.
    pub(crate) fn release(&self, id: u64) -> bool {
        let mut current = self.lock();
        if current.as_ref().is_some_and(|conn| conn.id() == id) {
            current.take();
            return true;
        }
        false
    }
}

/// Accept guest connections until the bridge shuts down.
///
/// Each accepted connection gets its own read loop task. Accept errors are
/// logged and do not stop the loop.
pub async fn serve(bridge: Arc<Bridge>, listener: TcpListener) {
    match listener.local_addr() {
        Ok(addr) => info!("Listening for guest connections on {}", addr),
        Err(e) => warn!("Listening for guest connections (address unknown: {})", e),
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("New connection from {}", peer);
                    tokio::spawn(run_connection(Arc::clone(&bridge), stream, peer));
                }
                Err(e) => warn!("Error on accept: {}", e),
            },
            _ = bridge.shutdown_requested() => {
                info!("Stopped accepting guest connections");
                break;
            }
        }
    }
}

/// Read loop for one guest connection.
///
/// Any read failure, including EOF before a full frame, closes the
/// connection; there is no resynchronization.
pub async fn run_connection(bridge: Arc<Bridge>, stream: TcpStream, peer: SocketAddr) {
    let (mut reader, writer) = stream.into_split();
    let connection = bridge.connections.install(writer, peer);
    let mut buf = vec![0u8; FRAME_SIZE];

    loop {
        tokio::select! {
            read = reader.read_exact(&mut buf) => match read {
                Ok(_) => bridge.handle_frame(&connection, &buf).await,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("Connection from {} closed", peer);
                    break;
                }
                Err(e) => {
                    warn!("Error on read from {}: {}", peer, e);
                    break;
                }
            },
            _ = bridge.shutdown_requested() => {
                debug!("Closing connection from {} on shutdown", peer);
                break;
            }
        }
    }

    if bridge.connections.release(connection.id()) {
        debug!("Connection from {} is no longer current", peer);
    }
    if bridge.pending.cancel_for_connection(connection.id()) {
        warn!("Abandoned pending read on lost connection from {}", peer);
    }
}
