//! UDP receive loop.
//!
//! Every datagram is handled in its own task. Whatever packets the handler
//! returns are written back to the sender; a handler that returns `None`
//! produces no reply and leaves recovery to the client's retry policy.

use crate::server::ServerStats;
use bytes::Bytes;
use flightrpc_protocol::PACKET_SIZE;
use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

/// Handles one received datagram and returns the reply packets, if any.
pub trait DatagramHandler: Send + Sync + 'static {
    fn handle(&self, peer: SocketAddr, datagram: Bytes) -> BoxFuture<'_, Option<Vec<Bytes>>>;
}

/// Owns the receive side of the server socket.
pub struct UdpListener {
    socket: Arc<UdpSocket>,
    handler: Arc<dyn DatagramHandler>,
    stats: Arc<ServerStats>,
}

impl UdpListener {
    pub fn new(
        socket: Arc<UdpSocket>,
        handler: Arc<dyn DatagramHandler>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            socket,
            handler,
            stats,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives datagrams until a shutdown signal arrives.
    ///
    /// Read errors are logged and the loop continues; only the shutdown
    /// signal ends it.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        // One spare byte so oversized datagrams are seen as oversized
        // instead of being silently truncated to a valid length.
        let mut buf = vec![0u8; PACKET_SIZE + 1];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, peer)) => {
                            self.stats.datagrams_received.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!("Received {} bytes from {}", n, peer);
                            self.spawn_handler(peer, Bytes::copy_from_slice(&buf[..n]));
                        }
                        Err(e) => {
                            self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!("Receive error: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Listener stopping");
                    break;
                }
            }
        }
    }

    fn spawn_handler(&self, peer: SocketAddr, datagram: Bytes) {
        let socket = Arc::clone(&self.socket);
        let handler = Arc::clone(&self.handler);
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler.handle(peer, datagram))
                .catch_unwind()
                .await;

            let packets = match outcome {
                Ok(Some(packets)) => packets,
                Ok(None) => return,
                Err(panic) => {
                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        "Handler panicked on datagram from {}: {}",
                        peer,
                        panic_message(panic.as_ref())
                    );
                    return;
                }
            };

            for packet in packets {
                match socket.send_to(&packet, peer).await {
                    Ok(_) => {
                        stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Failed to send reply to {}: {}", peer, e);
                    }
                }
            }
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
