//! Request reassembly buffer.
//!
//! Fragments are collected per `(sender address, request ID)` until every
//! index of the declared total has arrived. A background sweep evicts
//! requests that stay incomplete for longer than the configured timeout.

use crate::config::ReassemblyConfig;
use crate::error::ReassemblyError;
use bytes::{Bytes, BytesMut};
use flightrpc_protocol::{Packet, RequestId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Notify;

type BufferKey = (SocketAddr, RequestId);

/// A request whose fragments have all arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledRequest {
    pub peer: SocketAddr,
    pub request_id: RequestId,
    pub type_tag: u8,
    pub body: Bytes,
    /// Number of packets the request arrived in.
    pub packets: u64,
}

/// Fragments received so far for one request.
#[derive(Debug)]
struct PendingRequest {
    type_tag: u8,
    created_at: Instant,
    fragments: Vec<Option<Bytes>>,
    received: usize,
}

impl PendingRequest {
    fn new(type_tag: u8, total: u64) -> Self {
        Self {
            type_tag,
            created_at: Instant::now(),
            fragments: vec![None; total as usize],
            received: 0,
        }
    }

    fn total(&self) -> u64 {
        self.fragments.len() as u64
    }

    fn insert(&mut self, slot: usize, body: Bytes) {
        if let Some(entry) = self.fragments.get_mut(slot) {
            if entry.is_none() {
                *entry = Some(body);
                self.received += 1;
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.fragments.len()
    }

    fn into_body(self) -> Bytes {
        let len = self.fragments.iter().flatten().map(Bytes::len).sum();
        let mut body = BytesMut::with_capacity(len);
        for fragment in self.fragments.into_iter().flatten() {
            body.extend_from_slice(&fragment);
        }
        body.freeze()
    }
}

/// Shared buffer of partially received requests.
pub struct RequestBuffer {
    config: ReassemblyConfig,
    pending: RwLock<HashMap<BufferKey, PendingRequest>>,
    shutdown: AtomicBool,
    notify: Notify,
}

impl RequestBuffer {
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            config,
            pending: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Adds a fragment, returning the whole request once the last one arrives.
    ///
    /// Fragments are keyed by sender address, so a packet that reuses a
    /// request ID from another address never lands in the first sender's
    /// request. A fragment for an already filled slot is ignored.
    pub fn process_fragment(
        &self,
        peer: SocketAddr,
        packet: Packet,
    ) -> Result<Option<AssembledRequest>, ReassemblyError> {
        let header = packet.header;
        if header.total > self.config.max_packets_per_message {
            return Err(ReassemblyError::TooManyPackets {
                total: header.total,
                max: self.config.max_packets_per_message,
            });
        }

        let key = (peer, header.request_id);
        let complete = {
            let mut pending = self.pending.write();
            let entry = pending
                .entry(key)
                .or_insert_with(|| PendingRequest::new(header.type_tag, header.total));

            if entry.total() != header.total {
                return Err(ReassemblyError::TotalMismatch {
                    expected: entry.total(),
                    got: header.total,
                });
            }
            if entry.type_tag != header.type_tag {
                return Err(ReassemblyError::TagMismatch {
                    expected: entry.type_tag,
                    got: header.type_tag,
                });
            }

            entry.insert(header.slot(), packet.body);
            if entry.is_complete() {
                pending.remove(&key)
            } else {
                None
            }
        };

        Ok(complete.map(|request| AssembledRequest {
            peer,
            request_id: header.request_id,
            type_tag: request.type_tag,
            packets: request.total(),
            body: request.into_body(),
        }))
    }

    /// Removes requests older than the timeout. Returns how many were evicted.
    pub fn evict_expired(&self) -> usize {
        let timeout = self.config.timeout();
        let now = Instant::now();
        let mut pending = self.pending.write();
        let before = pending.len();

        pending.retain(|(peer, request_id), request| {
            let expired = now.duration_since(request.created_at) > timeout;
            if expired {
                tracing::info!(
                    "Evicting incomplete request {} from {} ({}/{} packets)",
                    request_id,
                    peer,
                    request.received,
                    request.total()
                );
            }
            !expired
        });

        before - pending.len()
    }

    /// Number of requests still waiting for fragments.
    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    /// Runs the eviction sweep (call from a background task).
    pub async fn run_sweeper(&self) {
        tracing::debug!(
            "Reassembly sweep started (timeout={:?}, interval={:?})",
            self.config.timeout(),
            self.config.sweep_interval()
        );

        let mut interval = tokio::time::interval(self.config.sweep_interval());
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = interval.tick() => {}
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            self.evict_expired();
        }

        tracing::debug!("Reassembly sweep stopped");
    }

    /// Signals the sweep to stop.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightrpc_protocol::frame;
    use std::sync::Arc;
    use std::time::Duration;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn id(s: &str) -> RequestId {
        RequestId::try_from(s).unwrap()
    }

    fn packets(tag: u8, request_id: RequestId, payload: &[u8], capacity: usize) -> Vec<Packet> {
        frame::frame_with_capacity(tag, request_id, payload, capacity)
            .unwrap()
            .into_iter()
            .map(|raw| Packet::parse(raw).unwrap())
            .collect()
    }

    fn buffer() -> RequestBuffer {
        RequestBuffer::new(ReassemblyConfig::default())
    }

    #[test]
    fn test_single_packet_completes() {
        let buffer = buffer();
        let mut parts = packets(3, id("aaaaaaaaa"), b"hello", 512);
        let request = buffer
            .process_fragment(peer(1), parts.remove(0))
            .unwrap()
            .unwrap();

        assert_eq!(request.type_tag, 3);
        assert_eq!(request.body, Bytes::from_static(b"hello"));
        assert_eq!(request.packets, 1);
        assert_eq!(buffer.pending_count(), 0);
    }

    #[test]
    fn test_empty_body_completes() {
        let buffer = buffer();
        let mut parts = packets(1, id("ping00001"), &[], 512);
        let request = buffer
            .process_fragment(peer(1), parts.remove(0))
            .unwrap()
            .unwrap();
        assert!(request.body.is_empty());
    }

    #[test]
    fn test_out_of_order_fragments() {
        let buffer = buffer();
        let payload: Vec<u8> = (0..40u8).collect();
        let mut parts = packets(4, id("bbbbbbbbb"), &payload, 26 + 10);
        assert_eq!(parts.len(), 4);
        parts.reverse();

        let last = parts.pop().unwrap();
        for part in parts {
            assert!(buffer.process_fragment(peer(1), part).unwrap().is_none());
        }
        assert_eq!(buffer.pending_count(), 1);

        let request = buffer.process_fragment(peer(1), last).unwrap().unwrap();
        assert_eq!(request.body.as_ref(), payload.as_slice());
        assert_eq!(request.packets, 4);
        assert_eq!(buffer.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_fragment_ignored() {
        let buffer = buffer();
        let parts = packets(4, id("ccccccccc"), b"abcdefghij", 26 + 5);
        assert_eq!(parts.len(), 2);

        assert!(buffer
            .process_fragment(peer(1), parts[0].clone())
            .unwrap()
            .is_none());
        assert!(buffer
            .process_fragment(peer(1), parts[0].clone())
            .unwrap()
            .is_none());

        let request = buffer
            .process_fragment(peer(1), parts[1].clone())
            .unwrap()
            .unwrap();
        assert_eq!(request.body, Bytes::from_static(b"abcdefghij"));
    }

    #[test]
    fn test_fragments_keyed_by_sender() {
        let buffer = buffer();
        let parts = packets(4, id("ddddddddd"), b"abcdefghij", 26 + 5);

        assert!(buffer
            .process_fragment(peer(1), parts[0].clone())
            .unwrap()
            .is_none());
        // Same ID from another address must not complete the first request.
        assert!(buffer
            .process_fragment(peer(2), parts[1].clone())
            .unwrap()
            .is_none());
        assert_eq!(buffer.pending_count(), 2);
    }

    #[test]
    fn test_total_mismatch_rejected() {
        let buffer = buffer();
        let request_id = id("eeeeeeeee");
        let two = packets(4, request_id, b"abcdefghij", 26 + 5);
        let three = packets(4, request_id, b"abcdefghijklmno", 26 + 5);

        buffer.process_fragment(peer(1), two[0].clone()).unwrap();
        let result = buffer.process_fragment(peer(1), three[2].clone());
        assert_eq!(
            result,
            Err(ReassemblyError::TotalMismatch {
                expected: 2,
                got: 3
            })
        );
    }

    #[test]
    fn test_too_many_packets_rejected() {
        let buffer = RequestBuffer::new(ReassemblyConfig {
            max_packets_per_message: 2,
            ..Default::default()
        });
        let parts = packets(4, id("fffffffff"), b"abcdefghijklmno", 26 + 5);
        let result = buffer.process_fragment(peer(1), parts[0].clone());
        assert!(matches!(
            result,
            Err(ReassemblyError::TooManyPackets { total: 3, max: 2 })
        ));
        assert_eq!(buffer.pending_count(), 0);
    }

    #[test]
    fn test_eviction() {
        let buffer = RequestBuffer::new(ReassemblyConfig {
            timeout_ms: 20,
            ..Default::default()
        });
        let parts = packets(4, id("ggggggggg"), b"abcdefghij", 26 + 5);

        buffer.process_fragment(peer(1), parts[0].clone()).unwrap();
        assert_eq!(buffer.evict_expired(), 0);

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(buffer.evict_expired(), 1);
        assert_eq!(buffer.pending_count(), 0);

        // The late fragment starts a new request that never completes.
        assert!(buffer
            .process_fragment(peer(1), parts[1].clone())
            .unwrap()
            .is_none());
        assert_eq!(buffer.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_and_stops() {
        let buffer = Arc::new(RequestBuffer::new(ReassemblyConfig {
            timeout_ms: 20,
            sweep_interval_ms: 10,
            ..Default::default()
        }));
        let parts = packets(4, id("hhhhhhhhh"), b"abcdefghij", 26 + 5);
        buffer.process_fragment(peer(1), parts[0].clone()).unwrap();

        let sweeper = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.run_sweeper().await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(buffer.pending_count(), 0);

        buffer.close();
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }
}
