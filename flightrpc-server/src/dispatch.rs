//! Dispatch engine: reassembly, duplicate filtering, routing and framing.

use crate::dedup::{Admission, DuplicateFilter};
use crate::error::DispatchError;
use crate::listener::DatagramHandler;
use crate::reassembly::RequestBuffer;
use crate::router::{RequestContext, Router};
use crate::server::ServerStats;
use bytes::Bytes;
use flightrpc_protocol::{frame, response_tag, Packet};
use futures::future::{BoxFuture, FutureExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Turns raw datagrams into framed replies.
pub struct Dispatcher {
    router: Router,
    buffer: Arc<RequestBuffer>,
    /// Present only under at-most-once semantics.
    filter: Option<Arc<DuplicateFilter>>,
    stats: Arc<ServerStats>,
}

impl Dispatcher {
    pub fn new(
        router: Router,
        buffer: Arc<RequestBuffer>,
        filter: Option<Arc<DuplicateFilter>>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            router,
            buffer,
            filter,
            stats,
        }
    }

    /// Routes one datagram. Returns the reply packets, or `None` when the
    /// datagram produces no reply (incomplete, duplicate, or dropped).
    ///
    /// A duplicate under at-most-once semantics is never dispatched again,
    /// but gets its cached reply back when response replay is enabled.
    pub async fn route_request(&self, peer: SocketAddr, datagram: Bytes) -> Option<Vec<Bytes>> {
        let packet = match Packet::parse(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Dropping malformed datagram from {}: {}", peer, e);
                return None;
            }
        };

        let header = packet.header;
        let request = match self.buffer.process_fragment(peer, packet) {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::debug!(
                    "[{}] Request from {} incomplete ({}/{})",
                    header.request_id,
                    peer,
                    header.index,
                    header.total
                );
                return None;
            }
            Err(e) => {
                self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "[{}] Discarding fragment from {}: {}",
                    header.request_id,
                    peer,
                    e
                );
                return None;
            }
        };

        if let Some(filter) = &self.filter {
            if let Admission::Duplicate(cached) = filter.check(request.request_id) {
                self.stats.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "[{}] Duplicate request from {} ({})",
                    request.request_id,
                    peer,
                    if cached.is_some() {
                        "replaying reply"
                    } else {
                        "dropped"
                    }
                );
                return cached;
            }
        }

        let reply_tag = match reply_tag(request.type_tag) {
            Ok(tag) => tag,
            Err(e) => {
                self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "[{}] Dropping request from {}: {}",
                    request.request_id,
                    peer,
                    e
                );
                return None;
            }
        };

        let ctx = RequestContext {
            peer,
            request_id: request.request_id,
            type_tag: request.type_tag,
        };
        let body = match self.router.dispatch(ctx, request.body).await {
            Ok(body) => body,
            Err(e) => {
                self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "[{}] Dropping request from {}: {}",
                    request.request_id,
                    peer,
                    e
                );
                return None;
            }
        };
        self.stats.requests_dispatched.fetch_add(1, Ordering::Relaxed);

        let packets = frame::frame(reply_tag, request.request_id, &body);
        if let Some(filter) = &self.filter {
            filter.record_reply(request.request_id, &packets);
        }

        tracing::debug!(
            "[{}] Replying to {} with {} packets (tag {})",
            request.request_id,
            peer,
            packets.len(),
            reply_tag
        );
        Some(packets)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn is_at_most_once(&self) -> bool {
        self.filter.is_some()
    }
}

/// Reply tag for a request tag. Tags outside the request range are rejected.
fn reply_tag(type_tag: u8) -> Result<u8, DispatchError> {
    response_tag(type_tag).ok_or(DispatchError::NotARequest(type_tag))
}

impl DatagramHandler for Dispatcher {
    fn handle(&self, peer: SocketAddr, datagram: Bytes) -> BoxFuture<'_, Option<Vec<Bytes>>> {
        self.route_request(peer, datagram).boxed()
    }
}
