//! UDP client.

use crate::error::ClientError;
use bytes::Bytes;
use flightrpc_protocol::{
    codec, frame, response_tag, MessageKind, Packet, RequestId, ResponseEnvelope, Wire,
    PACKET_SIZE,
};
use std::collections::VecDeque;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Largest reply the client will reassemble, in packets.
const MAX_REPLY_PACKETS: u64 = 4096;

/// Callbacks held for `next_callback`. The oldest is dropped when full.
pub const MAX_QUEUED_CALLBACKS: usize = 256;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address.
    pub server_addr: SocketAddr,
    /// How long to wait for a complete reply before resending.
    pub timeout: Duration,
    /// Resends after the first attempt.
    pub retries: u32,
    /// Largest datagram sent, header included.
    pub packet_capacity: usize,
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            timeout: Duration::from_secs(1),
            retries: 3,
            packet_capacity: PACKET_SIZE,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_packet_capacity(mut self, capacity: usize) -> Self {
        self.packet_capacity = capacity;
        self
    }
}

/// A callback pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Callback<T> {
    pub type_tag: u8,
    pub request_id: RequestId,
    pub envelope: ResponseEnvelope<T>,
}

/// Receive state shared by calls and callback reads.
struct Inbox {
    buf: Vec<u8>,
    /// Callback packets that arrived while a call was waiting for its reply.
    callbacks: VecDeque<Packet>,
}

impl Inbox {
    fn new() -> Self {
        Self {
            buf: vec![0u8; PACKET_SIZE + 1],
            callbacks: VecDeque::new(),
        }
    }

    fn queue_callback(&mut self, packet: Packet) {
        if self.callbacks.len() >= MAX_QUEUED_CALLBACKS {
            if let Some(dropped) = self.callbacks.pop_front() {
                tracing::debug!(
                    "[{}] Callback queue full, dropping oldest callback (tag {})",
                    dropped.header.request_id,
                    dropped.header.type_tag
                );
            }
        }
        self.callbacks.push_back(packet);
    }
}

/// Request/reply client with retries.
///
/// Calls are serialized: one call owns the socket's receive side until its
/// reply is complete or every attempt has timed out.
pub struct Client {
    config: ClientConfig,
    socket: UdpSocket,
    inbox: Mutex<Inbox>,
}

impl Client {
    /// Binds an ephemeral local socket for talking to the server.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let local: SocketAddr = if config.server_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        tracing::debug!(
            "Client bound to {} for {}",
            socket.local_addr()?,
            config.server_addr
        );

        Ok(Self {
            config,
            socket,
            inbox: Mutex::new(Inbox::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends a request under a fresh request ID and waits for the reply.
    pub async fn call<Req: Wire, Resp: Wire>(
        &self,
        type_tag: u8,
        request: &Req,
    ) -> Result<ResponseEnvelope<Resp>, ClientError> {
        self.call_with_id(type_tag, RequestId::generate(), request)
            .await
    }

    /// Sends a request under a caller-chosen request ID.
    ///
    /// Every retry reuses the ID, so the server can recognise it as a
    /// duplicate under at-most-once semantics.
    pub async fn call_with_id<Req: Wire, Resp: Wire>(
        &self,
        type_tag: u8,
        request_id: RequestId,
        request: &Req,
    ) -> Result<ResponseEnvelope<Resp>, ClientError> {
        let reply_tag = response_tag(type_tag).ok_or(ClientError::NotARequest(type_tag))?;
        let body = codec::encode(request)?;
        let packets =
            frame::frame_with_capacity(type_tag, request_id, &body, self.config.packet_capacity)?;

        let mut inbox = self.inbox.lock().await;
        let attempts = self.config.retries + 1;

        for attempt in 1..=attempts {
            for packet in &packets {
                self.socket.send_to(packet, self.config.server_addr).await?;
            }

            let reply = tokio::time::timeout(
                self.config.timeout,
                self.recv_reply(&mut inbox, request_id, reply_tag),
            )
            .await;

            match reply {
                Ok(payload) => return Ok(codec::decode(&payload?)?),
                Err(_) => tracing::debug!(
                    "[{}] No reply to attempt {}/{}",
                    request_id,
                    attempt,
                    attempts
                ),
            }
        }

        Err(ClientError::Timeout { attempts })
    }

    /// Waits up to `wait` for the next callback. Returns `None` on timeout.
    pub async fn next_callback<T: Wire>(
        &self,
        wait: Duration,
    ) -> Result<Option<Callback<T>>, ClientError> {
        let mut inbox = self.inbox.lock().await;
        if let Some(packet) = inbox.callbacks.pop_front() {
            return decode_callback(packet).map(Some);
        }

        let deadline = Instant::now() + wait;
        loop {
            let Inbox { buf, .. } = &mut *inbox;
            let received = tokio::time::timeout_at(deadline, self.socket.recv_from(buf)).await;
            let (n, from) = match received {
                Ok(result) => result?,
                Err(_) => return Ok(None),
            };

            match Packet::parse(Bytes::copy_from_slice(&buf[..n])) {
                Ok(packet) if MessageKind::of(packet.header.type_tag) == MessageKind::Callback => {
                    return decode_callback(packet).map(Some);
                }
                Ok(packet) => tracing::debug!(
                    "[{}] Ignoring stale reply from {}",
                    packet.header.request_id,
                    from
                ),
                Err(e) => tracing::debug!("Ignoring malformed datagram from {}: {}", from, e),
            }
        }
    }

    async fn recv_reply(
        &self,
        inbox: &mut Inbox,
        request_id: RequestId,
        reply_tag: u8,
    ) -> Result<Bytes, ClientError> {
        let mut fragments: Vec<Option<Bytes>> = Vec::new();
        let mut received = 0;

        loop {
            let (n, from) = self.socket.recv_from(&mut inbox.buf).await?;
            let packet = match Packet::parse(Bytes::copy_from_slice(&inbox.buf[..n])) {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::debug!("Ignoring malformed datagram from {}: {}", from, e);
                    continue;
                }
            };
            let header = packet.header;

            if MessageKind::of(header.type_tag) == MessageKind::Callback {
                inbox.queue_callback(packet);
                continue;
            }
            if header.request_id != request_id {
                tracing::debug!("[{}] Ignoring stale reply from {}", header.request_id, from);
                continue;
            }
            if header.type_tag != reply_tag {
                return Err(ClientError::UnexpectedTag {
                    expected: reply_tag,
                    got: header.type_tag,
                });
            }
            if header.total > MAX_REPLY_PACKETS {
                tracing::debug!("[{}] Reply declares {} packets", request_id, header.total);
                continue;
            }

            if fragments.is_empty() {
                fragments = vec![None; header.total as usize];
            } else if fragments.len() as u64 != header.total {
                continue;
            }

            let slot = &mut fragments[header.slot()];
            if slot.is_none() {
                *slot = Some(packet.body);
                received += 1;
            }

            if received == fragments.len() {
                let mut body = Vec::new();
                for fragment in fragments.into_iter().flatten() {
                    body.extend_from_slice(&fragment);
                }
                return Ok(Bytes::from(body));
            }
        }
    }
}

fn decode_callback<T: Wire>(packet: Packet) -> Result<Callback<T>, ClientError> {
    Ok(Callback {
        type_tag: packet.header.type_tag,
        request_id: packet.header.request_id,
        envelope: codec::decode(&packet.body)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightrpc_protocol::{wire_record, StatusCode};

    #[derive(Debug, Clone, PartialEq)]
    struct Text {
        value: String,
    }
    wire_record!(Text { value });

    /// Echo server that ignores the first `drop_first` datagrams.
    async fn echo_server(drop_first: usize) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let mut seen = 0;
            let mut pending: Vec<Packet> = Vec::new();
            loop {
                let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
                seen += 1;
                if seen <= drop_first {
                    continue;
                }
                let packet = Packet::parse(Bytes::copy_from_slice(&buf[..n])).unwrap();
                let header = packet.header;
                pending.push(packet);
                if (pending.len() as u64) < header.total {
                    continue;
                }

                pending.sort_by_key(|p| p.header.index);
                let body: Vec<u8> = pending.iter().flat_map(|p| p.body.to_vec()).collect();
                pending.clear();
                let text: Text = codec::decode(&body).unwrap();

                // Push a callback ahead of the reply.
                let callback =
                    codec::encode(&ResponseEnvelope::ok(Text { value: "push".into() })).unwrap();
                for raw in frame::frame(201, RequestId::generate(), &callback) {
                    socket.send_to(&raw, peer).await.unwrap();
                }

                let reply = codec::encode(&ResponseEnvelope::ok(text)).unwrap();
                let mut packets = frame::frame(header.type_tag + 100, header.request_id, &reply);
                packets.reverse();
                for raw in packets {
                    socket.send_to(&raw, peer).await.unwrap();
                }
            }
        });

        addr
    }

    fn config(addr: SocketAddr) -> ClientConfig {
        ClientConfig::new(addr)
            .with_timeout(Duration::from_millis(200))
            .with_retries(2)
    }

    #[tokio::test]
    async fn test_call_multi_packet_reply() {
        let addr = echo_server(0).await;
        let client = Client::connect(config(addr)).await.unwrap();

        let value = "y".repeat(2000);
        let reply: ResponseEnvelope<Text> = client
            .call(
                3,
                &Text {
                    value: value.clone(),
                },
            )
            .await
            .unwrap();
        assert_eq!(reply.status, StatusCode::Success);
        assert_eq!(reply.data.unwrap().value, value);

        let callback: Callback<Text> = client
            .next_callback(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(callback.type_tag, 201);
        assert_eq!(callback.envelope.data.unwrap().value, "push");
    }

    #[tokio::test]
    async fn test_call_retries_after_timeout() {
        let addr = echo_server(1).await;
        let client = Client::connect(config(addr)).await.unwrap();

        let reply: ResponseEnvelope<Text> = client
            .call(
                1,
                &Text {
                    value: "again".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(reply.data.unwrap().value, "again");
    }

    #[tokio::test]
    async fn test_call_gives_up() {
        // Bound but silent.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = Client::connect(
            ClientConfig::new(silent.local_addr().unwrap())
                .with_timeout(Duration::from_millis(50))
                .with_retries(1),
        )
        .await
        .unwrap();

        let result: Result<ResponseEnvelope<Text>, _> =
            client.call(1, &Text { value: "x".into() }).await;
        assert!(matches!(result, Err(ClientError::Timeout { attempts: 2 })));
    }

    #[tokio::test]
    async fn test_rejects_non_request_tag() {
        let addr = echo_server(0).await;
        let client = Client::connect(config(addr)).await.unwrap();
        let result: Result<ResponseEnvelope<Text>, _> =
            client.call(150, &Text { value: "x".into() }).await;
        assert!(matches!(result, Err(ClientError::NotARequest(150))));
    }

    #[test]
    fn test_callback_queue_drops_oldest() {
        let mut inbox = Inbox::new();
        let total = MAX_QUEUED_CALLBACKS + 3;
        for seq in 0..total {
            let id = RequestId::try_from(format!("cb{:07}", seq).as_str()).unwrap();
            let raw = frame::frame(201, id, &[1]).pop().unwrap();
            inbox.queue_callback(Packet::parse(raw).unwrap());
        }

        assert_eq!(inbox.callbacks.len(), MAX_QUEUED_CALLBACKS);
        let oldest = inbox.callbacks.front().unwrap().header.request_id;
        assert_eq!(oldest, RequestId::try_from("cb0000003").unwrap());
        let newest = inbox.callbacks.back().unwrap().header.request_id;
        assert_eq!(
            newest,
            RequestId::try_from(format!("cb{:07}", total - 1).as_str()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_next_callback_times_out() {
        let addr = echo_server(0).await;
        let client = Client::connect(config(addr)).await.unwrap();
        let callback: Option<Callback<Text>> = client
            .next_callback(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(callback.is_none());
    }
}
