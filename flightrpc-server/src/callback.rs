//! Subscription registry and callback fan-out.
//!
//! Subscribers register an address against a topic key for a limited time.
//! `notify` frames one callback packet and sends the identical bytes to
//! every live subscriber through a bounded pool of concurrent sends.

use crate::config::CallbackConfig;
use crate::error::CallbackError;
use crate::router::empty_success;
use bytes::Bytes;
use dashmap::DashMap;
use flightrpc_protocol::{
    codec, Packet, PacketHeader, RequestId, ResponseEnvelope, Wire, MAX_BODY_SIZE,
};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

/// Delivers one callback datagram to one subscriber.
pub trait CallbackSender: Send + Sync {
    fn send(&self, addr: SocketAddr, datagram: Bytes) -> BoxFuture<'_, std::io::Result<()>>;
}

/// Sends each callback from its own ephemeral UDP socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpCallbackSender;

impl CallbackSender for UdpCallbackSender {
    fn send(&self, addr: SocketAddr, datagram: Bytes) -> BoxFuture<'_, std::io::Result<()>> {
        async move {
            let local: SocketAddr = if addr.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (Ipv6Addr::UNSPECIFIED, 0).into()
            };
            let socket = UdpSocket::bind(local).await?;
            socket.send_to(&datagram, addr).await?;
            Ok(())
        }
        .boxed()
    }
}

/// Longest accepted subscription.
pub const MAX_SUBSCRIPTION_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Subscriber addresses per topic, each with its expiry deadline.
type Topics<K> = DashMap<K, HashMap<SocketAddr, Instant>>;

/// Registry of time-limited subscriptions keyed by topic.
pub struct SubscriptionRegistry<K> {
    topics: Arc<Topics<K>>,
    sender: Arc<dyn CallbackSender>,
    max_concurrent_sends: usize,
}

impl<K> Clone for SubscriptionRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            topics: Arc::clone(&self.topics),
            sender: Arc::clone(&self.sender),
            max_concurrent_sends: self.max_concurrent_sends,
        }
    }
}

impl<K> SubscriptionRegistry<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Creates a registry that delivers over UDP.
    pub fn new(config: &CallbackConfig) -> Self {
        Self::with_sender(config, Arc::new(UdpCallbackSender))
    }

    /// Creates a registry with a custom delivery mechanism.
    pub fn with_sender(config: &CallbackConfig, sender: Arc<dyn CallbackSender>) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            sender,
            max_concurrent_sends: config.max_concurrent_sends.max(1),
        }
    }

    /// Subscribes `addr` to `key` for `duration`.
    ///
    /// Subscribing again refreshes the deadline. Each subscription gets its
    /// own expiry task; a task whose deadline was refreshed leaves the entry
    /// alone. Durations above [`MAX_SUBSCRIPTION_DURATION`] are rejected and
    /// leave the registry unchanged. Must be called from within a Tokio
    /// runtime.
    pub fn subscribe(
        &self,
        addr: SocketAddr,
        key: K,
        duration: Duration,
    ) -> Result<(), CallbackError> {
        let deadline = Some(duration)
            .filter(|d| *d <= MAX_SUBSCRIPTION_DURATION)
            .and_then(|d| Instant::now().checked_add(d))
            .ok_or(CallbackError::DurationOutOfRange(duration))?;
        self.topics
            .entry(key.clone())
            .or_default()
            .insert(addr, deadline);

        tracing::info!(
            "Subscribed {} to {:?} for {:?}",
            addr,
            key,
            duration
        );

        let topics = Arc::clone(&self.topics);
        tokio::spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
            expire(&topics, &key, addr);
        });
        Ok(())
    }

    /// Removes a subscription early. Returns whether it existed.
    pub fn unsubscribe(&self, addr: SocketAddr, key: &K) -> bool {
        let removed = self
            .topics
            .get_mut(key)
            .map(|mut members| members.remove(&addr).is_some())
            .unwrap_or(false);
        self.topics.remove_if(key, |_, members| members.is_empty());
        removed
    }

    /// Live subscribers of a topic.
    pub fn subscribers(&self, key: &K) -> Vec<SocketAddr> {
        let now = Instant::now();
        self.topics
            .get(key)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, deadline)| **deadline > now)
                    .map(|(addr, _)| *addr)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of topics with at least one subscription entry.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Pushes `payload` to every live subscriber of `key`.
    ///
    /// Returns how many subscribers were sent the callback. Sends that fail
    /// do not stop the others; the first failure observed is returned after
    /// every send has been attempted. A topic with no live subscribers is
    /// a no-op.
    pub async fn notify<T: Wire>(
        &self,
        key: &K,
        callback_tag: u8,
        payload: T,
    ) -> Result<usize, CallbackError> {
        let members = self.subscribers(key);
        if members.is_empty() {
            tracing::debug!("No subscribers for {:?}", key);
            return Ok(0);
        }

        let datagram = callback_datagram(callback_tag, payload)?;

        let results: Vec<(SocketAddr, std::io::Result<()>)> = stream::iter(members)
            .map(|addr| {
                let datagram = datagram.clone();
                let sender = &self.sender;
                async move { (addr, sender.send(addr, datagram).await) }
            })
            .buffer_unordered(self.max_concurrent_sends)
            .collect()
            .await;

        let mut delivered = 0;
        let mut first_error = None;
        for (addr, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!("Failed to deliver callback for {:?} to {}: {}", key, addr, e);
                    if first_error.is_none() {
                        first_error = Some(CallbackError::Delivery { addr, source: e });
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::debug!("Delivered callback for {:?} to {} subscribers", key, delivered);
                Ok(delivered)
            }
        }
    }
}

fn expire<K>(topics: &Topics<K>, key: &K, addr: SocketAddr)
where
    K: Eq + Hash + fmt::Debug,
{
    let now = Instant::now();
    if let Some(mut members) = topics.get_mut(key) {
        if members.get(&addr).is_some_and(|deadline| *deadline <= now) {
            members.remove(&addr);
            tracing::info!("Subscription of {} to {:?} expired", addr, key);
        }
    }
    topics.remove_if(key, |_, members| members.is_empty());
}

/// Frames a callback payload into a single packet with a fresh request ID.
fn callback_datagram<T: Wire>(callback_tag: u8, payload: T) -> Result<Bytes, CallbackError> {
    let request_id = RequestId::generate();
    let body = match codec::encode(&ResponseEnvelope::ok(payload)) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(
                "[{}] Failed to encode callback for tag {}, sending empty success: {}",
                request_id,
                callback_tag,
                e
            );
            empty_success()
        }
    };

    if body.len() > MAX_BODY_SIZE {
        return Err(CallbackError::PayloadTooLarge { size: body.len() });
    }

    let packet = Packet {
        header: PacketHeader {
            type_tag: callback_tag,
            request_id,
            index: 1,
            total: 1,
        },
        body,
    };
    Ok(packet.encode())
}
