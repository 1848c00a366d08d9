//! Duplicate request filter for at-most-once semantics.

use crate::config::DedupConfig;
use bytes::Bytes;
use flightrpc_protocol::RequestId;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Notify;

/// Outcome of checking a request ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// First time this ID is seen; it is now recorded.
    Allowed,
    /// Repeat of a known ID, with its cached reply if replay is enabled.
    Duplicate(Option<Vec<Bytes>>),
}

#[derive(Debug)]
struct SeenRequest {
    seen_at: Instant,
    reply: Option<Vec<Bytes>>,
}

/// Remembers request IDs for a retention window.
pub struct DuplicateFilter {
    config: DedupConfig,
    seen: RwLock<HashMap<RequestId, SeenRequest>>,
    shutdown: AtomicBool,
    notify: Notify,
}

impl DuplicateFilter {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            seen: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Records the ID and reports whether it was new.
    pub fn is_allowed(&self, request_id: RequestId) -> bool {
        self.check(request_id) == Admission::Allowed
    }

    /// Records the ID if unseen, otherwise returns the duplicate admission.
    pub fn check(&self, request_id: RequestId) -> Admission {
        if let Some(seen) = self.seen.read().get(&request_id) {
            return Admission::Duplicate(seen.reply.clone());
        }

        match self.seen.write().entry(request_id) {
            Entry::Occupied(entry) => Admission::Duplicate(entry.get().reply.clone()),
            Entry::Vacant(entry) => {
                entry.insert(SeenRequest {
                    seen_at: Instant::now(),
                    reply: None,
                });
                Admission::Allowed
            }
        }
    }

    /// Caches the framed reply for later duplicates. No-op unless replay is enabled.
    pub fn record_reply(&self, request_id: RequestId, packets: &[Bytes]) {
        if !self.config.replay_responses {
            return;
        }
        if let Some(seen) = self.seen.write().get_mut(&request_id) {
            seen.reply = Some(packets.to_vec());
        }
    }

    pub fn replays_responses(&self) -> bool {
        self.config.replay_responses
    }

    /// Drops IDs older than the retention window. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let retention = self.config.retention();
        let now = Instant::now();
        let mut seen = self.seen.write();
        let before = seen.len();
        seen.retain(|_, request| now.duration_since(request.seen_at) <= retention);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.read().is_empty()
    }

    /// Runs the retention sweep (call from a background task).
    pub async fn run_sweeper(&self) {
        tracing::debug!(
            "Duplicate filter sweep started (retention={:?}, interval={:?})",
            self.config.retention(),
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

            let removed = self.sweep_expired();
            tracing::info!(
                "Duplicate filter sweep removed {} request IDs ({} retained)",
                removed,
                self.len()
            );
        }

        tracing::debug!("Duplicate filter sweep stopped");
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
    use std::sync::Arc;
    use std::time::Duration;

    fn id(s: &str) -> RequestId {
        RequestId::try_from(s).unwrap()
    }

    #[test]
    fn test_first_allowed_then_duplicate() {
        let filter = DuplicateFilter::new(DedupConfig::default());
        assert!(filter.is_allowed(id("aaaaaaaaa")));
        assert!(!filter.is_allowed(id("aaaaaaaaa")));
        assert!(filter.is_allowed(id("bbbbbbbbb")));
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn test_reply_not_cached_without_replay() {
        let filter = DuplicateFilter::new(DedupConfig::default());
        assert_eq!(filter.check(id("aaaaaaaaa")), Admission::Allowed);
        filter.record_reply(id("aaaaaaaaa"), &[Bytes::from_static(b"reply")]);
        assert_eq!(filter.check(id("aaaaaaaaa")), Admission::Duplicate(None));
    }

    #[test]
    fn test_reply_replayed() {
        let filter = DuplicateFilter::new(DedupConfig {
            replay_responses: true,
            ..Default::default()
        });
        assert!(filter.replays_responses());

        assert_eq!(filter.check(id("aaaaaaaaa")), Admission::Allowed);
        // Duplicate arriving before the first reply is ready.
        assert_eq!(filter.check(id("aaaaaaaaa")), Admission::Duplicate(None));

        let reply = vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")];
        filter.record_reply(id("aaaaaaaaa"), &reply);
        assert_eq!(
            filter.check(id("aaaaaaaaa")),
            Admission::Duplicate(Some(reply))
        );
    }

    #[test]
    fn test_sweep_expired() {
        let filter = DuplicateFilter::new(DedupConfig {
            retention_secs: 0,
            ..Default::default()
        });
        assert!(filter.is_allowed(id("aaaaaaaaa")));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(filter.sweep_expired(), 1);
        assert!(filter.is_empty());
        assert!(filter.is_allowed(id("aaaaaaaaa")));
    }

    #[test]
    fn test_sweep_keeps_recent() {
        let filter = DuplicateFilter::new(DedupConfig::default());
        assert!(filter.is_allowed(id("aaaaaaaaa")));
        assert_eq!(filter.sweep_expired(), 0);
        assert!(!filter.is_allowed(id("aaaaaaaaa")));
    }

    #[test]
    fn test_concurrent_checks_admit_once() {
        let filter = Arc::new(DuplicateFilter::new(DedupConfig::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let filter = filter.clone();
                std::thread::spawn(move || filter.is_allowed(id("racerace0")))
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(allowed, 1);
    }

    #[tokio::test]
    async fn test_close_stops_sweeper() {
        let filter = Arc::new(DuplicateFilter::new(DedupConfig::default()));
        let sweeper = {
            let filter = filter.clone();
            tokio::spawn(async move { filter.run_sweeper().await })
        };

        filter.close();
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }
}
