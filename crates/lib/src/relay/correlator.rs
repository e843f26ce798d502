//! Sender correlation for relayed requests.
//!
//! Every relayed request gets a correlation id mapped to its sender; the personality
//! server echoes the id on its response. Responses from peers that do not echo ids are
//! attributed to the most recently recorded sender.
//!
//! Requests dropped by a busy personality never get a response, so ids are kept for at most
//! the next `capacity` requests and then forgotten.

use crate::channels::InboundMessage;
use crate::relay::transport::Publisher;
use crate::relay::wire::RelayPayload;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default number of correlation ids remembered.
pub const DEFAULT_PENDING_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Pending {
    by_id: HashMap<String, String>,
    order: VecDeque<String>,
    latest: Option<String>,
}

/// Senders awaiting a reply: a map keyed by correlation id plus the latest-sender slot.
#[derive(Debug)]
pub struct PendingSenders {
    inner: Mutex<Pending>,
    capacity: usize,
}

impl Default for PendingSenders {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_PENDING_CAPACITY)
    }
}

impl PendingSenders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember at most `capacity` ids (at least one); the oldest are evicted first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Pending::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `sender` as awaiting a reply; returns the correlation id for the request.
    pub fn record(&self, sender: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut g = self.lock();
        while g.order.len() >= self.capacity {
            let Some(oldest) = g.order.pop_front() else {
                break;
            };
            if let Some(sender) = g.by_id.remove(&oldest) {
                log::debug!("forgetting unanswered request {} from {}", oldest, sender);
            }
        }
        g.by_id.insert(id.clone(), sender.to_string());
        g.order.push_back(id.clone());
        g.latest = Some(sender.to_string());
        id
    }

    /// Resolve the recipient of a response.
    ///
    /// A known id resolves (and forgets) its sender. An unknown id resolves to None: it was
    /// already answered or never ours. Without an id, the latest recorded sender is used.
    pub fn resolve(&self, id: Option<&str>) -> Option<String> {
        let mut g = self.lock();
        match id {
            Some(id) => g.by_id.remove(id),
            None => g.latest.clone(),
        }
    }

    /// Latest recorded sender, if any.
    pub fn latest(&self) -> Option<String> {
        self.lock().latest.clone()
    }

    /// Number of requests still awaiting a response with their id.
    pub fn outstanding(&self) -> usize {
        self.lock().by_id.len()
    }
}

/// Records senders and publishes their message bodies to the request topic.
pub struct Correlator {
    pending: Arc<PendingSenders>,
    publisher: Arc<dyn Publisher>,
    request_topic: String,
    grace_period: Duration,
}

impl Correlator {
    pub fn new(
        pending: Arc<PendingSenders>,
        publisher: Arc<dyn Publisher>,
        request_topic: impl Into<String>,
        grace_period: Duration,
    ) -> Self {
        Self {
            pending,
            publisher,
            request_topic: request_topic.into(),
            grace_period,
        }
    }

    /// Relay one inbound message: record its sender, publish the body, then pause for the
    /// grace period. Returns the correlation id, or None when the publish failed.
    pub async fn relay(&self, msg: &InboundMessage) -> Option<String> {
        log::info!("signal message received from {}: '{}'", msg.sender, msg.body);
        let id = self.pending.record(&msg.sender);
        let payload = RelayPayload::new(Some(id.clone()), msg.body.as_str()).encode();
        let published = match self.publisher.publish(&self.request_topic, payload).await {
            Ok(()) => {
                log::info!("published request {} to {}", id, self.request_topic);
                Some(id)
            }
            Err(e) => {
                log::warn!("publish to {} failed: {}", self.request_topic, e);
                self.pending.resolve(Some(&id));
                None
            }
        };
        if !self.grace_period.is_zero() {
            tokio::time::sleep(self.grace_period).await;
        }
        published
    }

    /// Relay a batch in order.
    pub async fn relay_all(&self, batch: &[InboundMessage]) -> usize {
        let mut relayed = 0;
        for msg in batch {
            if self.relay(msg).await.is_some() {
                relayed += 1;
            }
        }
        relayed
    }
}
