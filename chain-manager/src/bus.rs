//! Notification Bus: publish/subscribe fan-out of chain events.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{ChainStatus, SnapshotDetails};

/// Topic identifier: either a specific chain's topic or the `api`
/// fan-in-across-all-chains topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Chain(String),
    Api,
}

impl Topic {
    fn key(&self) -> String {
        match self {
            Topic::Chain(id) => format!("chain:{}", id),
            Topic::Api => "api".to_string(),
        }
    }
}

/// Payload carried by every event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    Started {
        id: String,
        accounts: Vec<crate::types::Account>,
        coinbase: Option<String>,
        rpc_url: String,
        ws_url: String,
    },
    Stopped {
        id: String,
    },
    Error {
        id: String,
        message: String,
    },
    SnapshotTaken {
        id: String,
        details: SnapshotDetails,
    },
    SnapshotReverted {
        id: String,
        details: SnapshotDetails,
    },
    StatusChanged {
        id: String,
        status: ChainStatus,
    },
    /// Synthesized by a subscriber's own receive loop when
    /// `broadcast::error::RecvError::Lagged` is observed; never produced
    /// by `publish` directly.
    Lag {
        id: String,
        skipped: u64,
    },
}

impl ChainEvent {
    pub fn chain_id(&self) -> &str {
        match self {
            ChainEvent::Started { id, .. }
            | ChainEvent::Stopped { id }
            | ChainEvent::Error { id, .. }
            | ChainEvent::SnapshotTaken { id, .. }
            | ChainEvent::SnapshotReverted { id, .. }
            | ChainEvent::StatusChanged { id, .. }
            | ChainEvent::Lag { id, .. } => id,
        }
    }
}

const SUBSCRIBER_BUFFER: usize = 1024;

/// Per-topic fan-out. Each topic owns a `broadcast` channel; a slow
/// subscriber never blocks the publisher because `broadcast` drops the
/// oldest buffered value on overflow and reports exactly one `Lagged`
/// error to that subscriber on its next `recv()`, which this bus
/// surfaces to callers as a `ChainEvent::Lag` marker, matching
/// `spec.md` §4.8 without hand-rolled eviction bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct NotificationBus {
    topics: Arc<DashMap<String, broadcast::Sender<ChainEvent>>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, topic: &Topic) -> broadcast::Sender<ChainEvent> {
        self.topics
            .entry(topic.key())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_BUFFER).0)
            .clone()
    }

    /// Publishes an event to the given topic. A topic with no current
    /// subscribers silently drops the event (best-effort, at-most-once
    /// delivery per `spec.md` §4.8).
    pub fn publish(&self, topic: Topic, event: ChainEvent) {
        let _ = self.sender_for(&topic).send(event);
    }

    /// Publishes to both the chain's own topic and the `api` fan-in
    /// topic, preserving per-topic publication order.
    pub fn publish_chain_event(&self, id: &str, event: ChainEvent) {
        self.publish(Topic::Chain(id.to_string()), event.clone());
        self.publish(Topic::Api, event);
    }

    /// Subscribes to a topic. Returns a `Subscription` that yields
    /// `ChainEvent::Lag` transparently when the subscriber falls behind.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        Subscription {
            topic_key: topic.key(),
            inner: self.sender_for(&topic).subscribe(),
        }
    }
}

/// A single subscriber's receive side. `unsubscribe` is implicit and
/// idempotent: dropping the `Subscription` (or the whole value) detaches
/// it from the topic.
#[derive(Debug)]
pub struct Subscription {
    topic_key: String,
    inner: broadcast::Receiver<ChainEvent>,
}

impl Subscription {
    /// Awaits the next event, translating a lag into a synthetic
    /// `ChainEvent::Lag` rather than an error the caller must special-case.
    pub async fn recv(&mut self) -> Option<ChainEvent> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Some(ChainEvent::Lag {
                        id: self.topic_key.clone(),
                        skipped,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
