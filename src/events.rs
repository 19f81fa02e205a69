//! # Topic Event Publisher
//!
//! Publish/subscribe fan-out used for progress notifications. Topics are
//! created lazily; publishing to a topic with no subscribers is acceptable
//! and drops the event. Delivery order matches publish order within a
//! topic; no ordering guarantee exists across topics.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

/// Event that has been published to a topic
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub topic: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

/// Lazily-created per-topic broadcast channels
#[derive(Debug)]
pub struct EventPublisher {
    topics: DashMap<String, broadcast::Sender<PublishedEvent>>,
    capacity: usize,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }

    /// Publish an event to a topic. Dropped silently when nobody listens.
    pub fn publish(&self, topic: impl Into<String>, payload: Value) {
        let topic = topic.into();
        let event = PublishedEvent {
            topic: topic.clone(),
            payload,
            published_at: Utc::now(),
        };
        if let Some(sender) = self.topics.get(&topic) {
            // send() errors only when there are no receivers, which is fine
            let _ = sender.send(event);
        }
    }

    /// Subscribe to a topic, creating its channel on first use
    pub fn subscribe(&self, topic: impl Into<String>) -> broadcast::Receiver<PublishedEvent> {
        let sender = self
            .topics
            .entry(topic.into())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        sender.subscribe()
    }

    /// Number of active subscribers on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::default();
        publisher.publish("progress:unknown", json!({"percentage": 10}));
        assert_eq!(publisher.subscriber_count("progress:unknown"), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_publish_order() {
        let publisher = EventPublisher::default();
        let mut rx = publisher.subscribe("progress:job-1");

        publisher.publish("progress:job-1", json!({"percentage": 25}));
        publisher.publish("progress:job-1", json!({"percentage": 50}));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.payload["percentage"], 25);
        assert_eq!(second.payload["percentage"], 50);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let publisher = EventPublisher::default();
        let mut rx_a = publisher.subscribe("progress:a");
        let _rx_b = publisher.subscribe("progress:b");

        publisher.publish("progress:b", json!({"percentage": 99}));
        publisher.publish("progress:a", json!({"percentage": 1}));

        let event = rx_a.recv().await.unwrap();
        assert_eq!(event.payload["percentage"], 1);
    }
}
