//! Outbound integration messages.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{Result, ServiceError};

/// A message handed to a [`Publisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Publishes structured payloads to named external topics.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()>;
}

/// Publisher that writes every message to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl Publisher for LoggingPublisher {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        tracing::info!(topic, %payload, "message published");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryPublisherState {
    published: Vec<PublishedMessage>,
    fail_on_publish: bool,
}

/// In-memory publisher for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher {
    state: Arc<RwLock<InMemoryPublisherState>>,
}

impl InMemoryPublisher {
    /// Creates a new in-memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the publisher to fail every publish.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .fail_on_publish = fail;
    }

    /// Returns everything published so far, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .published
            .clone()
    }

    /// Returns the payloads published on one topic.
    pub fn payloads(&self, topic: &str) -> Vec<serde_json::Value> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload)
            .collect()
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        if state.fail_on_publish {
            return Err(ServiceError::Publish(format!("topic {topic} unavailable")));
        }

        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}
