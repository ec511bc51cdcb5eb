//! Notification channel trait and implementations.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{Result, ServiceError};

/// A message delivered through a [`Notifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub destination: String,
    pub message: String,
}

/// Sends human-readable notifications, e.g. email.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destination: &str, message: &str) -> Result<()>;
}

/// Notifier that only writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<()> {
        tracing::info!(destination, message, "notification sent");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail_on_send: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    /// Creates a new in-memory notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail every send.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .fail_on_send = fail;
    }

    /// Returns everything sent so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .sent
            .clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        if state.fail_on_send {
            return Err(ServiceError::Notification(format!(
                "cannot reach {destination}"
            )));
        }

        state.sent.push(Notification {
            destination: destination.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_records_notification() {
        let notifier = InMemoryNotifier::new();
        notifier.send("stock@made.com", "hello").await.unwrap();

        assert_eq!(
            notifier.sent(),
            vec![Notification {
                destination: "stock@made.com".to_string(),
                message: "hello".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_fail_on_send() {
        let notifier = InMemoryNotifier::new();
        notifier.set_fail_on_send(true);

        let result = notifier.send("stock@made.com", "hello").await;
        assert!(matches!(result, Err(ServiceError::Notification(_))));
        assert!(notifier.sent().is_empty());
    }
}
