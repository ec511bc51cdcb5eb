//! External channel consumer.
//!
//! Messages arrive as `(channel, JSON payload)` pairs on a tokio mpsc
//! channel, are turned into events and dispatched on the bus one at a time.

use std::sync::Arc;

use common::BatchReference;
use domain::Event;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, ServiceError};
use crate::messagebus::MessageBus;

/// Channel carrying purchased quantity corrections.
pub const CHANGE_BATCH_QUANTITY_CHANNEL: &str = "change_batch_quantity";

/// A raw message from an external channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub payload: serde_json::Value,
}

impl InboundMessage {
    pub fn new(channel: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChangeBatchQuantityPayload {
    batchref: BatchReference,
    qty: u32,
}

/// Turns an inbound message into the event it asks for.
pub fn to_event(message: &InboundMessage) -> Result<Event> {
    let invalid = |reason: String| ServiceError::InvalidMessage {
        channel: message.channel.clone(),
        reason,
    };

    match message.channel.as_str() {
        CHANGE_BATCH_QUANTITY_CHANNEL => {
            let payload: ChangeBatchQuantityPayload =
                serde_json::from_value(message.payload.clone())
                    .map_err(|e| invalid(e.to_string()))?;
            Ok(Event::batch_quantity_changed(payload.batchref, payload.qty))
        }
        _ => Err(invalid("unknown channel".to_string())),
    }
}

/// Counters of one consumer loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: usize,
    pub dispatched: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Dispatches inbound messages until every sender is dropped.
///
/// Malformed messages and unknown channels are logged and skipped; a
/// failed dispatch is logged and does not stop the loop.
#[tracing::instrument(skip_all)]
pub async fn run(
    bus: Arc<MessageBus>,
    mut messages: mpsc::Receiver<InboundMessage>,
) -> ConsumerStats {
    let mut stats = ConsumerStats::default();
    tracing::info!("consumer started");

    while let Some(message) = messages.recv().await {
        stats.received += 1;

        let event = match to_event(&message) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(channel = %message.channel, %error, "skipping inbound message");
                stats.skipped += 1;
                continue;
            }
        };

        match bus.dispatch(event).await {
            Ok(_) => stats.dispatched += 1,
            Err(error) => {
                tracing::warn!(channel = %message.channel, %error, "inbound message failed");
                stats.failed += 1;
            }
        }
    }

    tracing::info!(
        received = stats.received,
        dispatched = stats.dispatched,
        "consumer stopped"
    );
    stats
}
