//! Core aggregate and domain event traits.

use std::hash::Hash;

use common::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and named in past tense (requests excepted).
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// Used for logging, metrics labels and failure reports.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregates whose changes are harvested by a unit of work.
///
/// An aggregate is the consistency boundary: every mutation of its inner
/// entities goes through it. While a command runs the aggregate records
/// events in an internal buffer; the unit of work drains that buffer once the
/// scope ends.
pub trait Aggregate: Send + Sync {
    /// Identity key the repository looks the aggregate up by.
    type Key: Clone + Eq + Hash + Send + Sync + std::fmt::Debug;

    /// The type of events this aggregate records.
    type Event: DomainEvent;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's identity key.
    fn key(&self) -> &Self::Key;

    /// Returns the current version of the aggregate.
    fn version(&self) -> Version;

    /// Events recorded since the last drain, oldest first.
    fn pending_events(&self) -> &[Self::Event];

    /// Removes and returns every pending event in recording order.
    fn take_events(&mut self) -> Vec<Self::Event>;
}
