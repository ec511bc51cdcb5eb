//! Repository contract and the seen-aggregate tracker shared by backends.

use std::collections::HashMap;

use async_trait::async_trait;
use common::{BatchReference, Sku, Version};
use domain::{Aggregate, Product};

use crate::Result;

/// Identity-keyed access to `Product` aggregates inside one unit of work.
///
/// Every product returned by `get`/`get_by_batch_reference` or passed to
/// `add` is tracked as seen until the unit of work ends. Repeated lookups of
/// the same sku return the same tracked instance.
#[async_trait]
pub trait ProductRepository: Send {
    /// Registers a newly created product for persistence.
    ///
    /// Fails with `Duplicate` if the sku already exists.
    async fn add(&mut self, product: Product) -> Result<()>;

    /// Fetches a product for mutation. A missing sku is `Ok(None)`.
    async fn get<'a>(&'a mut self, sku: &Sku) -> Result<Option<&'a mut Product>>;

    /// Fetches the product owning the given batch. A missing batch is `Ok(None)`.
    async fn get_by_batch_reference<'a>(
        &'a mut self,
        reference: &BatchReference,
    ) -> Result<Option<&'a mut Product>>;

    /// Products touched so far in this unit of work.
    fn seen(&self) -> &SeenAggregates<Product>;
}

/// How a tracked aggregate entered the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Loaded from storage at the given version.
    Loaded(Version),
    /// Created during this unit of work.
    Added,
}

#[derive(Debug)]
struct Tracked<A> {
    aggregate: A,
    origin: Origin,
}

/// Aggregates seen during one unit of work, keyed by identity.
///
/// Keeps first-seen order so that harvested events come out in a stable
/// order across aggregates.
#[derive(Debug)]
pub struct SeenAggregates<A: Aggregate> {
    order: Vec<A::Key>,
    entries: HashMap<A::Key, Tracked<A>>,
}

impl<A: Aggregate> Default for SeenAggregates<A> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }
}

impl<A: Aggregate> SeenAggregates<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &A::Key) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &A::Key) -> Option<&A> {
        self.entries.get(key).map(|t| &t.aggregate)
    }

    pub fn get_mut(&mut self, key: &A::Key) -> Option<&mut A> {
        self.entries.get_mut(key).map(|t| &mut t.aggregate)
    }

    /// Returns how the aggregate entered the unit of work.
    pub fn origin(&self, key: &A::Key) -> Option<Origin> {
        self.entries.get(key).map(|t| t.origin)
    }

    /// Starts tracking an aggregate and returns the tracked instance.
    ///
    /// An aggregate already tracked under the same key is kept as is.
    pub fn track(&mut self, aggregate: A, origin: Origin) -> &mut A {
        let key = aggregate.key().clone();
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        &mut self
            .entries
            .entry(key)
            .or_insert(Tracked { aggregate, origin })
            .aggregate
    }

    /// Marks the aggregate as persisted at its current version.
    pub fn mark_persisted(&mut self, key: &A::Key) {
        if let Some(tracked) = self.entries.get_mut(key) {
            tracked.origin = Origin::Loaded(tracked.aggregate.version());
        }
    }

    /// Key of the first tracked aggregate matching the predicate.
    pub fn find_key(&self, predicate: impl Fn(&A) -> bool) -> Option<A::Key> {
        self.iter()
            .find(|&(a, _)| predicate(a))
            .map(|(a, _)| a.key().clone())
    }

    /// Tracked aggregates in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&A, Origin)> {
        self.order.iter().filter_map(|key| {
            self.entries
                .get(key)
                .map(|tracked| (&tracked.aggregate, tracked.origin))
        })
    }

    /// Drains pending events of every tracked aggregate.
    ///
    /// Aggregates are visited in first-seen order; each one's events keep
    /// their recording order.
    pub fn collect_new_events(&mut self) -> Vec<A::Event> {
        let mut events = Vec::new();
        for key in &self.order {
            if let Some(tracked) = self.entries.get_mut(key) {
                events.extend(tracked.aggregate.take_events());
            }
        }
        events
    }
}

/// A copy of the product without its pending events, as it is persisted.
pub(crate) fn persisted_copy(product: &Product) -> Product {
    Product::restore(
        product.sku().clone(),
        product.batches().to_vec(),
        product.version_number(),
    )
}
