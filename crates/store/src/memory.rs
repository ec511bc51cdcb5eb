use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{BatchReference, Sku};
use domain::{Event, Product};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    Result, StoreError,
    repository::{Origin, ProductRepository, SeenAggregates, persisted_copy},
    unit_of_work::{UnitOfWork, UnitOfWorkFactory},
};

/// How long a unit of work waits for another one to release a product.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Inner {
    products: RwLock<HashMap<Sku, Product>>,
    locks: StdMutex<HashMap<Sku, Arc<Mutex<()>>>>,
}

/// In-memory product store for tests and local runs.
///
/// Units of work take an exclusive per-sku lock on first access and hold it
/// until commit, rollback or drop, so two scopes touching the same product
/// run one after the other. Commit also checks the stored version.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
    lock_timeout: Duration,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates a new empty store with a custom lock wait.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            lock_timeout,
        }
    }

    /// Returns the number of committed products.
    pub async fn product_count(&self) -> usize {
        self.inner.products.read().await.len()
    }

    /// Returns the committed state of a product.
    pub async fn product(&self, sku: &Sku) -> Option<Product> {
        self.inner.products.read().await.get(sku).cloned()
    }

    fn locks(&self) -> std::sync::MutexGuard<'_, HashMap<Sku, Arc<Mutex<()>>>> {
        self.inner
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_for(&self, sku: &Sku) -> Arc<Mutex<()>> {
        self.locks().entry(sku.clone()).or_default().clone()
    }

    /// Drops the lock entry of a sku once nobody holds or waits on it.
    fn release_lock(&self, sku: &Sku) {
        let mut locks = self.locks();
        if locks.get(sku).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(sku);
        }
    }

    async fn sku_for_batch(&self, reference: &BatchReference) -> Option<Sku> {
        self.inner
            .products
            .read()
            .await
            .values()
            .find(|p| p.has_batch(reference))
            .map(|p| p.sku().clone())
    }
}

#[async_trait]
impl UnitOfWorkFactory for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(InMemoryUnitOfWork::new(self.clone())))
    }
}

/// Exclusive hold on one sku, released on drop.
struct ProductLock {
    sku: Sku,
    guard: Option<OwnedMutexGuard<()>>,
    store: InMemoryStore,
}

impl Drop for ProductLock {
    fn drop(&mut self) {
        // the guard owns a handle to the mutex, so it must go first
        self.guard.take();
        self.store.release_lock(&self.sku);
    }
}

/// Checks that none of the product's batch references is used by a
/// product of another sku.
fn check_batch_references<'a>(
    product: &Product,
    others: impl IntoIterator<Item = &'a Product>,
) -> Result<()> {
    for other in others {
        if other.sku() == product.sku() {
            continue;
        }
        if let Some(batch) = product.batches().iter().find(|b| other.has_batch(b.reference())) {
            return Err(StoreError::DuplicateBatch {
                reference: batch.reference().clone(),
                sku: product.sku().clone(),
            });
        }
    }
    Ok(())
}

/// Unit of work over an [`InMemoryStore`].
pub struct InMemoryUnitOfWork {
    store: InMemoryStore,
    seen: SeenAggregates<Product>,
    guards: HashMap<Sku, ProductLock>,
    closed: bool,
}

impl InMemoryUnitOfWork {
    pub fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            seen: SeenAggregates::new(),
            guards: HashMap::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn lock(&mut self, sku: &Sku) -> Result<()> {
        if self.guards.contains_key(sku) {
            return Ok(());
        }

        let lock = self.store.lock_for(sku);
        let acquired = tokio::time::timeout(self.store.lock_timeout, lock.lock_owned()).await;
        let guard = match acquired {
            Ok(guard) => guard,
            Err(_) => {
                self.store.release_lock(sku);
                return Err(StoreError::conflict(sku, "timed out waiting for product lock"));
            }
        };

        self.guards.insert(
            sku.clone(),
            ProductLock {
                sku: sku.clone(),
                guard: Some(guard),
                store: self.store.clone(),
            },
        );
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.guards.clear();
    }

    async fn write_all(&mut self) -> Result<()> {
        let mut products = self.store.inner.products.write().await;

        for (product, origin) in self.seen.iter() {
            let stored = products.get(product.sku()).map(Product::version_number);
            match (origin, stored) {
                (Origin::Added, Some(_)) => {
                    return Err(StoreError::Duplicate(product.sku().clone()));
                }
                (Origin::Loaded(expected), actual) if actual != Some(expected) => {
                    return Err(StoreError::conflict(
                        product.sku(),
                        format!("expected version {expected}, found {actual:?}"),
                    ));
                }
                _ => {}
            }
            check_batch_references(product, products.values())?;
        }

        let mut written = Vec::with_capacity(self.seen.len());
        for (product, _) in self.seen.iter() {
            products.insert(product.sku().clone(), persisted_copy(product));
            written.push(product.sku().clone());
        }
        drop(products);

        for sku in &written {
            self.seen.mark_persisted(sku);
        }
        tracing::debug!(products = written.len(), "committed in-memory unit of work");
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for InMemoryUnitOfWork {
    async fn add(&mut self, product: Product) -> Result<()> {
        self.ensure_open()?;
        let sku = product.sku().clone();
        if self.seen.contains(&sku) {
            return Err(StoreError::Duplicate(sku));
        }

        self.lock(&sku).await?;
        {
            let products = self.store.inner.products.read().await;
            if products.contains_key(&sku) {
                return Err(StoreError::Duplicate(sku));
            }
            check_batch_references(&product, products.values())?;
        }
        check_batch_references(&product, self.seen.iter().map(|(p, _)| p))?;

        self.seen.track(product, Origin::Added);
        Ok(())
    }

    async fn get<'a>(&'a mut self, sku: &Sku) -> Result<Option<&'a mut Product>> {
        self.ensure_open()?;
        if !self.seen.contains(sku) {
            self.lock(sku).await?;
            let stored = self.store.product(sku).await;
            if let Some(product) = stored {
                let version = product.version_number();
                self.seen.track(product, Origin::Loaded(version));
            }
        }
        Ok(self.seen.get_mut(sku))
    }

    async fn get_by_batch_reference<'a>(
        &'a mut self,
        reference: &BatchReference,
    ) -> Result<Option<&'a mut Product>> {
        self.ensure_open()?;
        let sku = match self.seen.find_key(|p| p.has_batch(reference)) {
            Some(sku) => sku,
            None => match self.store.sku_for_batch(reference).await {
                Some(sku) => sku,
                None => return Ok(None),
            },
        };
        self.get(&sku).await
    }

    fn seen(&self) -> &SeenAggregates<Product> {
        &self.seen
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    fn products(&mut self) -> &mut dyn ProductRepository {
        self
    }

    #[tracing::instrument(skip(self))]
    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let result = self.write_all().await;
        self.close();
        result
    }

    async fn rollback(&mut self) -> Result<()> {
        self.close();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn collect_new_events(&mut self) -> Vec<Event> {
        self.seen.collect_new_events()
    }
}
