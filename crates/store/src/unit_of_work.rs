//! Unit of work contract.

use async_trait::async_trait;
use domain::Event;

use crate::Result;
use crate::repository::ProductRepository;

/// An atomic scope over product mutations.
///
/// Products fetched or added through [`UnitOfWork::products`] are written
/// together by `commit`. A unit of work that is dropped without commit is
/// rolled back by the backend; after commit or rollback the repository
/// returns `StoreError::Closed`.
///
/// Events recorded by tracked products stay with them until
/// `collect_new_events` drains them, whatever the outcome of the scope.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Repository access for this scope.
    fn products(&mut self) -> &mut dyn ProductRepository;

    /// Persists every tracked product and releases held locks.
    ///
    /// On failure nothing is written and the scope is closed.
    async fn commit(&mut self) -> Result<()>;

    /// Discards changes and releases held locks.
    async fn rollback(&mut self) -> Result<()>;

    /// Returns true once committed or rolled back.
    fn is_closed(&self) -> bool;

    /// Drains pending events of every tracked product.
    fn collect_new_events(&mut self) -> Vec<Event>;
}

/// Opens units of work against one backing store.
#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    /// Opens a new, active unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}
