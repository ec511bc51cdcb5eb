//! Persistence for the allocation service.
//!
//! A [`UnitOfWorkFactory`] opens [`UnitOfWork`] scopes; each scope exposes a
//! [`ProductRepository`] that tracks every product it hands out so the
//! events those products record can be harvested when the scope ends.
//!
//! Two backends are provided: [`InMemoryStore`] for tests and local runs,
//! and [`PostgresStore`] backed by `sqlx`.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod unit_of_work;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryUnitOfWork};
pub use postgres::{PostgresStore, PostgresUnitOfWork};
pub use repository::{Origin, ProductRepository, SeenAggregates};
pub use unit_of_work::{UnitOfWork, UnitOfWorkFactory};
