use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{BatchReference, Sku, Version};
use domain::{Batch, Event, OrderLine, Product};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};

use crate::{
    Result, StoreError,
    memory::DEFAULT_LOCK_TIMEOUT,
    repository::{Origin, ProductRepository, SeenAggregates},
    unit_of_work::{UnitOfWork, UnitOfWorkFactory},
};

/// SQLSTATEs that mean another transaction got in the way.
const CONFLICT_STATES: [&str; 4] = [
    "55P03", // lock_not_available
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "23505", // unique_violation
];

/// PostgreSQL-backed product store.
///
/// Each unit of work is one transaction. Products are locked with
/// `SELECT ... FOR UPDATE` when first fetched, waiting at most
/// `lock_timeout`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self::with_lock_timeout(pool, DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates a new PostgreSQL store with a custom lock wait.
    pub fn with_lock_timeout(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWorkFactory for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters
        let millis = self.lock_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{millis}ms'"))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PostgresUnitOfWork::new(tx)))
    }
}

/// Unit of work backed by one PostgreSQL transaction.
///
/// Dropping it without commit rolls the transaction back.
pub struct PostgresUnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
    seen: SeenAggregates<Product>,
}

impl PostgresUnitOfWork {
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            tx: Some(tx),
            seen: SeenAggregates::new(),
        }
    }

    fn conn(&mut self) -> Result<&mut PgConnection> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(StoreError::Closed),
        }
    }
}

fn map_db_error(sku: &Sku, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && let Some(code) = db_err.code()
        && CONFLICT_STATES.contains(&code.as_ref())
    {
        return StoreError::conflict(sku, db_err.message().to_string());
    }
    StoreError::Database(err)
}

fn qty_from_db(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative quantity {value}")))
}

fn qty_to_db(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("quantity {value} out of range")))
}

async fn load_product(conn: &mut PgConnection, sku: &Sku) -> Result<Option<Product>> {
    let row = sqlx::query("SELECT version_number FROM products WHERE sku = $1 FOR UPDATE")
        .bind(sku.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_db_error(sku, e))?;
    let Some(row) = row else {
        return Ok(None);
    };
    let version = Version::new(row.try_get("version_number")?);

    let allocation_rows = sqlx::query(
        r#"
        SELECT a.batch_reference, a.orderid, a.qty
        FROM allocations a
        JOIN batches b ON b.reference = a.batch_reference
        WHERE b.sku = $1
        ORDER BY a.id ASC
        "#,
    )
    .bind(sku.as_str())
    .fetch_all(&mut *conn)
    .await?;

    let mut lines: HashMap<String, Vec<OrderLine>> = HashMap::new();
    for row in allocation_rows {
        let reference: String = row.try_get("batch_reference")?;
        let orderid: String = row.try_get("orderid")?;
        let qty = qty_from_db(row.try_get("qty")?)?;
        lines
            .entry(reference)
            .or_default()
            .push(OrderLine::new(orderid, sku.clone(), qty));
    }

    let batch_rows = sqlx::query(
        r#"
        SELECT reference, purchased_quantity, eta
        FROM batches
        WHERE sku = $1
        ORDER BY id ASC
        "#,
    )
    .bind(sku.as_str())
    .fetch_all(&mut *conn)
    .await?;

    let mut batches = Vec::with_capacity(batch_rows.len());
    for row in batch_rows {
        let reference: String = row.try_get("reference")?;
        let purchased = qty_from_db(row.try_get("purchased_quantity")?)?;
        let eta: Option<NaiveDate> = row.try_get("eta")?;
        let allocations = lines.remove(&reference).unwrap_or_default();
        batches.push(Batch::restore(
            BatchReference::new(reference),
            sku.clone(),
            purchased,
            eta,
            allocations,
        ));
    }

    Ok(Some(Product::restore(sku.clone(), batches, version)))
}

async fn save_product(conn: &mut PgConnection, product: &Product, origin: Origin) -> Result<()> {
    let sku = product.sku();
    let version = product.version_number().as_i64();

    match origin {
        Origin::Added => {
            sqlx::query("INSERT INTO products (sku, version_number) VALUES ($1, $2)")
                .bind(sku.as_str())
                .bind(version)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_db_error(sku, e))?;
        }
        Origin::Loaded(expected) => {
            let result = sqlx::query(
                "UPDATE products SET version_number = $1 WHERE sku = $2 AND version_number = $3",
            )
            .bind(version)
            .bind(sku.as_str())
            .bind(expected.as_i64())
            .execute(&mut *conn)
            .await
            .map_err(|e| map_db_error(sku, e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::conflict(
                    sku,
                    format!("version {expected} changed since load"),
                ));
            }
        }
    }

    sqlx::query(
        "DELETE FROM allocations WHERE batch_reference IN (SELECT reference FROM batches WHERE sku = $1)",
    )
    .bind(sku.as_str())
    .execute(&mut *conn)
    .await
    .map_err(|e| map_db_error(sku, e))?;

    for batch in product.batches() {
        let result = sqlx::query(
            r#"
            INSERT INTO batches (reference, sku, purchased_quantity, eta)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (reference) DO UPDATE
            SET purchased_quantity = EXCLUDED.purchased_quantity, eta = EXCLUDED.eta
            WHERE batches.sku = EXCLUDED.sku
            "#,
        )
        .bind(batch.reference().as_str())
        .bind(sku.as_str())
        .bind(qty_to_db(batch.purchased_quantity())?)
        .bind(batch.eta())
        .execute(&mut *conn)
        .await
        .map_err(|e| map_db_error(sku, e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateBatch {
                reference: batch.reference().clone(),
                sku: sku.clone(),
            });
        }

        for line in batch.allocations() {
            sqlx::query(
                "INSERT INTO allocations (batch_reference, orderid, sku, qty) VALUES ($1, $2, $3, $4)",
            )
            .bind(batch.reference().as_str())
            .bind(line.orderid.as_str())
            .bind(line.sku.as_str())
            .bind(qty_to_db(line.qty)?)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_db_error(sku, e))?;
        }
    }

    Ok(())
}

#[async_trait]
impl ProductRepository for PostgresUnitOfWork {
    async fn add(&mut self, product: Product) -> Result<()> {
        let sku = product.sku().clone();
        let conn = self.conn()?;
        let exists = sqlx::query("SELECT 1 FROM products WHERE sku = $1")
            .bind(sku.as_str())
            .fetch_optional(&mut *conn)
            .await?
            .is_some();

        if exists || self.seen.contains(&sku) {
            return Err(StoreError::Duplicate(sku));
        }
        self.seen.track(product, Origin::Added);
        Ok(())
    }

    async fn get<'a>(&'a mut self, sku: &Sku) -> Result<Option<&'a mut Product>> {
        if !self.seen.contains(sku) {
            let conn = self.conn()?;
            if let Some(product) = load_product(conn, sku).await? {
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
        let sku = match self.seen.find_key(|p| p.has_batch(reference)) {
            Some(sku) => sku,
            None => {
                let conn = self.conn()?;
                let sku: Option<String> =
                    sqlx::query_scalar("SELECT sku FROM batches WHERE reference = $1")
                        .bind(reference.as_str())
                        .fetch_optional(&mut *conn)
                        .await?;
                match sku {
                    Some(sku) => Sku::new(sku),
                    None => return Ok(None),
                }
            }
        };
        self.get(&sku).await
    }

    fn seen(&self) -> &SeenAggregates<Product> {
        &self.seen
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    fn products(&mut self) -> &mut dyn ProductRepository {
        self
    }

    #[tracing::instrument(skip(self))]
    async fn commit(&mut self) -> Result<()> {
        let mut tx = self.tx.take().ok_or(StoreError::Closed)?;

        let mut written = Vec::with_capacity(self.seen.len());
        for (product, origin) in self.seen.iter() {
            save_product(&mut tx, product, origin).await?;
            written.push(product.sku().clone());
        }
        tx.commit().await?;

        for sku in &written {
            self.seen.mark_persisted(sku);
        }
        tracing::debug!(products = written.len(), "committed postgres unit of work");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    fn collect_new_events(&mut self) -> Vec<Event> {
        self.seen.collect_new_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_conversions_reject_out_of_range() {
        assert_eq!(qty_from_db(7).unwrap(), 7);
        assert!(matches!(qty_from_db(-1), Err(StoreError::Corrupt(_))));
        assert_eq!(qty_to_db(7).unwrap(), 7);
        assert!(matches!(qty_to_db(u32::MAX), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_non_database_errors_are_not_conflicts() {
        let err = map_db_error(&Sku::new("LAMP"), sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(_)));
        assert!(!err.is_retryable());
    }
}
