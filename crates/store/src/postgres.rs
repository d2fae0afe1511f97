use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{BatchReference, Sku, Version};
use domain::{Batch, OrderLine, Product};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};

use crate::{ProductRepository, Result, StoreError, UnitOfWork, UnitOfWorkState};

/// Table names used by the PostgreSQL store.
///
/// Passed to [`PostgresUnitOfWork`] at construction. The bundled migrations
/// create the tables named by [`TableMapping::default`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    pub products: String,
    pub batches: String,
    pub order_lines: String,
    pub allocations: String,
}

impl TableMapping {
    /// Default table names qualified with a schema, e.g. `inventory.products`.
    pub fn in_schema(schema: &str) -> Self {
        Self {
            products: format!("{schema}.products"),
            batches: format!("{schema}.batches"),
            order_lines: format!("{schema}.order_lines"),
            allocations: format!("{schema}.allocations"),
        }
    }
}

impl Default for TableMapping {
    fn default() -> Self {
        Self {
            products: "products".to_string(),
            batches: "batches".to_string(),
            order_lines: "order_lines".to_string(),
            allocations: "allocations".to_string(),
        }
    }
}

/// Persisted state of a product as it was loaded.
struct Persisted {
    version: Version,
    batches: HashMap<BatchReference, HashSet<OrderLine>>,
}

impl Persisted {
    fn of(product: &Product) -> Self {
        Self {
            version: product.version(),
            batches: product
                .batches()
                .iter()
                .map(|b| (b.reference().clone(), b.allocations().cloned().collect()))
                .collect(),
        }
    }
}

struct Tracked {
    product: Product,
    // None for products registered through `add`.
    persisted: Option<Persisted>,
}

/// Product repository bound to a single database transaction.
///
/// The transaction is started on first use and reused until the owning unit
/// of work commits or rolls back. Loaded products are locked with
/// `SELECT ... FOR UPDATE`, so concurrent scopes on the same SKU serialize.
pub struct PostgresProductRepository {
    pool: PgPool,
    mapping: Arc<TableMapping>,
    tx: Option<Transaction<'static, Postgres>>,
    seen: HashMap<Sku, Tracked>,
}

impl PostgresProductRepository {
    fn new(pool: PgPool, mapping: Arc<TableMapping>) -> Self {
        Self {
            pool,
            mapping,
            tx: None,
            seen: HashMap::new(),
        }
    }

    async fn connection(&mut self) -> Result<&mut PgConnection> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };
        Ok(&mut **self.tx.insert(tx))
    }

    /// Writes tracked changes into the open transaction.
    async fn flush(&mut self) -> Result<()> {
        let seen = std::mem::take(&mut self.seen);
        if seen.is_empty() {
            return Ok(());
        }

        let mapping = Arc::clone(&self.mapping);
        let conn = self.connection().await?;
        for tracked in seen.values() {
            save_product(conn, &mapping, tracked).await?;
        }

        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if let Err(err) = self.flush().await {
            if let Err(rollback_err) = self.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback after failed flush also failed");
            }
            return Err(err);
        }

        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.seen.clear();
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for PostgresProductRepository {
    async fn get<'a>(&'a mut self, sku: &Sku) -> Result<Option<&'a mut Product>> {
        if !self.seen.contains_key(sku) {
            let mapping = Arc::clone(&self.mapping);
            let conn = self.connection().await?;
            let Some(product) = load_product(conn, &mapping, sku).await? else {
                return Ok(None);
            };
            let persisted = Persisted::of(&product);
            self.seen.insert(
                sku.clone(),
                Tracked {
                    product,
                    persisted: Some(persisted),
                },
            );
        }

        Ok(self.seen.get_mut(sku).map(|tracked| &mut tracked.product))
    }

    async fn add(&mut self, product: Product) -> Result<()> {
        let sku = product.sku().clone();
        if self.seen.contains_key(&sku) {
            return Err(StoreError::DuplicateProduct(sku));
        }

        self.seen.insert(
            sku,
            Tracked {
                product,
                persisted: None,
            },
        );
        Ok(())
    }
}

/// Unit of work backed by a PostgreSQL transaction.
pub struct PostgresUnitOfWork {
    pool: PgPool,
    mapping: Arc<TableMapping>,
    state: UnitOfWorkState,
    repository: Option<PostgresProductRepository>,
}

impl PostgresUnitOfWork {
    /// Creates a closed unit of work using the default table names.
    pub fn new(pool: PgPool) -> Self {
        Self::with_mapping(pool, TableMapping::default())
    }

    /// Creates a closed unit of work using custom table names.
    pub fn with_mapping(pool: PgPool, mapping: TableMapping) -> Self {
        Self {
            pool,
            mapping: Arc::new(mapping),
            state: UnitOfWorkState::Closed,
            repository: None,
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn mapping(&self) -> &TableMapping {
        &self.mapping
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Deletes every product, batch and allocation.
    pub async fn truncate(&self) -> Result<()> {
        let sql = format!(
            "TRUNCATE TABLE {}, {}, {}, {}",
            self.mapping.allocations,
            self.mapping.order_lines,
            self.mapping.batches,
            self.mapping.products
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    fn repository(&mut self, operation: &'static str) -> Result<&mut PostgresProductRepository> {
        self.repository
            .as_mut()
            .ok_or(StoreError::NotInScope { operation })
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    fn state(&self) -> UnitOfWorkState {
        self.state
    }

    async fn enter(&mut self) -> Result<()> {
        if self.state.is_active() {
            return Err(StoreError::AlreadyInScope);
        }

        self.repository = Some(PostgresProductRepository::new(
            self.pool.clone(),
            Arc::clone(&self.mapping),
        ));
        self.state = UnitOfWorkState::Open;
        tracing::debug!("postgres unit of work entered");
        Ok(())
    }

    fn products(&mut self) -> Result<&mut dyn ProductRepository> {
        let repository: &mut dyn ProductRepository = self.repository("access products")?;
        Ok(repository)
    }

    async fn commit(&mut self) -> Result<()> {
        self.repository("commit")?.commit().await?;
        self.state = UnitOfWorkState::Committed;
        metrics::counter!("unit_of_work_commits_total").increment(1);
        tracing::debug!("postgres unit of work committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.repository("roll back")?.rollback().await?;
        self.state = UnitOfWorkState::RolledBack;
        metrics::counter!("unit_of_work_rollbacks_total").increment(1);
        tracing::debug!("postgres unit of work rolled back");
        Ok(())
    }

    async fn exit(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(StoreError::NotInScope { operation: "exit" });
        }

        // Release the connection even if the rollback fails; dropping the
        // transaction rolls it back.
        let rolled_back = self.rollback().await;
        self.repository = None;
        self.state = UnitOfWorkState::Closed;
        tracing::debug!("postgres unit of work exited");
        rolled_back
    }
}

fn decode_error(err: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

fn decode_quantity(value: i64) -> std::result::Result<u32, sqlx::Error> {
    u32::try_from(value).map_err(decode_error)
}

fn map_unique_violation(err: sqlx::Error, on_violation: impl FnOnce() -> StoreError) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
    {
        return on_violation();
    }
    StoreError::Database(err)
}

async fn load_product(
    conn: &mut PgConnection,
    mapping: &TableMapping,
    sku: &Sku,
) -> Result<Option<Product>> {
    let sql = format!(
        "SELECT version_number FROM {} WHERE sku = $1 FOR UPDATE",
        mapping.products
    );
    let version: Option<i64> = sqlx::query_scalar(&sql)
        .bind(sku.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    let Some(version) = version else {
        return Ok(None);
    };

    let sql = format!(
        "SELECT reference, purchased_quantity, eta FROM {} WHERE sku = $1 ORDER BY id ASC",
        mapping.batches
    );
    let batch_rows = sqlx::query(&sql)
        .bind(sku.as_str())
        .fetch_all(&mut *conn)
        .await?;

    let sql = format!(
        r#"
        SELECT b.reference, l.order_id, l.sku, l.quantity
        FROM {allocations} a
        JOIN {order_lines} l ON l.id = a.order_line_id
        JOIN {batches} b ON b.id = a.batch_id
        WHERE b.sku = $1
        ORDER BY a.id ASC
        "#,
        allocations = mapping.allocations,
        order_lines = mapping.order_lines,
        batches = mapping.batches,
    );
    let allocation_rows = sqlx::query(&sql)
        .bind(sku.as_str())
        .fetch_all(&mut *conn)
        .await?;

    let mut allocations: HashMap<String, Vec<OrderLine>> = HashMap::new();
    for row in allocation_rows {
        let reference: String = row.try_get("reference")?;
        let line = OrderLine::new(
            row.try_get::<String, _>("order_id")?,
            row.try_get::<String, _>("sku")?,
            decode_quantity(row.try_get("quantity")?)?,
        )
        .map_err(decode_error)?;
        allocations.entry(reference).or_default().push(line);
    }

    let batches = batch_rows
        .into_iter()
        .map(|row| -> Result<Batch> {
            let reference: String = row.try_get("reference")?;
            let lines = allocations.remove(&reference).unwrap_or_default();
            Ok(Batch::restore(
                reference,
                sku.clone(),
                decode_quantity(row.try_get("purchased_quantity")?)?,
                row.try_get::<Option<NaiveDate>, _>("eta")?,
                lines,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let product = Product::restore(sku.clone(), batches, Version::new(version))
        .map_err(decode_error)?;
    Ok(Some(product))
}

async fn save_product(
    conn: &mut PgConnection,
    mapping: &TableMapping,
    tracked: &Tracked,
) -> Result<()> {
    let product = &tracked.product;
    let sku = product.sku();

    match &tracked.persisted {
        None => {
            let sql = format!(
                "INSERT INTO {} (sku, version_number) VALUES ($1, $2)",
                mapping.products
            );
            sqlx::query(&sql)
                .bind(sku.as_str())
                .bind(product.version().as_i64())
                .execute(&mut *conn)
                .await
                .map_err(|e| map_unique_violation(e, || StoreError::DuplicateProduct(sku.clone())))?;
        }
        Some(persisted) if persisted.version != product.version() => {
            let sql = format!(
                "UPDATE {} SET version_number = $1 WHERE sku = $2 AND version_number = $3",
                mapping.products
            );
            let updated = sqlx::query(&sql)
                .bind(product.version().as_i64())
                .bind(sku.as_str())
                .bind(persisted.version.as_i64())
                .execute(&mut *conn)
                .await?
                .rows_affected();

            if updated == 0 {
                let sql = format!(
                    "SELECT version_number FROM {} WHERE sku = $1",
                    mapping.products
                );
                let actual: Option<i64> = sqlx::query_scalar(&sql)
                    .bind(sku.as_str())
                    .fetch_optional(&mut *conn)
                    .await?;
                metrics::counter!("unit_of_work_conflicts_total").increment(1);
                return Err(StoreError::ConcurrencyConflict {
                    sku: sku.clone(),
                    expected: persisted.version,
                    actual: Version::new(actual.unwrap_or_default()),
                });
            }
        }
        Some(_) => {}
    }

    for batch in product.batches() {
        let stored = tracked
            .persisted
            .as_ref()
            .and_then(|p| p.batches.get(batch.reference()));

        match stored {
            None => {
                insert_batch(conn, mapping, batch).await?;
                for line in batch.allocations() {
                    insert_allocation(conn, mapping, batch.reference(), line).await?;
                }
            }
            Some(stored) => {
                for line in batch.allocations().filter(|l| !stored.contains(*l)) {
                    insert_allocation(conn, mapping, batch.reference(), line).await?;
                }
                for line in stored.iter().filter(|l| !batch.is_allocated(l)) {
                    delete_allocation(conn, mapping, batch.reference(), line).await?;
                }
            }
        }
    }

    Ok(())
}

async fn insert_batch(conn: &mut PgConnection, mapping: &TableMapping, batch: &Batch) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (reference, sku, purchased_quantity, eta) VALUES ($1, $2, $3, $4)",
        mapping.batches
    );
    sqlx::query(&sql)
        .bind(batch.reference().as_str())
        .bind(batch.sku().as_str())
        .bind(i64::from(batch.purchased_quantity()))
        .bind(batch.eta())
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            map_unique_violation(e, || StoreError::DuplicateBatch(batch.reference().clone()))
        })?;
    Ok(())
}

async fn insert_allocation(
    conn: &mut PgConnection,
    mapping: &TableMapping,
    reference: &BatchReference,
    line: &OrderLine,
) -> Result<()> {
    let sql = format!(
        r#"
        WITH line AS (
            INSERT INTO {order_lines} (order_id, sku, quantity)
            VALUES ($1, $2, $3)
            RETURNING id
        )
        INSERT INTO {allocations} (batch_id, order_line_id)
        SELECT b.id, line.id FROM {batches} b, line
        WHERE b.reference = $4
        "#,
        order_lines = mapping.order_lines,
        allocations = mapping.allocations,
        batches = mapping.batches,
    );
    sqlx::query(&sql)
        .bind(line.order_id().as_str())
        .bind(line.sku().as_str())
        .bind(i64::from(line.quantity()))
        .bind(reference.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn delete_allocation(
    conn: &mut PgConnection,
    mapping: &TableMapping,
    reference: &BatchReference,
    line: &OrderLine,
) -> Result<()> {
    // Allocation rows go with their order line (ON DELETE CASCADE).
    let sql = format!(
        r#"
        DELETE FROM {order_lines} l
        USING {allocations} a, {batches} b
        WHERE a.order_line_id = l.id
          AND a.batch_id = b.id
          AND b.reference = $1
          AND l.order_id = $2
          AND l.sku = $3
          AND l.quantity = $4
        "#,
        order_lines = mapping.order_lines,
        allocations = mapping.allocations,
        batches = mapping.batches,
    );
    sqlx::query(&sql)
        .bind(reference.as_str())
        .bind(line.order_id().as_str())
        .bind(line.sku().as_str())
        .bind(i64::from(line.quantity()))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mapping_matches_migrations() {
        let mapping = TableMapping::default();
        assert_eq!(mapping.products, "products");
        assert_eq!(mapping.batches, "batches");
        assert_eq!(mapping.order_lines, "order_lines");
        assert_eq!(mapping.allocations, "allocations");
    }

    #[test]
    fn schema_mapping_qualifies_every_table() {
        let mapping = TableMapping::in_schema("inventory");
        assert_eq!(mapping.products, "inventory.products");
        assert_eq!(mapping.allocations, "inventory.allocations");
    }

    #[test]
    fn persisted_snapshot_records_allocations_per_batch() {
        let line = OrderLine::new("O1", "LAMP", 2).unwrap();
        let product = Product::restore(
            "LAMP",
            vec![
                Batch::restore("b1", "LAMP", 10, None, [line.clone()]),
                Batch::new("b2", "LAMP", 10, None),
            ],
            Version::new(3),
        )
        .unwrap();

        let persisted = Persisted::of(&product);

        assert_eq!(persisted.version, Version::new(3));
        assert!(persisted.batches[&BatchReference::from("b1")].contains(&line));
        assert!(persisted.batches[&BatchReference::from("b2")].is_empty());
    }

    #[test]
    fn out_of_range_quantities_fail_to_decode() {
        assert_eq!(decode_quantity(7).unwrap(), 7);
        assert!(matches!(decode_quantity(-1), Err(sqlx::Error::Decode(_))));
    }
}
