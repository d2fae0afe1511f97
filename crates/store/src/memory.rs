use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{BatchReference, Sku, Version};
use domain::Product;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{ProductRepository, Result, StoreError, UnitOfWork, UnitOfWorkState};

/// In-memory product store for testing and embedding.
///
/// Committed products live behind a shared lock. Units of work operate on
/// private copies and publish them on commit. A per-SKU lock is held from the
/// first `get` of a SKU until the unit of work commits, rolls back or exits,
/// which serializes scopes touching the same SKU, including scopes that find
/// the SKU missing and create it. Lock entries nobody holds or waits for are
/// pruned whenever a unit of work releases its locks.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    products: Arc<RwLock<HashMap<Sku, Product>>>,
    locks: Arc<Mutex<HashMap<Sku, Arc<Mutex<()>>>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a closed unit of work over this store.
    pub fn unit_of_work(&self) -> InMemoryUnitOfWork {
        InMemoryUnitOfWork::new(self.clone())
    }

    /// Returns a copy of the committed state of a product.
    pub async fn product(&self, sku: &Sku) -> Option<Product> {
        self.products.read().await.get(sku).cloned()
    }

    /// Returns the number of committed products.
    pub async fn product_count(&self) -> usize {
        self.products.read().await.len()
    }

    /// Stores a product directly, outside any unit of work.
    pub async fn insert(&self, product: Product) -> Result<()> {
        let mut products = self.products.write().await;
        if products.contains_key(product.sku()) {
            return Err(StoreError::DuplicateProduct(product.sku().clone()));
        }
        products.insert(product.sku().clone(), product);
        Ok(())
    }

    /// Removes every product.
    pub async fn clear(&self) {
        self.products.write().await.clear();
    }

    async fn lock(&self, sku: &Sku) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(sku.clone()).or_default())
        };
        lock.lock_owned().await
    }

    async fn prune_locks(&self) {
        self.locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// What a unit of work knew about a product when it loaded it.
struct Loaded {
    version: Version,
    _guard: OwnedMutexGuard<()>,
}

struct Tracked {
    product: Product,
    // None for products registered through `add`.
    loaded: Option<Loaded>,
}

/// Repository over the private copies held by one unit of work.
pub struct InMemoryProductRepository {
    store: InMemoryStore,
    seen: HashMap<Sku, Tracked>,
    // Locks on SKUs that were looked up but not found.
    absent: HashMap<Sku, OwnedMutexGuard<()>>,
}

impl InMemoryProductRepository {
    fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            seen: HashMap::new(),
            absent: HashMap::new(),
        }
    }

    /// Publishes every tracked product, or nothing if any of them conflicts.
    async fn flush(&mut self) -> Result<()> {
        let mut products = self.store.products.write().await;

        for (sku, tracked) in &self.seen {
            let stored = products.get(sku).map(Product::version);
            match (&tracked.loaded, stored) {
                (None, Some(_)) => return Err(StoreError::DuplicateProduct(sku.clone())),
                (Some(loaded), Some(actual)) if loaded.version != actual => {
                    metrics::counter!("unit_of_work_conflicts_total").increment(1);
                    return Err(StoreError::ConcurrencyConflict {
                        sku: sku.clone(),
                        expected: loaded.version,
                        actual,
                    });
                }
                _ => {}
            }
        }

        let mut owners: HashMap<&BatchReference, &Sku> = HashMap::new();
        for (sku, product) in products.iter().filter(|(sku, _)| !self.seen.contains_key(*sku)) {
            for batch in product.batches() {
                owners.insert(batch.reference(), sku);
            }
        }
        for (sku, tracked) in &self.seen {
            for batch in tracked.product.batches() {
                if owners.insert(batch.reference(), sku).is_some() {
                    return Err(StoreError::DuplicateBatch(batch.reference().clone()));
                }
            }
        }

        for (sku, tracked) in self.seen.drain() {
            products.insert(sku, tracked.product);
        }

        Ok(())
    }

    /// Drops pending work and releases every SKU lock.
    async fn discard(&mut self) {
        self.seen.clear();
        self.absent.clear();
        self.store.prune_locks().await;
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn get<'a>(&'a mut self, sku: &Sku) -> Result<Option<&'a mut Product>> {
        if !self.seen.contains_key(sku) {
            let guard = match self.absent.remove(sku) {
                Some(guard) => guard,
                None => self.store.lock(sku).await,
            };
            let Some(product) = self.store.product(sku).await else {
                self.absent.insert(sku.clone(), guard);
                return Ok(None);
            };
            let loaded = Loaded {
                version: product.version(),
                _guard: guard,
            };
            self.seen.insert(
                sku.clone(),
                Tracked {
                    product,
                    loaded: Some(loaded),
                },
            );
        }

        Ok(self.seen.get_mut(sku).map(|tracked| &mut tracked.product))
    }

    async fn add(&mut self, product: Product) -> Result<()> {
        let sku = product.sku().clone();
        if self.seen.contains_key(&sku) || self.store.product(&sku).await.is_some() {
            return Err(StoreError::DuplicateProduct(sku));
        }

        self.seen.insert(
            sku,
            Tracked {
                product,
                loaded: None,
            },
        );
        Ok(())
    }
}

/// Unit of work over an [`InMemoryStore`].
pub struct InMemoryUnitOfWork {
    store: InMemoryStore,
    state: UnitOfWorkState,
    repository: Option<InMemoryProductRepository>,
}

impl InMemoryUnitOfWork {
    /// Creates a closed unit of work.
    pub fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            state: UnitOfWorkState::Closed,
            repository: None,
        }
    }

    fn repository(&mut self, operation: &'static str) -> Result<&mut InMemoryProductRepository> {
        self.repository
            .as_mut()
            .ok_or(StoreError::NotInScope { operation })
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    fn state(&self) -> UnitOfWorkState {
        self.state
    }

    async fn enter(&mut self) -> Result<()> {
        if self.state.is_active() {
            return Err(StoreError::AlreadyInScope);
        }

        self.repository = Some(InMemoryProductRepository::new(self.store.clone()));
        self.state = UnitOfWorkState::Open;
        tracing::debug!("in-memory unit of work entered");
        Ok(())
    }

    fn products(&mut self) -> Result<&mut dyn ProductRepository> {
        let repository: &mut dyn ProductRepository = self.repository("access products")?;
        Ok(repository)
    }

    async fn commit(&mut self) -> Result<()> {
        let repository = self.repository("commit")?;
        let result = repository.flush().await;
        // Like a failed database commit, a rejected flush leaves nothing pending.
        repository.discard().await;
        result?;

        self.state = UnitOfWorkState::Committed;
        metrics::counter!("unit_of_work_commits_total").increment(1);
        tracing::debug!("in-memory unit of work committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.repository("roll back")?.discard().await;
        self.state = UnitOfWorkState::RolledBack;
        metrics::counter!("unit_of_work_rollbacks_total").increment(1);
        tracing::debug!("in-memory unit of work rolled back");
        Ok(())
    }

    async fn exit(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(StoreError::NotInScope { operation: "exit" });
        }

        self.rollback().await?;
        self.repository = None;
        self.state = UnitOfWorkState::Closed;
        tracing::debug!("in-memory unit of work exited");
        Ok(())
    }
}
