use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::{ProductRepository, Result, StoreError};

/// Lifecycle of a unit of work.
///
/// `Closed -> Open -> {Committed | RolledBack} -> Closed`. Committing or
/// rolling back keeps the scope usable; only `exit` closes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitOfWorkState {
    #[default]
    Closed,
    Open,
    Committed,
    RolledBack,
}

impl UnitOfWorkState {
    /// Returns true while the scope is entered.
    pub fn is_active(&self) -> bool {
        !matches!(self, UnitOfWorkState::Closed)
    }
}

impl std::fmt::Display for UnitOfWorkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UnitOfWorkState::Closed => "closed",
            UnitOfWorkState::Open => "open",
            UnitOfWorkState::Committed => "committed",
            UnitOfWorkState::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// Transactional scope around a [`ProductRepository`].
///
/// Either every change made through `products()` since the last commit or
/// rollback is persisted by `commit`, or none of it is. `exit` always rolls
/// back what is still uncommitted before releasing the connection.
///
/// Prefer [`run_in_unit_of_work`] over calling `enter`/`exit` by hand.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Returns the current lifecycle state.
    fn state(&self) -> UnitOfWorkState;

    /// Opens the scope and binds a fresh repository to a new connection.
    async fn enter(&mut self) -> Result<()>;

    /// Returns the repository bound to this scope.
    fn products(&mut self) -> Result<&mut dyn ProductRepository>;

    /// Persists every change made in this scope, atomically.
    async fn commit(&mut self) -> Result<()>;

    /// Discards every uncommitted change. Safe to call repeatedly.
    async fn rollback(&mut self) -> Result<()>;

    /// Rolls back uncommitted work and closes the scope.
    async fn exit(&mut self) -> Result<()>;
}

/// Runs `body` inside an entered unit of work.
///
/// The scope is always exited afterwards, which rolls back anything the body
/// did not commit. Errors from the body are returned unchanged; if exiting
/// also fails, the body's error wins and the exit error is logged.
///
/// ```ignore
/// let reference = run_in_unit_of_work(&mut uow, |uow| {
///     Box::pin(async move {
///         let product = uow.products()?.get(&sku).await?.ok_or(MyError::Missing)?;
///         let reference = product.allocate(&line)?;
///         uow.commit().await?;
///         Ok(reference)
///     })
/// })
/// .await?;
/// ```
pub async fn run_in_unit_of_work<U, T, E, F>(uow: &mut U, body: F) -> std::result::Result<T, E>
where
    U: UnitOfWork + ?Sized,
    E: From<StoreError>,
    F: for<'u> FnOnce(&'u mut U) -> BoxFuture<'u, std::result::Result<T, E>>,
{
    uow.enter().await?;

    let result = body(&mut *uow).await;
    let exited = uow.exit().await;

    match (result, exited) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(exit_err)) => Err(exit_err.into()),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(exit_err)) => {
            tracing::warn!(error = %exit_err, "rollback failed while propagating an error");
            Err(err)
        }
    }
}
