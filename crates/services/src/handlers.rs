//! `add_batch` and `allocate`.

use common::BatchReference;
use domain::{AllocationError, Batch, OrderLine, Product};
use store::{UnitOfWork, run_in_unit_of_work};

use crate::{AddBatch, Allocate, Result, ServiceError};

/// Registers a batch, creating the product for its SKU on first use.
///
/// Fails only when the store does, e.g. with
/// [`StoreError::DuplicateBatch`](store::StoreError::DuplicateBatch) when the
/// reference is already taken.
#[tracing::instrument(skip(uow))]
pub async fn add_batch<U>(cmd: AddBatch, uow: &mut U) -> Result<()>
where
    U: UnitOfWork + ?Sized,
{
    let AddBatch {
        reference,
        sku,
        quantity,
        eta,
    } = cmd;

    run_in_unit_of_work(uow, move |uow| {
        Box::pin(async move {
            let batch = Batch::new(reference, sku.clone(), quantity, eta);
            let products = uow.products()?;
            match products.get(&sku).await? {
                Some(product) => product.add_batch(batch)?,
                None => {
                    tracing::debug!(%sku, "creating product");
                    products.add(Product::new(sku, vec![batch])?).await?
                }
            }
            uow.commit().await?;
            Ok::<(), ServiceError>(())
        })
    })
    .await?;

    metrics::counter!("batches_added_total").increment(1);
    tracing::info!("batch added");
    Ok(())
}

/// Allocates an order line and returns the reference of the chosen batch.
///
/// Fails with [`ServiceError::InvalidSku`] when no product exists for the
/// SKU, and with an [`AllocationError::OutOfStock`] when the product exists
/// but no batch can take the line. Nothing is persisted on failure.
#[tracing::instrument(skip(uow))]
pub async fn allocate<U>(cmd: Allocate, uow: &mut U) -> Result<BatchReference>
where
    U: UnitOfWork + ?Sized,
{
    let line = OrderLine::new(cmd.order_id, cmd.sku, cmd.quantity)?;
    let sku = line.sku().clone();
    let order_id = line.order_id().clone();

    let outcome: Result<BatchReference> = run_in_unit_of_work(uow, move |uow| {
        Box::pin(async move {
            let product = uow
                .products()?
                .get(line.sku())
                .await?
                .ok_or_else(|| ServiceError::InvalidSku(line.sku().clone()))?;
            let reference = product.allocate(&line)?;
            uow.commit().await?;
            Ok(reference)
        })
    })
    .await;

    match &outcome {
        Ok(reference) => {
            metrics::counter!("allocations_total").increment(1);
            tracing::info!(%sku, %order_id, batch = %reference, "order line allocated");
        }
        Err(ServiceError::Allocation(AllocationError::OutOfStock { .. })) => {
            metrics::counter!("allocations_out_of_stock_total").increment(1);
            tracing::warn!(%sku, %order_id, "out of stock");
        }
        Err(ServiceError::InvalidSku(_)) => {
            tracing::warn!(%sku, %order_id, "allocation for unknown sku");
        }
        Err(_) => {}
    }

    outcome
}
