//! Batch selection policy.
//!
//! In-stock batches are preferred over shipments, and shipments are preferred
//! by earliest ETA. Among equally preferred batches the first one in the
//! given order wins, so selection is deterministic for a given batch list.

use common::BatchReference;

use super::{AllocationError, Batch, OrderLine};

/// Returns the index of the batch the line should be allocated to.
///
/// Returns `None` when no batch can take the whole line.
pub fn select_batch(line: &OrderLine, batches: &[Batch]) -> Option<usize> {
    // min_by keeps the first of several equal minima, which matches a stable
    // sort followed by a linear scan.
    batches
        .iter()
        .enumerate()
        .filter(|(_, batch)| batch.can_allocate(line))
        .min_by(|(_, a), (_, b)| a.cmp_eta(b))
        .map(|(index, _)| index)
}

/// Allocates the line to the preferred batch from an explicit batch list.
///
/// A line already held by one of the batches stays where it is. Batches are
/// left untouched when the line cannot be placed.
pub fn allocate(
    line: &OrderLine,
    batches: &mut [Batch],
) -> Result<BatchReference, AllocationError> {
    if let Some(holder) = batches.iter().find(|b| b.is_allocated(line)) {
        return Ok(holder.reference().clone());
    }

    let index = select_batch(line, batches).ok_or_else(|| AllocationError::OutOfStock {
        sku: line.sku().clone(),
    })?;

    let batch = &mut batches[index];
    batch.allocate(line);
    Ok(batch.reference().clone())
}
