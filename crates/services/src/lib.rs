//! Application services for the allocation system.
//!
//! Each service runs in exactly one unit of work: it loads the product for a
//! SKU, applies one change to it and commits. Anything that fails before the
//! commit is rolled back and the error is returned unchanged.
//!
//! ```ignore
//! let store = InMemoryStore::new();
//! let mut uow = store.unit_of_work();
//!
//! add_batch(AddBatch::new("B1", "TABLE", 20, None), &mut uow).await?;
//! let batch = allocate(Allocate::new("O1", "TABLE", 2), &mut uow).await?;
//! assert_eq!(batch, "B1");
//! ```

pub mod commands;
pub mod error;
pub mod handlers;

pub use commands::{AddBatch, Allocate};
pub use error::{Result, ServiceError};
pub use handlers::{add_batch, allocate};
