//! Persistence boundary for the allocation system.
//!
//! The domain only sees [`ProductRepository`] and [`UnitOfWork`]; concrete
//! stores live behind them:
//! - [`InMemoryStore`] for tests and embedding
//! - [`PostgresUnitOfWork`] backed by sqlx

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod unit_of_work;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use memory::{InMemoryProductRepository, InMemoryStore, InMemoryUnitOfWork};
pub use postgres::{PostgresProductRepository, PostgresUnitOfWork, TableMapping};
pub use repository::ProductRepository;
pub use unit_of_work::{UnitOfWork, UnitOfWorkState, run_in_unit_of_work};
