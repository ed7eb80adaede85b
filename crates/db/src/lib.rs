//! Entities and low level storage interfaces of the cross-chain transfer store.

pub mod entities;
pub mod errors;
pub mod traits;
pub mod types;

/// Wrapper result type for database operations.
pub type DbResult<T> = anyhow::Result<T, errors::DbError>;

pub use errors::DbError;
