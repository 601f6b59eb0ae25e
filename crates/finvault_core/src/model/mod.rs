//! Finance entities persisted through the record store.
//!
//! # Invariants
//! - Every entity maps to one migrated table.
//! - Deletion is represented by the store's `deleted_at` mark, not hard delete.

pub mod bill;
pub mod subscription;
