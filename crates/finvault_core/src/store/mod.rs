//! Transactional record store.
//!
//! # Responsibility
//! - Provide uniform create/read/update/soft-delete/restore operations over
//!   one table per entity type.
//! - Hide transaction orchestration: lock mode, per-attempt deadline, and
//!   jittered retry on lock contention.
//! - Translate SQLite failures into the `ErrorKind` taxonomy.
//!
//! # Invariants
//! - Rows are never physically deleted by the store.
//! - Lifecycle columns (`id`, `created_at`, `updated_at`, `deleted_at`) are
//!   owned by the store; business columns are owned by the `Entity`.
//! - The store holds no caches; every call reads or writes SQLite directly.

mod entity;
mod error;
mod options;
mod repository;
mod sqlite;
mod transaction;

pub use entity::{Entity, Record, RecordId, RecordValidationError, LIFECYCLE_COLUMNS};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use options::{
    Clock, IsolationLevel, SystemClock, TransactionOptions, MAX_TRANSACTION_TIMEOUT,
};
pub use repository::{ListQuery, OrderBy, RecordRepository, SortDirection};
pub use sqlite::RecordStore;
