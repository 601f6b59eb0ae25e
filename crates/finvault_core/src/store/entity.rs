//! Entity contract and lifecycle envelope.
//!
//! # Responsibility
//! - Bind a Rust type to one SQLite table at compile time.
//! - Separate store-managed lifecycle fields from business fields.
//!
//! # Invariants
//! - `Entity::COLUMNS` and `Entity::to_values()` use the same order.
//! - Business columns never reuse lifecycle column names.
//! - `updated_at >= created_at` for every stored record.

use crate::db::DbResult;
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable record identifier generated by the store.
pub type RecordId = Uuid;

/// Lifecycle columns every store-managed table must carry.
pub const LIFECYCLE_COLUMNS: [&str; 4] = ["id", "created_at", "updated_at", "deleted_at"];

/// Business payload persisted through a `RecordStore`.
pub trait Entity: Sized {
    /// Table holding rows of this entity.
    const TABLE: &'static str;
    /// Business columns, excluding lifecycle columns.
    const COLUMNS: &'static [&'static str];

    /// Partial change applied by `update`/`update_many`.
    type Patch;

    /// Column values in `COLUMNS` order.
    fn to_values(&self) -> Vec<Value>;

    /// Reads business columns by name from a row selected by the store.
    fn from_row(row: &Row<'_>) -> DbResult<Self>;

    /// Merges `patch` into `self`. Unset patch fields leave values untouched.
    fn apply_patch(&mut self, patch: &Self::Patch);

    /// Business rules checked before every write.
    fn validate(&self) -> Result<(), RecordValidationError> {
        Ok(())
    }
}

/// Stored entity plus the lifecycle fields owned by the store.
///
/// Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record<T> {
    pub id: RecordId,
    /// Set once at creation.
    pub created_at: i64,
    /// Set at creation and bumped by every mutation.
    pub updated_at: i64,
    /// `None` while live, set while soft-deleted.
    pub deleted_at: Option<i64>,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Record<T> {
    /// Returns whether this record is visible to default reads.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Entity rejected by its own business rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordValidationError {
    pub table: &'static str,
    pub field: &'static str,
    pub reason: String,
}

impl RecordValidationError {
    pub fn new(table: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            table,
            field,
            reason: reason.into(),
        }
    }
}

impl Display for RecordValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}.{}: {}", self.table, self.field, self.reason)
    }
}

impl Error for RecordValidationError {}
