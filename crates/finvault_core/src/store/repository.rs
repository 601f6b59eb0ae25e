//! Record repository contract.
//!
//! # Invariants
//! - Default reads never return soft-deleted records.
//! - Writes never hard-delete rows.
//! - Bulk update/delete silently skip ids that are missing or already deleted.

use crate::store::entity::{Entity, Record, RecordId};
use crate::store::error::StoreResult;

/// Sort key for `ListQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

/// Query options for listing records.
///
/// Ties are broken by `id ASC` so pages are stable.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub include_deleted: bool,
    pub order_by: OrderBy,
    pub direction: SortDirection,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// CRUD contract over one record collection.
pub trait RecordRepository<T: Entity> {
    /// Looks up one record by id, optionally including soft-deleted rows.
    fn get(&self, id: RecordId, include_deleted: bool) -> StoreResult<Option<Record<T>>>;

    /// Lists records with visibility, ordering and pagination options.
    fn list(&self, query: &ListQuery) -> StoreResult<Vec<Record<T>>>;

    /// Counts live records, or all records when `include_deleted` is set.
    fn count(&self, include_deleted: bool) -> StoreResult<u64>;

    /// Persists `data` as a new live record.
    fn create(&self, data: T) -> StoreResult<Record<T>>;

    /// Persists every item with one shared timestamp, all or nothing.
    fn create_many(&self, items: Vec<T>) -> StoreResult<Vec<Record<T>>>;

    /// Applies `patch` to one live record.
    ///
    /// # Errors
    /// - `NotFound` when the id is missing or soft-deleted.
    fn update(&self, id: RecordId, patch: &T::Patch) -> StoreResult<Record<T>>;

    /// Applies `patch` to every live record in `ids` and returns those records.
    fn update_many(&self, ids: &[RecordId], patch: &T::Patch) -> StoreResult<Vec<Record<T>>>;

    /// Marks one live record as deleted.
    ///
    /// # Errors
    /// - `NotFound` when the id is missing or already deleted.
    fn soft_delete(&self, id: RecordId) -> StoreResult<()>;

    /// Marks every live record in `ids` as deleted.
    fn delete_many(&self, ids: &[RecordId]) -> StoreResult<()>;

    /// Clears the deletion mark. Restoring a live record is a no-op.
    ///
    /// # Errors
    /// - `NotFound` when no record with this id exists at all.
    fn restore(&self, id: RecordId) -> StoreResult<()>;

    /// Lists all live records, or every record when `include_deleted` is set.
    fn find_all(&self, include_deleted: bool) -> StoreResult<Vec<Record<T>>> {
        self.list(&ListQuery {
            include_deleted,
            ..ListQuery::default()
        })
    }

    /// Looks up one live record.
    fn find_by_id(&self, id: RecordId) -> StoreResult<Option<Record<T>>> {
        self.get(id, false)
    }
}
