//! Bill use-case service.
//!
//! # Responsibility
//! - Provide bill-level entry points for dashboard callers.
//! - Delegate persistence and lifecycle rules to a `RecordRepository`.
//!
//! # Invariants
//! - Service APIs never bypass repository validation/persistence contracts.
//! - Service layer remains storage-agnostic.

use crate::model::bill::{Bill, BillPatch};
use crate::store::{
    Entity, ListQuery, OrderBy, Record, RecordId, RecordRepository, RecordValidationError,
    SortDirection, StoreResult,
};

/// Use-case service wrapper for bill operations.
pub struct BillService<R: RecordRepository<Bill>> {
    repo: R,
}

impl<R: RecordRepository<Bill>> BillService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Adds a bill without a category.
    pub fn add_bill(
        &self,
        name: impl Into<String>,
        amount_cents: i64,
        due_day: u8,
    ) -> StoreResult<Record<Bill>> {
        self.repo.create(Bill::new(name, amount_cents, due_day))
    }

    /// Changes the amount of a live bill.
    pub fn change_amount(&self, id: RecordId, amount_cents: i64) -> StoreResult<Record<Bill>> {
        self.repo.update(id, &BillPatch::amount(amount_cents))
    }

    /// Applies an arbitrary patch to a live bill.
    pub fn edit_bill(&self, id: RecordId, patch: &BillPatch) -> StoreResult<Record<Bill>> {
        self.repo.update(id, patch)
    }

    /// Soft-deletes a bill; it can be brought back with `reinstate_bill`.
    pub fn cancel_bill(&self, id: RecordId) -> StoreResult<()> {
        self.repo.soft_delete(id)
    }

    pub fn reinstate_bill(&self, id: RecordId) -> StoreResult<()> {
        self.repo.restore(id)
    }

    pub fn get_bill(&self, id: RecordId) -> StoreResult<Option<Record<Bill>>> {
        self.repo.find_by_id(id)
    }

    /// Live bills ordered by due day, then name.
    pub fn active_bills(&self) -> StoreResult<Vec<Record<Bill>>> {
        let mut bills = self.repo.list(&ListQuery {
            order_by: OrderBy::CreatedAt,
            direction: SortDirection::Ascending,
            ..ListQuery::default()
        })?;
        bills.sort_by(|left, right| {
            left.data
                .due_day
                .cmp(&right.data.due_day)
                .then_with(|| left.data.name.cmp(&right.data.name))
        });
        Ok(bills)
    }

    /// Sum of live bill amounts.
    ///
    /// # Errors
    /// - `Validation` when the total does not fit in `i64`.
    pub fn monthly_total_cents(&self) -> StoreResult<i64> {
        self.repo
            .find_all(false)?
            .iter()
            .try_fold(0_i64, |total, record| total.checked_add(record.data.amount_cents))
            .ok_or_else(|| {
                RecordValidationError::new(Bill::TABLE, "amount_cents", "monthly total overflows")
                    .into()
            })
    }
}
