//! Bill domain model.
//!
//! # Invariants
//! - `name` is non-empty after trimming and unique among stored bills.
//! - `amount_cents` is in `0..=MAX_AMOUNT_CENTS`.
//! - `due_day` is a day of month in `1..=31`.

use crate::db::{DbError, DbResult};
use crate::store::{Entity, RecordValidationError};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

const MAX_NAME_CHARS: usize = 120;

/// Largest amount a single bill may carry, in minor units.
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000_000;

/// Recurring bill due once per month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    pub name: String,
    /// Amount in minor currency units.
    pub amount_cents: i64,
    /// Day of month the bill is due.
    pub due_day: u8,
    pub category: Option<String>,
}

impl Bill {
    pub fn new(name: impl Into<String>, amount_cents: i64, due_day: u8) -> Self {
        Self {
            name: name.into(),
            amount_cents,
            due_day,
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Partial bill change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillPatch {
    pub name: Option<String>,
    pub amount_cents: Option<i64>,
    pub due_day: Option<u8>,
    /// `Some(None)` clears the category.
    pub category: Option<Option<String>>,
}

impl BillPatch {
    pub fn amount(amount_cents: i64) -> Self {
        Self {
            amount_cents: Some(amount_cents),
            ..Self::default()
        }
    }
}

impl Entity for Bill {
    const TABLE: &'static str = "bills";
    const COLUMNS: &'static [&'static str] = &["name", "amount_cents", "due_day", "category"];

    type Patch = BillPatch;

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            Value::Integer(self.amount_cents),
            Value::Integer(i64::from(self.due_day)),
            self.category.clone().map_or(Value::Null, Value::Text),
        ]
    }

    fn from_row(row: &Row<'_>) -> DbResult<Self> {
        let due_day: i64 = row.get("due_day")?;
        let due_day = u8::try_from(due_day)
            .map_err(|_| DbError::InvalidData(format!("invalid bills.due_day `{due_day}`")))?;
        Ok(Self {
            name: row.get("name")?,
            amount_cents: row.get("amount_cents")?,
            due_day,
            category: row.get("category")?,
        })
    }

    fn apply_patch(&mut self, patch: &BillPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(amount_cents) = patch.amount_cents {
            self.amount_cents = amount_cents;
        }
        if let Some(due_day) = patch.due_day {
            self.due_day = due_day;
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
    }

    fn validate(&self) -> Result<(), RecordValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(RecordValidationError::new(
                Self::TABLE,
                "name",
                "must not be empty",
            ));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(RecordValidationError::new(
                Self::TABLE,
                "name",
                format!("must be at most {MAX_NAME_CHARS} characters"),
            ));
        }
        if self.amount_cents < 0 {
            return Err(RecordValidationError::new(
                Self::TABLE,
                "amount_cents",
                "must not be negative",
            ));
        }
        if self.amount_cents > MAX_AMOUNT_CENTS {
            return Err(RecordValidationError::new(
                Self::TABLE,
                "amount_cents",
                format!("must be at most {MAX_AMOUNT_CENTS}"),
            ));
        }
        if !(1..=31).contains(&self.due_day) {
            return Err(RecordValidationError::new(
                Self::TABLE,
                "due_day",
                "must be between 1 and 31",
            ));
        }
        Ok(())
    }
}
