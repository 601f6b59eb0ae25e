//! Subscription domain model.

use crate::db::{DbError, DbResult};
use crate::store::{Entity, RecordValidationError};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// How often a subscription charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    fn as_db(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    fn parse_db(value: &str) -> Option<Self> {
        match value {
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }
}

/// Paid service charging on a fixed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub service_name: String,
    /// Charge per cycle in minor currency units.
    pub cost_cents: i64,
    pub billing_cycle: BillingCycle,
    /// Unix epoch milliseconds of the next expected charge.
    pub next_charge_at: Option<i64>,
}

impl Subscription {
    pub fn new(service_name: impl Into<String>, cost_cents: i64, billing_cycle: BillingCycle) -> Self {
        Self {
            service_name: service_name.into(),
            cost_cents,
            billing_cycle,
            next_charge_at: None,
        }
    }

    /// Cost normalized to one month, rounded to the nearest cent.
    pub fn monthly_cost_cents(&self) -> i64 {
        match self.billing_cycle {
            BillingCycle::Monthly => self.cost_cents,
            BillingCycle::Yearly => (self.cost_cents + 6) / 12,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPatch {
    pub service_name: Option<String>,
    pub cost_cents: Option<i64>,
    pub billing_cycle: Option<BillingCycle>,
    pub next_charge_at: Option<Option<i64>>,
}

impl Entity for Subscription {
    const TABLE: &'static str = "subscriptions";
    const COLUMNS: &'static [&'static str] =
        &["service_name", "cost_cents", "billing_cycle", "next_charge_at"];

    type Patch = SubscriptionPatch;

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.service_name.clone()),
            Value::Integer(self.cost_cents),
            Value::Text(self.billing_cycle.as_db().to_string()),
            self.next_charge_at.map_or(Value::Null, Value::Integer),
        ]
    }

    fn from_row(row: &Row<'_>) -> DbResult<Self> {
        let cycle_text: String = row.get("billing_cycle")?;
        let billing_cycle = BillingCycle::parse_db(&cycle_text).ok_or_else(|| {
            DbError::InvalidData(format!(
                "invalid billing cycle `{cycle_text}` in subscriptions.billing_cycle"
            ))
        })?;
        Ok(Self {
            service_name: row.get("service_name")?,
            cost_cents: row.get("cost_cents")?,
            billing_cycle,
            next_charge_at: row.get("next_charge_at")?,
        })
    }

    fn apply_patch(&mut self, patch: &SubscriptionPatch) {
        if let Some(service_name) = &patch.service_name {
            self.service_name = service_name.clone();
        }
        if let Some(cost_cents) = patch.cost_cents {
            self.cost_cents = cost_cents;
        }
        if let Some(billing_cycle) = patch.billing_cycle {
            self.billing_cycle = billing_cycle;
        }
        if let Some(next_charge_at) = patch.next_charge_at {
            self.next_charge_at = next_charge_at;
        }
    }

    fn validate(&self) -> Result<(), RecordValidationError> {
        if self.service_name.trim().is_empty() {
            return Err(RecordValidationError::new(
                Self::TABLE,
                "service_name",
                "must not be empty",
            ));
        }
        if self.cost_cents < 0 {
            return Err(RecordValidationError::new(
                Self::TABLE,
                "cost_cents",
                "must not be negative",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BillingCycle, Subscription};

    #[test]
    fn yearly_cost_is_spread_over_twelve_months() {
        let yearly = Subscription::new("Cloud backup", 11_988, BillingCycle::Yearly);
        assert_eq!(yearly.monthly_cost_cents(), 999);

        let monthly = Subscription::new("Music", 1_099, BillingCycle::Monthly);
        assert_eq!(monthly.monthly_cost_cents(), 1_099);
    }
}
