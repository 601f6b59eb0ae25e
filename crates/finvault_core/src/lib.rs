//! Core data-access layer for the finvault personal-finance dashboard.
//! This crate owns record lifecycle rules and transaction policy.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;

pub use config::{ConfigError, DatabaseLocation, StoreConfig};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::bill::{Bill, BillPatch, MAX_AMOUNT_CENTS};
pub use model::subscription::{BillingCycle, Subscription, SubscriptionPatch};
pub use service::bill_service::BillService;
pub use store::{
    Clock, Entity, ErrorKind, IsolationLevel, ListQuery, OrderBy, Record, RecordId,
    RecordRepository, RecordStore, RecordValidationError, SortDirection, StoreError, StoreResult,
    SystemClock, TransactionOptions,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
