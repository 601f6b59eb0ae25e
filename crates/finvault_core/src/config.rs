//! Environment-driven configuration for hosts embedding the record store.
//!
//! # Responsibility
//! - Resolve the database location from a connection string.
//! - Resolve transaction retry/timeout/isolation knobs.
//! - Resolve logging level and directory.
//!
//! # Invariants
//! - Parsing never reads process env directly except through `from_env`.
//! - Unset optional keys fall back to `TransactionOptions::default()`.

use crate::logging::{default_log_level, normalize_level};
use crate::store::{IsolationLevel, TransactionOptions, MAX_TRANSACTION_TIMEOUT};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DATABASE_URL: &str = "FINVAULT_DATABASE_URL";
pub const ENV_TX_MAX_ATTEMPTS: &str = "FINVAULT_TX_MAX_ATTEMPTS";
pub const ENV_TX_TIMEOUT_MS: &str = "FINVAULT_TX_TIMEOUT_MS";
pub const ENV_TX_ISOLATION: &str = "FINVAULT_TX_ISOLATION";
pub const ENV_TX_BACKOFF_MS: &str = "FINVAULT_TX_BACKOFF_MS";
pub const ENV_LOG_LEVEL: &str = "FINVAULT_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "FINVAULT_LOG_DIR";

const SQLITE_URL_PREFIX: &str = "sqlite://";
const MEMORY_LOCATION: &str = ":memory:";

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

impl DatabaseLocation {
    /// Parses `path`, `sqlite://path` or `:memory:`.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let trimmed = url.trim();
        let location = trimmed.strip_prefix(SQLITE_URL_PREFIX).unwrap_or(trimmed);
        if location.is_empty() {
            return Err(ConfigError::Invalid {
                key: ENV_DATABASE_URL,
                value: url.to_string(),
                reason: "database location cannot be empty".to_string(),
            });
        }
        if location == MEMORY_LOCATION {
            return Ok(Self::Memory);
        }
        Ok(Self::File(PathBuf::from(location)))
    }
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database: DatabaseLocation,
    pub transactions: TransactionOptions,
    pub log_level: &'static str,
    /// Logging stays disabled when unset.
    pub log_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// Loads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which maps a key to its value.
    ///
    /// # Errors
    /// - `Missing` when the database URL is unset.
    /// - `Invalid` when any value cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup(ENV_DATABASE_URL).ok_or(ConfigError::Missing(ENV_DATABASE_URL))?;
        let database = DatabaseLocation::parse(&url)?;

        let mut transactions = TransactionOptions::default();
        if let Some(value) = lookup(ENV_TX_MAX_ATTEMPTS) {
            let attempts = parse_u64(ENV_TX_MAX_ATTEMPTS, &value)?;
            let attempts = u32::try_from(attempts).map_err(|_| ConfigError::Invalid {
                key: ENV_TX_MAX_ATTEMPTS,
                value: value.clone(),
                reason: "value does not fit in u32".to_string(),
            })?;
            transactions = transactions.with_max_attempts(attempts);
        }
        if let Some(value) = lookup(ENV_TX_TIMEOUT_MS) {
            let millis = parse_u64(ENV_TX_TIMEOUT_MS, &value)?;
            if millis == 0 {
                return Err(ConfigError::Invalid {
                    key: ENV_TX_TIMEOUT_MS,
                    value,
                    reason: "timeout must be greater than zero".to_string(),
                });
            }
            let timeout = Duration::from_millis(millis);
            if timeout > MAX_TRANSACTION_TIMEOUT {
                return Err(ConfigError::Invalid {
                    key: ENV_TX_TIMEOUT_MS,
                    value,
                    reason: format!(
                        "timeout must be at most {} ms",
                        MAX_TRANSACTION_TIMEOUT.as_millis()
                    ),
                });
            }
            transactions = transactions.with_timeout(timeout);
        }
        if let Some(value) = lookup(ENV_TX_ISOLATION) {
            let isolation =
                IsolationLevel::parse(&value).ok_or_else(|| ConfigError::Invalid {
                    key: ENV_TX_ISOLATION,
                    value: value.clone(),
                    reason: "expected deferred|immediate|exclusive".to_string(),
                })?;
            transactions = transactions.with_isolation(isolation);
        }
        if let Some(value) = lookup(ENV_TX_BACKOFF_MS) {
            let millis = parse_u64(ENV_TX_BACKOFF_MS, &value)?;
            transactions = transactions.with_backoff_base(Duration::from_millis(millis));
        }

        let log_level = match lookup(ENV_LOG_LEVEL) {
            Some(value) => normalize_level(&value).map_err(|reason| ConfigError::Invalid {
                key: ENV_LOG_LEVEL,
                value: value.clone(),
                reason,
            })?,
            None => default_log_level(),
        };
        let log_dir = lookup(ENV_LOG_DIR)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            database,
            transactions,
            log_level,
            log_dir,
        })
    }
}

/// Configuration loading failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "required setting `{key}` is not set"),
            Self::Invalid { key, value, reason } => {
                write!(f, "invalid value `{value}` for `{key}`: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn database_url_is_required() {
        let err = StoreConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing(ENV_DATABASE_URL));
    }

    #[test]
    fn defaults_apply_when_only_database_is_set() {
        let config =
            StoreConfig::from_lookup(lookup_from(&[(ENV_DATABASE_URL, "sqlite://:memory:")]))
                .unwrap();
        assert_eq!(config.database, DatabaseLocation::Memory);
        assert_eq!(config.transactions, TransactionOptions::default());
        assert_eq!(config.log_level, default_log_level());
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn transaction_knobs_are_parsed() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            (ENV_DATABASE_URL, "/var/lib/finvault/ledger.db"),
            (ENV_TX_MAX_ATTEMPTS, "5"),
            (ENV_TX_TIMEOUT_MS, "250"),
            (ENV_TX_ISOLATION, "Immediate"),
            (ENV_TX_BACKOFF_MS, "10"),
            (ENV_LOG_LEVEL, " WARNING "),
        ]))
        .unwrap();

        assert_eq!(
            config.database,
            DatabaseLocation::File(PathBuf::from("/var/lib/finvault/ledger.db"))
        );
        assert_eq!(config.transactions.max_attempts(), 5);
        assert_eq!(config.transactions.timeout(), Duration::from_millis(250));
        assert_eq!(config.transactions.isolation(), IsolationLevel::Immediate);
        assert_eq!(config.transactions.backoff_base(), Duration::from_millis(10));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn timeout_beyond_sqlite_limit_is_rejected() {
        let err = StoreConfig::from_lookup(lookup_from(&[
            (ENV_DATABASE_URL, ":memory:"),
            (ENV_TX_TIMEOUT_MS, "3000000000"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: ENV_TX_TIMEOUT_MS,
                ..
            }
        ));

        let config = StoreConfig::from_lookup(lookup_from(&[
            (ENV_DATABASE_URL, ":memory:"),
            (ENV_TX_TIMEOUT_MS, "2147483647"),
        ]))
        .unwrap();
        assert_eq!(config.transactions.timeout(), MAX_TRANSACTION_TIMEOUT);
    }

    #[test]
    fn invalid_values_name_the_offending_key() {
        let err = StoreConfig::from_lookup(lookup_from(&[
            (ENV_DATABASE_URL, ":memory:"),
            (ENV_TX_TIMEOUT_MS, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: ENV_TX_TIMEOUT_MS,
                ..
            }
        ));

        let err = StoreConfig::from_lookup(lookup_from(&[
            (ENV_DATABASE_URL, ":memory:"),
            (ENV_TX_ISOLATION, "serializable-ish"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(ENV_TX_ISOLATION));
    }

    #[test]
    fn empty_database_url_is_rejected() {
        let err = DatabaseLocation::parse("sqlite://").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
