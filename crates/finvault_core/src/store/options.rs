//! Transaction policy and time source for record store writes.

use rusqlite::TransactionBehavior;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5_000);
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1_000);
const MIN_TRANSACTION_TIMEOUT: Duration = Duration::from_millis(1);

/// Longest per-attempt timeout SQLite's busy handler accepts (`i32::MAX` ms).
pub const MAX_TRANSACTION_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

/// SQLite lock mode taken by `BEGIN`.
///
/// SQLite transactions are always serializable; the level decides how early
/// the write lock is taken. `Exclusive` is the strictest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Locks are taken lazily on first read/write.
    Deferred,
    /// Write lock is taken at `BEGIN`.
    Immediate,
    /// Write lock is taken at `BEGIN` and readers are excluded outside WAL mode.
    #[default]
    Exclusive,
}

impl IsolationLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deferred" => Some(Self::Deferred),
            "immediate" => Some(Self::Immediate),
            "exclusive" | "serializable" => Some(Self::Exclusive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deferred => "deferred",
            Self::Immediate => "immediate",
            Self::Exclusive => "exclusive",
        }
    }

    pub(crate) fn behavior(self) -> TransactionBehavior {
        match self {
            Self::Deferred => TransactionBehavior::Deferred,
            Self::Immediate => TransactionBehavior::Immediate,
            Self::Exclusive => TransactionBehavior::Exclusive,
        }
    }
}

/// Retry, timeout and isolation policy applied to every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    max_attempts: u32,
    timeout: Duration,
    isolation: IsolationLevel,
    backoff_base: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
            isolation: IsolationLevel::default(),
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl TransactionOptions {
    /// Total attempts including the first one. Zero is treated as one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Deadline for one attempt, lock waits included.
    ///
    /// Clamped to `1 ms..=MAX_TRANSACTION_TIMEOUT`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.clamp(MIN_TRANSACTION_TIMEOUT, MAX_TRANSACTION_TIMEOUT);
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Scale of the jittered backoff: `random(0,1) * base * attempt`.
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }
}

/// Source of lifecycle timestamps in Unix epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

impl<F> Clock for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now_ms(&self) -> i64 {
        self()
    }
}
