//! Retried, deadline-bounded SQLite transactions.
//!
//! # Responsibility
//! - Run one write body inside a transaction at the configured lock mode.
//! - Race each attempt against its deadline and roll back on expiry.
//! - Retry lock contention and timeouts with jittered backoff.
//!
//! # Invariants
//! - Only `StoreError::is_retryable()` failures are retried.
//! - Backoff before attempt `n + 1` is `random(0,1) * backoff_base * n`.
//! - The progress handler is removed before the transaction commits or
//!   rolls back, so finishing a transaction is never interrupted.
//! - The connection busy timeout is set to the attempt timeout while a
//!   write runs, so lock waits count against the same deadline. The
//!   caller's busy timeout is put back when the attempt ends.

use crate::store::error::{sqlite_error_code, ErrorKind, StoreError, StoreResult};
use crate::store::options::{Clock, TransactionOptions, MAX_TRANSACTION_TIMEOUT};
use log::{debug, error, warn};
use rusqlite::{Connection, ErrorCode, Transaction};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// SQLite VM instructions between deadline checks.
const PROGRESS_CHECK_OPS: i32 = 1_000;

/// Executes write bodies under a `TransactionOptions` policy.
pub(crate) struct TransactionRunner<'conn> {
    conn: &'conn Connection,
    options: TransactionOptions,
    clock: Arc<dyn Clock>,
}

impl<'conn> TransactionRunner<'conn> {
    pub(crate) fn new(
        conn: &'conn Connection,
        options: TransactionOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            conn,
            options,
            clock,
        }
    }

    pub(crate) fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub(crate) fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Runs `body` until it commits, fails permanently, or attempts run out.
    ///
    /// `body` receives the open transaction and the attempt's start instant
    /// in epoch milliseconds. It may run more than once.
    pub(crate) fn run<R>(
        &self,
        table: &'static str,
        operation: &'static str,
        mut body: impl FnMut(&Connection, i64) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let started_at = Instant::now();
        let max_attempts = self.options.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.run_attempt(&mut body) {
                Ok(value) => {
                    debug!(
                        "event=store_write module=store status=ok table={} op={} attempts={} duration_ms={}",
                        table,
                        operation,
                        attempt,
                        started_at.elapsed().as_millis()
                    );
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                if err.kind() != ErrorKind::NotFound {
                    error!(
                        "event=store_write module=store status=error table={} op={} attempts={} duration_ms={} error_code={} error={}",
                        table,
                        operation,
                        attempt,
                        started_at.elapsed().as_millis(),
                        err.kind().as_str(),
                        err
                    );
                }
                return Err(err);
            }

            if attempt >= max_attempts {
                error!(
                    "event=store_write module=store status=exhausted table={} op={} attempts={} duration_ms={} error_code={} error={}",
                    table,
                    operation,
                    attempt,
                    started_at.elapsed().as_millis(),
                    err.kind().as_str(),
                    err
                );
                return Err(err);
            }

            let delay = backoff_delay(self.options.backoff_base(), attempt);
            warn!(
                "event=store_write module=store status=retry table={} op={} attempt={} max_attempts={} backoff_ms={} error_code={}",
                table,
                operation,
                attempt,
                max_attempts,
                delay.as_millis(),
                err.kind().as_str()
            );
            thread::sleep(delay);
        }
    }

    fn run_attempt<R>(
        &self,
        body: &mut impl FnMut(&Connection, i64) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let timeout = self.options.timeout();
        let deadline = Instant::now() + timeout;
        let _busy_timeout = BusyTimeoutGuard::arm(self.conn, timeout)?;

        // Lock contention at BEGIN stays classified by its SQLite code.
        let tx = Transaction::new_unchecked(self.conn, self.options.isolation().behavior())?;
        let now = self.clock.now_ms();

        let outcome = {
            let _deadline = DeadlineGuard::arm(self.conn, deadline);
            body(&*tx, now)
        };
        let expired = Instant::now() >= deadline;

        match outcome {
            Ok(value) if !expired => {
                tx.commit()?;
                Ok(value)
            }
            Ok(_) => {
                drop(tx);
                Err(StoreError::TransactionTimeout { timeout })
            }
            Err(err) => {
                drop(tx);
                if is_deadline_failure(&err, expired) {
                    Err(StoreError::TransactionTimeout { timeout })
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// Swaps in the attempt timeout as the busy timeout and restores the
/// connection's previous value on drop.
struct BusyTimeoutGuard<'conn> {
    conn: &'conn Connection,
    previous: Duration,
}

impl<'conn> BusyTimeoutGuard<'conn> {
    fn arm(conn: &'conn Connection, timeout: Duration) -> StoreResult<Self> {
        let previous_ms: i64 = conn.pragma_query_value(None, "busy_timeout", |row| row.get(0))?;
        let previous = Duration::from_millis(u64::try_from(previous_ms).unwrap_or(0));
        conn.busy_timeout(timeout.min(MAX_TRANSACTION_TIMEOUT))?;
        Ok(Self { conn, previous })
    }
}

impl Drop for BusyTimeoutGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self
            .conn
            .busy_timeout(self.previous.min(MAX_TRANSACTION_TIMEOUT))
        {
            warn!(
                "event=store_busy_timeout module=store status=error error_code=restore_failed error={}",
                err
            );
        }
    }
}

/// Interrupts running statements once `deadline` passes.
struct DeadlineGuard<'conn> {
    conn: &'conn Connection,
}

impl<'conn> DeadlineGuard<'conn> {
    fn arm(conn: &'conn Connection, deadline: Instant) -> Self {
        conn.progress_handler(
            PROGRESS_CHECK_OPS,
            Some(move || Instant::now() >= deadline),
        );
        Self { conn }
    }
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

/// Caller errors (not found, validation, constraint) keep their kind even when
/// the deadline also passed.
fn is_deadline_failure(err: &StoreError, expired: bool) -> bool {
    let interrupted = match err {
        StoreError::Storage(crate::db::DbError::Sqlite(inner)) => {
            sqlite_error_code(inner) == Some(ErrorCode::OperationInterrupted)
        }
        _ => false,
    };
    interrupted
        || (expired
            && matches!(
                err.kind(),
                ErrorKind::Storage | ErrorKind::TransactionAborted
            ))
}

/// `random(0,1) * base * attempt`, where `attempt` is the 1-based number of
/// the attempt that just failed.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let jitter: f64 = rand::random();
    base.mul_f64(jitter * f64::from(attempt))
}

#[cfg(test)]
mod tests {
    use super::{backoff_delay, TransactionRunner};
    use crate::store::error::{ErrorKind, StoreError};
    use crate::store::options::{SystemClock, TransactionOptions};
    use rusqlite::{ffi, Connection};
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn runner(conn: &Connection, options: TransactionOptions) -> TransactionRunner<'_> {
        TransactionRunner::new(conn, options, Arc::new(SystemClock))
    }

    fn fast_options() -> TransactionOptions {
        TransactionOptions::default()
            .with_backoff_base(Duration::from_millis(1))
            .with_timeout(Duration::from_millis(500))
    }

    #[test]
    fn backoff_is_bounded_by_base_times_attempt() {
        let base = Duration::from_millis(1_000);
        for attempt in 1..=5 {
            for _ in 0..50 {
                assert!(backoff_delay(base, attempt) <= base * attempt);
            }
        }
        assert_eq!(backoff_delay(Duration::ZERO, 3), Duration::ZERO);
    }

    fn busy_timeout_ms(conn: &Connection) -> i64 {
        conn.pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn caller_busy_timeout_survives_writes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.busy_timeout(Duration::from_millis(5_000)).unwrap();
        let options = fast_options().with_timeout(Duration::from_millis(7));

        runner(&conn, options.clone())
            .run("t", "op", |_, _| Ok(()))
            .unwrap();
        assert_eq!(busy_timeout_ms(&conn), 5_000);

        runner(&conn, options.with_max_attempts(1))
            .run("t", "op", |_, _| -> Result<(), StoreError> {
                Err(StoreError::NotFound(uuid::Uuid::nil()))
            })
            .unwrap_err();
        assert_eq!(busy_timeout_ms(&conn), 5_000);
    }

    #[test]
    fn writes_take_over_the_progress_handler() {
        let conn = Connection::open_in_memory().unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        conn.progress_handler(
            1,
            Some(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            }),
        );

        runner(&conn, fast_options())
            .run("t", "op", |_, _| Ok(()))
            .unwrap();
        let after_write = ticks.load(Ordering::SeqCst);

        let _: i64 = conn
            .query_row(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 1000)
                 SELECT SUM(x) FROM n;",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), after_write);
    }

    #[test]
    fn timeout_beyond_sqlite_limit_does_not_panic() {
        let conn = Connection::open_in_memory().unwrap();
        let options =
            TransactionOptions::default().with_timeout(Duration::from_millis(3_000_000_000));

        let value = runner(&conn, options).run("t", "op", |_, _| Ok(7)).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn busy_failures_are_retried_until_success() {
        let conn = Connection::open_in_memory().unwrap();
        let calls = Cell::new(0);

        let value = runner(&conn, fast_options())
            .run("t", "op", |_, _| {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    return Err(StoreError::from(rusqlite::Error::SqliteFailure(
                        ffi::Error::new(ffi::SQLITE_BUSY),
                        None,
                    )));
                }
                Ok(42)
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausted_retries_surface_last_error() {
        let conn = Connection::open_in_memory().unwrap();
        let calls = Cell::new(0);

        let err = runner(&conn, fast_options().with_max_attempts(2))
            .run("t", "op", |_, _| -> Result<(), StoreError> {
                calls.set(calls.get() + 1);
                Err(StoreError::from(rusqlite::Error::SqliteFailure(
                    ffi::Error::new(ffi::SQLITE_LOCKED),
                    None,
                )))
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn non_retryable_errors_fail_on_first_attempt() {
        let conn = Connection::open_in_memory().unwrap();
        let calls = Cell::new(0);

        let err = runner(&conn, fast_options())
            .run("t", "op", |_, _| -> Result<(), StoreError> {
                calls.set(calls.get() + 1);
                Err(StoreError::NotFound(uuid::Uuid::nil()))
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn failed_attempts_roll_back_their_writes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER NOT NULL);")
            .unwrap();
        let calls = Cell::new(0);

        runner(&conn, fast_options())
            .run("t", "op", |tx, _| {
                calls.set(calls.get() + 1);
                tx.execute("INSERT INTO t (v) VALUES (?1);", [calls.get()])?;
                if calls.get() == 1 {
                    return Err(StoreError::from(rusqlite::Error::SqliteFailure(
                        ffi::Error::new(ffi::SQLITE_BUSY),
                        None,
                    )));
                }
                Ok(())
            })
            .unwrap();

        let values: Vec<i64> = conn
            .prepare("SELECT v FROM t;")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(values, vec![2]);
    }

    #[test]
    fn long_running_statement_is_interrupted_at_deadline() {
        let conn = Connection::open_in_memory().unwrap();
        let options = TransactionOptions::default()
            .with_timeout(Duration::from_millis(50))
            .with_backoff_base(Duration::from_millis(1))
            .with_max_attempts(2);
        let calls = Cell::new(0);

        let err = runner(&conn, options)
            .run("t", "op", |tx, _| {
                calls.set(calls.get() + 1);
                let total: i64 = tx.query_row(
                    "WITH RECURSIVE n(x) AS (
                        SELECT 1 UNION ALL SELECT x + 1 FROM n
                     )
                     SELECT SUM(x) FROM n;",
                    [],
                    |row| row.get(0),
                )?;
                Ok(total)
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::TransactionTimeout { .. }));
        assert_eq!(calls.get(), 2);

        // The handler is gone once the runner returns.
        let one: i64 = conn.query_row("SELECT 1;", [], |row| row.get(0)).unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn slow_body_that_finishes_late_is_rolled_back() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER NOT NULL);")
            .unwrap();
        let options = TransactionOptions::default()
            .with_timeout(Duration::from_millis(20))
            .with_max_attempts(1);

        let err = runner(&conn, options)
            .run("t", "op", |tx, _| {
                tx.execute("INSERT INTO t (v) VALUES (1);", [])?;
                std::thread::sleep(Duration::from_millis(40));
                Ok(())
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransactionTimeout);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
