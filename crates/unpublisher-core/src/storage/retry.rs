//! Retry for SQLite writes that race with other connections
//!
//! The scheduler, the queue worker and the admin surface share one database
//! file, so a write can hit SQLITE_BUSY or a transient I/O error.

use std::future::Future;
use std::time::Duration;

/// Retries after the first attempt before a transient error is surfaced
pub const MAX_RETRIES: u32 = 5;

const BASE_DELAY: Duration = Duration::from_millis(200);

/// SQLite result codes worth another attempt: BUSY, LOCKED, IOERR and the
/// extended BUSY_SNAPSHOT / IOERR_{READ,SHORT_READ,WRITE,FSYNC,LOCK} seen on WAL
const TRANSIENT_CODES: &[i32] = &[5, 6, 10, 266, 522, 1032, 2314, 3338, 5386];

/// Whether `err` is a lock or I/O hiccup rather than a real failure
pub fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| TRANSIENT_CODES.contains(&code)),
        _ => false,
    }
}

/// Delay before retry number `retry` (1-based), doubling each time
fn backoff_delay(retry: u32) -> Duration {
    BASE_DELAY * 2u32.pow(retry.saturating_sub(1))
}

/// Run a database operation, retrying transient failures with backoff
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    operation: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut retry = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if retry >= MAX_RETRIES || !is_transient_error(&err) {
            return Err(err);
        }

        retry += 1;
        let delay = backoff_delay(retry);
        tracing::debug!(
            operation = operation_name,
            retry,
            delay_ms = delay.as_millis() as u64,
            "Transient database error ({}), retrying",
            err
        );
        tokio::time::sleep(delay).await;
    }
}
