//! Mutual exclusion between instances running migrations.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::core::{Connection, Dialect, Value};
use crate::error::{BackendError, DbErrorKind, MigrationError};

/// Name of the single-row lock table used by dialects without advisory locks.
pub const LOCK_TABLE: &str = "schema_migrations_lock";

// ASCII "guild_mg".
const ADVISORY_KEY: i64 = 0x6775_696c_645f_6d67;

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Lock rows older than this are assumed to belong to a crashed holder.
const STALE_LOCK_AGE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug)]
enum Release {
    Advisory(String),
    Table,
}

/// A held migration lock. Must be released on the connection that took it.
#[derive(Debug)]
pub(crate) struct MigrationLock {
    release: Release,
    holder: String,
}

fn lock_error(err: BackendError) -> MigrationError {
    MigrationError::Ledger {
        message: format!("migration lock: {}", err),
    }
}

/// Takes the migration lock, polling with backoff for at most `timeout`.
pub(crate) async fn acquire(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    timeout: Duration,
) -> Result<MigrationLock, MigrationError> {
    let holder = format!("{}:{}", std::process::id(), Uuid::new_v4());
    let started = Instant::now();
    let mut backoff = INITIAL_BACKOFF;

    if let Some(sql) = dialect.advisory_lock(ADVISORY_KEY) {
        loop {
            let rows = conn.query(&sql.try_lock, &[]).await.map_err(lock_error)?;
            let locked = rows
                .first()
                .and_then(|row| row.get("locked"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if locked {
                tracing::debug!(holder = %holder, "Acquired advisory migration lock");
                return Ok(MigrationLock {
                    release: Release::Advisory(sql.unlock),
                    holder,
                });
            }
            wait_turn(started, timeout, &mut backoff).await?;
        }
    }

    conn.execute_batch(&dialect.lock_table_ddl(LOCK_TABLE))
        .await
        .map_err(lock_error)?;
    let insert = format!(
        "INSERT INTO {} (id, holder, acquired_at) VALUES (1, {}, {})",
        dialect.quote_ident(LOCK_TABLE),
        dialect.placeholder(1),
        dialect.placeholder(2),
    );

    loop {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        match conn
            .execute(&insert, &[Value::from(holder.as_str()), Value::Text(now)])
            .await
        {
            Ok(_) => {
                tracing::debug!(holder = %holder, "Acquired table migration lock");
                return Ok(MigrationLock {
                    release: Release::Table,
                    holder,
                });
            }
            // Row already present, or the database itself is busy.
            Err(e) if is_contended(&e) => {
                tracing::debug!(error = %e, "Migration lock is held; waiting");
            }
            Err(e) => return Err(lock_error(e)),
        }

        if take_over_stale(conn, dialect).await? {
            continue;
        }
        wait_turn(started, timeout, &mut backoff).await?;
    }
}

fn is_contended(err: &BackendError) -> bool {
    matches!(
        err.db_kind(),
        Some(DbErrorKind::UniqueViolation | DbErrorKind::Busy)
    )
}

async fn wait_turn(
    started: Instant,
    timeout: Duration,
    backoff: &mut Duration,
) -> Result<(), MigrationError> {
    let elapsed = started.elapsed();
    if elapsed >= timeout {
        return Err(MigrationError::LockTimeout {
            timeout_ms: timeout.as_millis() as u64,
        });
    }
    tokio::time::sleep((*backoff).min(timeout - elapsed)).await;
    *backoff = (*backoff * 2).min(MAX_BACKOFF);
    Ok(())
}

/// Removes the lock row when its holder looks dead. Returns true only when a
/// stale row was deleted and the insert should be retried at once.
async fn take_over_stale(conn: &mut dyn Connection, dialect: &dyn Dialect) -> Result<bool, MigrationError> {
    let table = dialect.quote_ident(LOCK_TABLE);
    let rows = conn
        .query(
            &format!("SELECT holder, acquired_at FROM {} WHERE id = 1", table),
            &[],
        )
        .await
        .map_err(lock_error)?;

    // Released between our insert and this read; retry after the usual wait.
    let Some(row) = rows.first() else {
        return Ok(false);
    };
    let previous = row.get("holder").and_then(Value::as_str).unwrap_or_default();
    let acquired_at = row
        .get("acquired_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    let stale = match acquired_at {
        Some(at) => Utc::now()
            .signed_duration_since(at)
            .to_std()
            .is_ok_and(|age| age >= STALE_LOCK_AGE),
        None => true,
    };
    if !stale {
        return Ok(false);
    }

    let removed = conn
        .execute(
            &format!(
                "DELETE FROM {} WHERE id = 1 AND holder = {}",
                table,
                dialect.placeholder(1)
            ),
            &[Value::from(previous)],
        )
        .await
        .map_err(lock_error)?;
    if removed > 0 {
        tracing::warn!(
            previous_holder = %previous,
            acquired_at = ?acquired_at,
            "Took over stale migration lock"
        );
    }
    Ok(removed > 0)
}

impl MigrationLock {
    /// Releases the lock. Failures are logged, not returned.
    pub(crate) async fn release(self, conn: &mut dyn Connection, dialect: &dyn Dialect) {
        let result = match &self.release {
            Release::Advisory(sql) => conn.query(sql, &[]).await.map(|_| ()),
            Release::Table => conn
                .execute(
                    &format!(
                        "DELETE FROM {} WHERE id = 1 AND holder = {}",
                        dialect.quote_ident(LOCK_TABLE),
                        dialect.placeholder(1)
                    ),
                    &[Value::from(self.holder.as_str())],
                )
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => tracing::debug!(holder = %self.holder, "Released migration lock"),
            Err(e) => tracing::warn!(holder = %self.holder, error = %e, "Failed to release migration lock"),
        }
    }
}
