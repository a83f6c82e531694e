//! SQLite-backed lease registry.
//!
//! All statements run on the blocking pool behind the shared connection
//! mutex, so a conditional `UPDATE ... RETURNING` is atomic with respect to
//! every other registry call.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::db::models::{Lease, LEASE_COLUMNS};
use crate::db::DbPool;
use crate::error::RegistryError;

/// Outcome of an atomic decrement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decrement {
    /// A download slot was taken; carries the post-decrement lease.
    Admitted(Lease),
    /// The lease exists but was not eligible; carries it unchanged.
    Ineligible(Lease),
}

#[derive(Clone)]
pub struct LeaseRegistry {
    db: DbPool,
}

impl LeaseRegistry {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run `f` against the locked connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, RegistryError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| RegistryError::Unavailable(format!("DB lock error: {}", e)))?;
            f(&conn)
        })
        .await?
    }

    /// Insert a new lease. Fails with `Conflict` if the token is taken.
    pub async fn create(&self, lease: Lease) -> Result<Lease, RegistryError> {
        self.with_conn(move |conn| {
            let rows = conn.execute(
                "INSERT INTO leases (token, original_name, blob_ref, content_sha256, size_bytes,
                    access_limit, remaining_downloads, expires_at_ms, created_at_ms, consumed_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)
                 ON CONFLICT(token) DO NOTHING",
                rusqlite::params![
                    lease.token,
                    lease.original_name,
                    lease.blob_ref,
                    lease.content_sha256,
                    lease.size_bytes,
                    lease.access_limit,
                    lease.remaining_downloads,
                    lease.expires_at.timestamp_millis(),
                    lease.created_at.timestamp_millis(),
                ],
            )?;
            if rows == 0 {
                return Err(RegistryError::Conflict(lease.token));
            }
            Ok(lease)
        })
        .await
    }

    pub async fn get(&self, token: &str) -> Result<Lease, RegistryError> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            select_lease(conn, &token)?.ok_or(RegistryError::NotFound(token))
        })
        .await
    }

    /// Atomically take one download slot if the lease is eligible at `now`.
    ///
    /// Eligible means `now <= expires_at` and `remaining_downloads > 0`. The
    /// check and the decrement are one statement, so when N callers race for
    /// the last slot exactly one is admitted.
    pub async fn decrement_and_get(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Decrement, RegistryError> {
        let token = token.to_string();
        let now_ms = now.timestamp_millis();
        self.with_conn(move |conn| {
            let sql = format!(
                "UPDATE leases
                 SET remaining_downloads = remaining_downloads - 1,
                     consumed_at_ms = CASE WHEN remaining_downloads = 1 THEN ?2 ELSE consumed_at_ms END
                 WHERE token = ?1 AND remaining_downloads > 0 AND expires_at_ms >= ?2
                 RETURNING {}",
                LEASE_COLUMNS
            );
            let admitted = conn
                .query_row(&sql, rusqlite::params![token, now_ms], Lease::from_row)
                .optional()?;

            match admitted {
                Some(lease) => Ok(Decrement::Admitted(lease)),
                None => match select_lease(conn, &token)? {
                    Some(lease) => Ok(Decrement::Ineligible(lease)),
                    None => Err(RegistryError::NotFound(token)),
                },
            }
        })
        .await
    }

    /// Give back a slot taken by an admission that ended up serving nothing.
    pub async fn restore_slot(&self, token: &str) -> Result<bool, RegistryError> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            let rows = conn.execute(
                "UPDATE leases
                 SET remaining_downloads = remaining_downloads + 1, consumed_at_ms = NULL
                 WHERE token = ?1 AND remaining_downloads < access_limit",
                [&token],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    /// Remove the row. Returns whether a row existed; a missing row is not an error.
    pub async fn delete(&self, token: &str) -> Result<bool, RegistryError> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            let rows = conn.execute("DELETE FROM leases WHERE token = ?1", [&token])?;
            Ok(rows > 0)
        })
        .await
    }

    /// Leases whose expiry lies strictly before `now`.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Lease>, RegistryError> {
        let now_ms = now.timestamp_millis();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM leases WHERE expires_at_ms < ?1 ORDER BY expires_at_ms",
                LEASE_COLUMNS
            );
            collect_leases(conn, &sql, now_ms)
        })
        .await
    }

    /// Consumed leases whose last download was admitted at or before `cutoff`.
    pub async fn list_consumed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Lease>, RegistryError> {
        let cutoff_ms = cutoff.timestamp_millis();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM leases WHERE consumed_at_ms IS NOT NULL AND consumed_at_ms <= ?1
                 ORDER BY consumed_at_ms",
                LEASE_COLUMNS
            );
            collect_leases(conn, &sql, cutoff_ms)
        })
        .await
    }

    pub async fn count(&self) -> Result<i64, RegistryError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM leases", [], |row| row.get(0))?)
        })
        .await
    }
}

fn select_lease(conn: &Connection, token: &str) -> Result<Option<Lease>, RegistryError> {
    let sql = format!("SELECT {} FROM leases WHERE token = ?1", LEASE_COLUMNS);
    Ok(conn.query_row(&sql, [token], Lease::from_row).optional()?)
}

fn collect_leases(conn: &Connection, sql: &str, param: i64) -> Result<Vec<Lease>, RegistryError> {
    let mut stmt = conn.prepare(sql)?;
    let leases = stmt
        .query_map([param], Lease::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(leases)
}
