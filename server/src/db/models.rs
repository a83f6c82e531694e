/// Database row types.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
use chrono::{DateTime, TimeZone, Utc};

/// One shared file: where its bytes live and how much longer it may be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub token: String,
    /// Display name only; never used to address storage
    pub original_name: String,
    pub blob_ref: String,
    /// Hex SHA-256 of the uploaded bytes
    pub content_sha256: String,
    pub size_bytes: i64,
    pub access_limit: i64,
    pub remaining_downloads: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Set when the last permitted download was admitted
    pub consumed_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of a lease that still has a registry row.
///
/// `Deleted` is never observed on a row; it is what callers see as `NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Active,
    Consumed,
    Expired,
}

impl Lease {
    /// Not expired and at least one download left.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && self.remaining_downloads > 0
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn state(&self, now: DateTime<Utc>) -> LeaseState {
        if self.is_expired(now) {
            LeaseState::Expired
        } else if self.remaining_downloads <= 0 {
            LeaseState::Consumed
        } else {
            LeaseState::Active
        }
    }

    /// Map a `SELECT` over [`LEASE_COLUMNS`] into a lease.
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Lease {
            token: row.get(0)?,
            original_name: row.get(1)?,
            blob_ref: row.get(2)?,
            content_sha256: row.get(3)?,
            size_bytes: row.get(4)?,
            access_limit: row.get(5)?,
            remaining_downloads: row.get(6)?,
            expires_at: from_millis(row.get(7)?),
            created_at: from_millis(row.get(8)?),
            consumed_at: row.get::<_, Option<i64>>(9)?.map(from_millis),
        })
    }
}

/// Column list matching [`Lease::from_row`].
pub(crate) const LEASE_COLUMNS: &str = "token, original_name, blob_ref, content_sha256, size_bytes, \
     access_limit, remaining_downloads, expires_at_ms, created_at_ms, consumed_at_ms";

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}
