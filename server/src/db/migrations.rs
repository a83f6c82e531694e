use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking; no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: Lease registry

CREATE TABLE leases (
    token TEXT PRIMARY KEY,
    original_name TEXT NOT NULL,
    blob_ref TEXT NOT NULL UNIQUE,
    content_sha256 TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    access_limit INTEGER NOT NULL CHECK (access_limit >= 1),
    remaining_downloads INTEGER NOT NULL CHECK (remaining_downloads >= 0),
    expires_at_ms INTEGER NOT NULL,
    created_at_ms INTEGER NOT NULL,
    consumed_at_ms INTEGER
);

CREATE INDEX idx_leases_expires_at ON leases(expires_at_ms);
CREATE INDEX idx_leases_consumed_at ON leases(consumed_at_ms);
",
    )])
}
