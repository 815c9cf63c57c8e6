//! SQL migration definitions for the cache database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: cache_entries, cache_counters",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Opaque values (metadata, summaries, report info, locks)
CREATE TABLE IF NOT EXISTS cache_entries (
    key        TEXT PRIMARY KEY,
    value      BLOB NOT NULL,
    expires_at INTEGER NOT NULL
);

-- Additive counters (rate windows, daily cost aggregates)
CREATE TABLE IF NOT EXISTS cache_counters (
    key        TEXT NOT NULL,
    field      TEXT NOT NULL,
    value      REAL NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (key, field)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry ON cache_entries(expires_at);
CREATE INDEX IF NOT EXISTS idx_cache_counters_expiry ON cache_counters(expires_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
