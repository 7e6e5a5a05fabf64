//! SQL migration definitions for the tracedeck database.
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
    vec![
        Migration {
            version: 1,
            description: "Initial schema: bucketed key-value documents",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One JSON document per (bucket, key)
CREATE TABLE IF NOT EXISTS kv (
    bucket     TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (bucket, key)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Active capture gates",
            sql: r#"
-- A row exists while a capture runs for the app
CREATE TABLE IF NOT EXISTS active_gates (
    app_id      TEXT PRIMARY KEY,
    acquired_at TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
