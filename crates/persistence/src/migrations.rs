//! Versioned schema migrations.
//!
//! Migrations are applied in strictly monotonic order and recorded in
//! `schema_migrations`. Every statement is idempotent (`IF NOT EXISTS`), so a
//! partially recorded run can be re-applied safely. Forward-only: there are
//! no down-migrations.

/// One schema migration with per-dialect statement lists.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sqlite: &'static [&'static str],
    pub postgres: &'static [&'static str],
}

/// DDL for the migration meta-table itself, applied unconditionally before
/// the versioned sequence.
pub const META_TABLE_SQLITE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        applied_at TEXT NOT NULL
    )";

pub const META_TABLE_POSTGRES: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        applied_at TIMESTAMPTZ NOT NULL
    )";

/// The full migration sequence, ascending by version.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        sqlite: &["CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_login_at TEXT
            )"],
        postgres: &["CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT,
                password_hash TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                last_login_at TIMESTAMPTZ
            )"],
    },
    Migration {
        version: 2,
        name: "create_sessions",
        sqlite: &[
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)",
        ],
        postgres: &[
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)",
        ],
    },
    Migration {
        version: 3,
        name: "create_acknowledgments",
        sqlite: &[
            "CREATE TABLE IF NOT EXISTS acknowledgments (
                id TEXT PRIMARY KEY,
                alert_key TEXT NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id),
                reason TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_acks_alert_user
                ON acknowledgments(alert_key, user_id)",
        ],
        postgres: &[
            "CREATE TABLE IF NOT EXISTS acknowledgments (
                id TEXT PRIMARY KEY,
                alert_key TEXT NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id),
                reason TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_acks_alert_user
                ON acknowledgments(alert_key, user_id)",
        ],
    },
    Migration {
        version: 4,
        name: "create_comments",
        sqlite: &[
            "CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                alert_key TEXT NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_comments_alert_created
                ON comments(alert_key, created_at)",
        ],
        postgres: &[
            "CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                alert_key TEXT NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id),
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                deleted_at TIMESTAMPTZ
            )",
            "CREATE INDEX IF NOT EXISTS idx_comments_alert_created
                ON comments(alert_key, created_at)",
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_strictly_monotonic() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn dialects_stay_in_lockstep() {
        for migration in MIGRATIONS {
            assert_eq!(
                migration.sqlite.len(),
                migration.postgres.len(),
                "statement count differs for {}",
                migration.name
            );
        }
    }
}
