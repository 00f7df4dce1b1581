//! Notificator Persistence
//!
//! Storage contract and backends for the collaboration backend. Two backends
//! implement the same [`Store`] trait: an embedded single-file SQLite store
//! and a networked PostgreSQL store. The logical schema is identical on both;
//! differences are confined to DDL dialect strings in the migration table.
//!
//! Backend-specific errors never escape this crate: each implementation maps
//! driver errors onto the shared taxonomy at its boundary.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notificator_config::{DatabaseSection, DatabaseType};
use notificator_core::{Acknowledgment, Comment, Result, Session, User, UserCredentials};

pub mod migrations;
pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Aggregate counters served on the metrics endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub users: u64,
    pub active_sessions: u64,
    pub comments: u64,
    pub acknowledgments: u64,
}

/// Typed repository contract exposed to the identity and interaction stores.
///
/// All operations are safe under parallel invocation. Writes that touch more
/// than one row run inside a transaction. No retries happen here; an
/// unreachable backend surfaces as `Unavailable`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Applies all pending schema migrations. Safe to call repeatedly.
    async fn migrate(&self) -> Result<()>;

    /// Round-trips a trivial query.
    async fn health_check(&self) -> Result<()>;

    /// Aggregate row counts; `now` bounds which sessions count as active.
    async fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats>;

    // --- users ---

    /// Inserts a new user. `AlreadyExists` on a duplicate username.
    async fn create_user(&self, user: &User, password_hash: &str) -> Result<()>;

    async fn user_by_id(&self, id: &str) -> Result<Option<User>>;

    /// Case-sensitive username lookup including the stored password hash.
    async fn credentials_by_username(&self, username: &str) -> Result<Option<UserCredentials>>;

    async fn update_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn update_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()>;

    /// Case-insensitive prefix search ordered by username.
    async fn search_users(&self, prefix: &str, limit: u32) -> Result<Vec<User>>;

    // --- sessions ---

    async fn insert_session(&self, session: &Session) -> Result<()>;

    async fn session_by_id(&self, id: &str) -> Result<Option<Session>>;

    /// Returns whether a row was deleted.
    async fn delete_session(&self, id: &str) -> Result<bool>;

    /// Destroys every session of one user (password change). Returns the
    /// number of rows deleted.
    async fn delete_sessions_for_user(&self, user_id: &str) -> Result<u64>;

    /// Bulk reap of rows with `expires_at <= now`.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64>;

    // --- acknowledgments ---

    /// Inserts the acknowledgment, replacing any prior row for the same
    /// `(alert_key, user_id)` pair in one transaction. Returns `true` when a
    /// prior row was replaced.
    async fn upsert_acknowledgment(&self, ack: &Acknowledgment) -> Result<bool>;

    /// Deletes the caller's acknowledgment, returning the removed row if one
    /// existed.
    async fn delete_acknowledgment(
        &self,
        alert_key: &str,
        user_id: &str,
    ) -> Result<Option<Acknowledgment>>;

    /// All acknowledgments for one alert, `created_at` ascending.
    async fn acknowledgments_for_alert(&self, alert_key: &str) -> Result<Vec<Acknowledgment>>;

    // --- comments ---

    async fn insert_comment(&self, comment: &Comment) -> Result<()>;

    async fn comment_by_id(&self, id: &str) -> Result<Option<Comment>>;

    /// Sets `deleted_at` on a live row. Returns `false` when the row was
    /// already soft-deleted. `NotFound` when no row exists at all.
    async fn soft_delete_comment(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Comments for one alert, `created_at` ascending with ties broken by id;
    /// soft-deleted rows only when requested.
    async fn comments_for_alert(&self, alert_key: &str, include_deleted: bool)
        -> Result<Vec<Comment>>;

    /// Number of interactions (acknowledgments plus authored comments,
    /// soft-deleted included) attributed to one user.
    async fn interaction_count(&self, user_id: &str) -> Result<u64>;
}

/// Opens the backend selected by configuration.
pub async fn open_store(config: &DatabaseSection) -> Result<Arc<dyn Store>> {
    match config.db_type {
        DatabaseType::Sqlite => {
            let store = SqliteStore::open(&config.sqlite_path)?;
            Ok(Arc::new(store))
        }
        DatabaseType::Postgres => {
            let store = PostgresStore::connect(config).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Escapes LIKE wildcards in a user-supplied prefix. Both backends use
/// `ESCAPE '\'` with the returned pattern plus a trailing `%`.
pub(crate) fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("al"), "al%");
        assert_eq!(like_prefix("a%b"), "a\\%b%");
        assert_eq!(like_prefix("a_b"), "a\\_b%");
        assert_eq!(like_prefix("a\\b"), "a\\\\b%");
        assert_eq!(like_prefix(""), "%");
    }
}
