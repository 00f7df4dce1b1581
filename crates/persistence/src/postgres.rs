//! Networked PostgreSQL backend.
//!
//! Reached over TCP; TLS is negotiated when `ssl_mode = require`. The client
//! lives behind an async mutex so multi-statement writes can run inside a
//! transaction. Connection loss surfaces as `Unavailable`; reconnecting is
//! the supervisor's decision, never this layer's.

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

use async_trait::async_trait;
use notificator_config::{DatabaseSection, SslMode};
use notificator_core::{
    Acknowledgment, Comment, Error, Result, Session, User, UserCredentials,
};

use crate::migrations::{META_TABLE_POSTGRES, MIGRATIONS};
use crate::{like_prefix, Store, StoreStats};

/// PostgreSQL-backed [`Store`].
pub struct PostgresStore {
    client: Mutex<Client>,
}

impl PostgresStore {
    /// Connects using the configured host, credentials and TLS mode.
    pub async fn connect(config: &DatabaseSection) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.name)
            .user(&config.user)
            .application_name("notificator-backend");
        if !config.password.is_empty() {
            pg.password(&config.password);
        }

        let client = match config.ssl_mode {
            SslMode::Require => {
                pg.ssl_mode(tokio_postgres::config::SslMode::Require);
                let connector = native_tls::TlsConnector::new()
                    .map_err(|err| connect_error(&config.host, err))?;
                let tls = postgres_native_tls::MakeTlsConnector::new(connector);
                let (client, connection) =
                    pg.connect(tls).await.map_err(|err| connect_error(&config.host, err))?;
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        error!(target: "persistence", error = %err, "postgres connection closed");
                    }
                });
                client
            }
            SslMode::Disable | SslMode::Prefer => {
                pg.ssl_mode(tokio_postgres::config::SslMode::Disable);
                let (client, connection) = pg
                    .connect(NoTls)
                    .await
                    .map_err(|err| connect_error(&config.host, err))?;
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        error!(target: "persistence", error = %err, "postgres connection closed");
                    }
                });
                client
            }
        };

        info!(
            target: "persistence",
            host = %config.host,
            port = config.port,
            database = %config.name,
            ssl_mode = %config.ssl_mode,
            "connected to postgres"
        );
        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn migrate(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        client
            .execute(META_TABLE_POSTGRES, &[])
            .await
            .map_err(|err| map_err("create schema_migrations", err))?;

        for migration in MIGRATIONS {
            let applied = client
                .query_opt(
                    "SELECT version FROM schema_migrations WHERE version = $1",
                    &[&(migration.version as i32)],
                )
                .await
                .map_err(|err| map_err("read schema_migrations", err))?;
            if applied.is_some() {
                continue;
            }

            let tx = client
                .transaction()
                .await
                .map_err(|err| map_err("begin migration", err))?;
            for statement in migration.postgres {
                tx.execute(*statement, &[])
                    .await
                    .map_err(|err| map_err(migration.name, err))?;
            }
            tx.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES ($1, $2, $3)",
                &[&(migration.version as i32), &migration.name, &Utc::now()],
            )
            .await
            .map_err(|err| map_err("record migration", err))?;
            tx.commit()
                .await
                .map_err(|err| map_err("commit migration", err))?;
            info!(
                target: "persistence",
                version = migration.version,
                name = migration.name,
                "applied migration"
            );
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let client = self.client.lock().await;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|err| map_err("health check", err))?;
        Ok(())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                "SELECT (SELECT COUNT(*) FROM users),
                        (SELECT COUNT(*) FROM sessions WHERE expires_at > $1),
                        (SELECT COUNT(*) FROM comments),
                        (SELECT COUNT(*) FROM acknowledgments)",
                &[&now],
            )
            .await
            .map_err(|err| map_err("stats", err))?;
        Ok(StoreStats {
            users: row.get::<_, i64>(0) as u64,
            active_sessions: row.get::<_, i64>(1) as u64,
            comments: row.get::<_, i64>(2) as u64,
            acknowledgments: row.get::<_, i64>(3) as u64,
        })
    }

    async fn create_user(&self, user: &User, password_hash: &str) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO users (id, username, email, password_hash, created_at, last_login_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &user.id,
                    &user.username,
                    &user.email,
                    &password_hash,
                    &user.created_at,
                    &user.last_login_at,
                ],
            )
            .await
            .map_err(|err| map_err("create user", err))?;
        Ok(())
    }

    async fn user_by_id(&self, id: &str) -> Result<Option<User>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT id, username, email, created_at, last_login_at FROM users WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|err| map_err("load user", err))?;
        Ok(row.map(|row| decode_user(&row)))
    }

    async fn credentials_by_username(&self, username: &str) -> Result<Option<UserCredentials>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT id, username, email, created_at, last_login_at, password_hash
                 FROM users WHERE username = $1",
                &[&username],
            )
            .await
            .map_err(|err| map_err("load credentials", err))?;
        Ok(row.map(|row| UserCredentials {
            user: decode_user(&row),
            password_hash: row.get("password_hash"),
        }))
    }

    async fn update_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute(
                "UPDATE users SET last_login_at = $1 WHERE id = $2",
                &[&at, &user_id],
            )
            .await
            .map_err(|err| map_err("update last login", err))?;
        Ok(())
    }

    async fn update_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute(
                "UPDATE users SET password_hash = $1 WHERE id = $2",
                &[&password_hash, &user_id],
            )
            .await
            .map_err(|err| map_err("update password hash", err))?;
        Ok(())
    }

    async fn search_users(&self, prefix: &str, limit: u32) -> Result<Vec<User>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT id, username, email, created_at, last_login_at
                 FROM users WHERE username ILIKE $1
                 ORDER BY username ASC LIMIT $2",
                &[&like_prefix(prefix), &(limit as i64)],
            )
            .await
            .map_err(|err| map_err("search users", err))?;
        Ok(rows.iter().map(decode_user).collect())
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO sessions (id, user_id, created_at, expires_at)
                 VALUES ($1, $2, $3, $4)",
                &[
                    &session.id,
                    &session.user_id,
                    &session.created_at,
                    &session.expires_at,
                ],
            )
            .await
            .map_err(|err| map_err("insert session", err))?;
        Ok(())
    }

    async fn session_by_id(&self, id: &str) -> Result<Option<Session>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT id, user_id, created_at, expires_at FROM sessions WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|err| map_err("load session", err))?;
        Ok(row.map(|row| Session {
            id: row.get("id"),
            user_id: row.get("user_id"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        let client = self.client.lock().await;
        let deleted = client
            .execute("DELETE FROM sessions WHERE id = $1", &[&id])
            .await
            .map_err(|err| map_err("delete session", err))?;
        Ok(deleted > 0)
    }

    async fn delete_sessions_for_user(&self, user_id: &str) -> Result<u64> {
        let client = self.client.lock().await;
        client
            .execute("DELETE FROM sessions WHERE user_id = $1", &[&user_id])
            .await
            .map_err(|err| map_err("delete user sessions", err))
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let client = self.client.lock().await;
        client
            .execute("DELETE FROM sessions WHERE expires_at <= $1", &[&now])
            .await
            .map_err(|err| map_err("reap sessions", err))
    }

    async fn upsert_acknowledgment(&self, ack: &Acknowledgment) -> Result<bool> {
        let mut client = self.client.lock().await;
        let tx = client
            .transaction()
            .await
            .map_err(|err| map_err("begin ack upsert", err))?;
        let replaced = tx
            .execute(
                "DELETE FROM acknowledgments WHERE alert_key = $1 AND user_id = $2",
                &[&ack.alert_key, &ack.user_id],
            )
            .await
            .map_err(|err| map_err("replace acknowledgment", err))?
            > 0;
        tx.execute(
            "INSERT INTO acknowledgments (id, alert_key, user_id, reason, created_at)
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &ack.id,
                &ack.alert_key,
                &ack.user_id,
                &ack.reason,
                &ack.created_at,
            ],
        )
        .await
        .map_err(|err| map_err("insert acknowledgment", err))?;
        tx.commit()
            .await
            .map_err(|err| map_err("commit ack upsert", err))?;
        Ok(replaced)
    }

    async fn delete_acknowledgment(
        &self,
        alert_key: &str,
        user_id: &str,
    ) -> Result<Option<Acknowledgment>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "DELETE FROM acknowledgments WHERE alert_key = $1 AND user_id = $2
                 RETURNING id, alert_key, user_id, reason, created_at",
                &[&alert_key, &user_id],
            )
            .await
            .map_err(|err| map_err("delete acknowledgment", err))?;
        Ok(row.map(|row| decode_ack(&row)))
    }

    async fn acknowledgments_for_alert(&self, alert_key: &str) -> Result<Vec<Acknowledgment>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT id, alert_key, user_id, reason, created_at
                 FROM acknowledgments WHERE alert_key = $1
                 ORDER BY created_at ASC, id ASC",
                &[&alert_key],
            )
            .await
            .map_err(|err| map_err("list acknowledgments", err))?;
        Ok(rows.iter().map(decode_ack).collect())
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO comments (id, alert_key, user_id, content, created_at, deleted_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &comment.id,
                    &comment.alert_key,
                    &comment.user_id,
                    &comment.content,
                    &comment.created_at,
                    &comment.deleted_at,
                ],
            )
            .await
            .map_err(|err| map_err("insert comment", err))?;
        Ok(())
    }

    async fn comment_by_id(&self, id: &str) -> Result<Option<Comment>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT id, alert_key, user_id, content, created_at, deleted_at
                 FROM comments WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|err| map_err("load comment", err))?;
        Ok(row.map(|row| decode_comment(&row)))
    }

    async fn soft_delete_comment(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let client = self.client.lock().await;
        let row = client
            .query_opt("SELECT deleted_at FROM comments WHERE id = $1", &[&id])
            .await
            .map_err(|err| map_err("load comment", err))?;
        match row {
            None => Err(Error::not_found("comment")),
            Some(row) if row.get::<_, Option<DateTime<Utc>>>(0).is_some() => Ok(false),
            Some(_) => {
                client
                    .execute(
                        "UPDATE comments SET deleted_at = $1 WHERE id = $2",
                        &[&at, &id],
                    )
                    .await
                    .map_err(|err| map_err("soft delete comment", err))?;
                Ok(true)
            }
        }
    }

    async fn comments_for_alert(
        &self,
        alert_key: &str,
        include_deleted: bool,
    ) -> Result<Vec<Comment>> {
        let client = self.client.lock().await;
        let sql = if include_deleted {
            "SELECT id, alert_key, user_id, content, created_at, deleted_at
             FROM comments WHERE alert_key = $1
             ORDER BY created_at ASC, id ASC"
        } else {
            "SELECT id, alert_key, user_id, content, created_at, deleted_at
             FROM comments WHERE alert_key = $1 AND deleted_at IS NULL
             ORDER BY created_at ASC, id ASC"
        };
        let rows = client
            .query(sql, &[&alert_key])
            .await
            .map_err(|err| map_err("list comments", err))?;
        Ok(rows.iter().map(decode_comment).collect())
    }

    async fn interaction_count(&self, user_id: &str) -> Result<u64> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                "SELECT (SELECT COUNT(*) FROM acknowledgments WHERE user_id = $1)
                      + (SELECT COUNT(*) FROM comments WHERE user_id = $1)",
                &[&user_id],
            )
            .await
            .map_err(|err| map_err("interaction count", err))?;
        Ok(row.get::<_, i64>(0) as u64)
    }
}

fn decode_user(row: &Row) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        created_at: row.get("created_at"),
        last_login_at: row.get("last_login_at"),
    }
}

fn decode_ack(row: &Row) -> Acknowledgment {
    Acknowledgment {
        id: row.get("id"),
        alert_key: row.get("alert_key"),
        user_id: row.get("user_id"),
        reason: row.get("reason"),
        created_at: row.get("created_at"),
    }
}

fn decode_comment(row: &Row) -> Comment {
    Comment {
        id: row.get("id"),
        alert_key: row.get("alert_key"),
        user_id: row.get("user_id"),
        content: row.get("content"),
        created_at: row.get("created_at"),
        deleted_at: row.get("deleted_at"),
    }
}

fn connect_error(host: &str, err: impl std::fmt::Display) -> Error {
    error!(target: "persistence", host, error = %err, "failed to connect to postgres");
    Error::Unavailable
}

fn map_err(context: &str, err: tokio_postgres::Error) -> Error {
    if let Some(db) = err.as_db_error() {
        if db.code() == &SqlState::UNIQUE_VIOLATION {
            if db.table() == Some("users") {
                return Error::already_exists("username");
            }
            return Error::already_exists(db.constraint().unwrap_or("row").to_string());
        }
    }
    if err.is_closed() {
        error!(target: "persistence", context, error = %err, "postgres unavailable");
        return Error::Unavailable;
    }
    error!(target: "persistence", context, error = %err, "postgres operation failed");
    Error::internal(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notificator_config::DatabaseSection;
    use uuid::Uuid;

    fn test_config() -> Option<DatabaseSection> {
        let host = std::env::var("NOTIFICATOR_TEST_PG_HOST").ok()?;
        let mut config = DatabaseSection::default();
        config.host = host;
        if let Ok(name) = std::env::var("NOTIFICATOR_TEST_PG_NAME") {
            config.name = name;
        }
        if let Ok(user) = std::env::var("NOTIFICATOR_TEST_PG_USER") {
            config.user = user;
        }
        if let Ok(password) = std::env::var("NOTIFICATOR_TEST_PG_PASSWORD") {
            config.password = password;
        }
        Some(config)
    }

    // Requires a reachable postgres; run with
    // NOTIFICATOR_TEST_PG_HOST=... cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn postgres_roundtrip() {
        let config = test_config().expect("NOTIFICATOR_TEST_PG_HOST not set");
        let store = PostgresStore::connect(&config).await.unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
        store.health_check().await.unwrap();

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: format!("probe-{}", Uuid::new_v4()),
            email: None,
            created_at: Utc::now(),
            last_login_at: None,
        };
        store.create_user(&user, "hash").await.unwrap();
        let err = store.create_user(&user, "hash").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));

        let loaded = store.user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(loaded.username, user.username);
    }
}
