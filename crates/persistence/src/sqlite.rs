//! Embedded SQLite backend.
//!
//! Single-file, serverless store relying on SQLite's own file locking. The
//! connection lives behind an async mutex; statements run directly on the
//! calling task. Chosen at bootstrap when no network database is configured.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{error, info};

use async_trait::async_trait;
use notificator_core::{
    Acknowledgment, Comment, Error, Result, Session, User, UserCredentials,
};

use crate::migrations::{META_TABLE_SQLITE, MIGRATIONS};
use crate::{like_prefix, Store, StoreStats};

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|err| open_error(path, err))?;
        Self::configure(conn)
    }

    /// Opens a private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|err| open_error(":memory:", err))?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|err| map_err("enable foreign keys", err))?;
        // journal_mode returns the resulting mode as a row.
        conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0))
            .map_err(|err| map_err("set journal mode", err))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn migrate(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.execute(META_TABLE_SQLITE, [])
            .map_err(|err| map_err("create schema_migrations", err))?;

        for migration in MIGRATIONS {
            let applied: Option<u32> = conn
                .query_row(
                    "SELECT version FROM schema_migrations WHERE version = ?1",
                    params![migration.version],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| map_err("read schema_migrations", err))?;
            if applied.is_some() {
                continue;
            }

            let tx = conn
                .transaction()
                .map_err(|err| map_err("begin migration", err))?;
            for statement in migration.sqlite {
                tx.execute(statement, [])
                    .map_err(|err| map_err(migration.name, err))?;
            }
            tx.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.name, encode_ts(&Utc::now())],
            )
            .map_err(|err| map_err("record migration", err))?;
            tx.commit().map_err(|err| map_err("commit migration", err))?;
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
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|err| map_err("health check", err))?;
        Ok(())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
        let conn = self.conn.lock().await;
        let count = |sql: &str| -> Result<u64> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(|err| map_err("stats", err))
        };
        let active_sessions = conn
            .query_row(
                "SELECT COUNT(*) FROM sessions WHERE expires_at > ?1",
                params![encode_ts(&now)],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
            .map_err(|err| map_err("stats", err))?;
        Ok(StoreStats {
            users: count("SELECT COUNT(*) FROM users")?,
            active_sessions,
            comments: count("SELECT COUNT(*) FROM comments")?,
            acknowledgments: count("SELECT COUNT(*) FROM acknowledgments")?,
        })
    }

    async fn create_user(&self, user: &User, password_hash: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, created_at, last_login_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id,
                user.username,
                user.email,
                password_hash,
                encode_ts(&user.created_at),
                user.last_login_at.as_ref().map(encode_ts),
            ],
        )
        .map_err(|err| map_err("create user", err))?;
        Ok(())
    }

    async fn user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, username, email, created_at, last_login_at
                 FROM users WHERE id = ?1",
                params![id],
                user_columns,
            )
            .optional()
            .map_err(|err| map_err("load user", err))?;
        row.map(decode_user).transpose()
    }

    async fn credentials_by_username(&self, username: &str) -> Result<Option<UserCredentials>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, username, email, created_at, last_login_at, password_hash
                 FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok((
                        (
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, Option<String>>(4)?,
                        ),
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| map_err("load credentials", err))?;
        row.map(|(user, password_hash)| {
            Ok(UserCredentials {
                user: decode_user(user)?,
                password_hash,
            })
        })
        .transpose()
    }

    async fn update_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE users SET last_login_at = ?1 WHERE id = ?2",
            params![encode_ts(&at), user_id],
        )
        .map_err(|err| map_err("update last login", err))?;
        Ok(())
    }

    async fn update_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, user_id],
        )
        .map_err(|err| map_err("update password hash", err))?;
        Ok(())
    }

    async fn search_users(&self, prefix: &str, limit: u32) -> Result<Vec<User>> {
        let conn = self.conn.lock().await;
        let mut statement = conn
            .prepare(
                "SELECT id, username, email, created_at, last_login_at
                 FROM users WHERE username LIKE ?1 ESCAPE '\\'
                 ORDER BY username ASC LIMIT ?2",
            )
            .map_err(|err| map_err("search users", err))?;
        let rows = statement
            .query_map(params![like_prefix(prefix), limit], user_columns)
            .map_err(|err| map_err("search users", err))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|err| map_err("search users", err))?;
        rows.into_iter().map(decode_user).collect()
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                session.id,
                session.user_id,
                encode_ts(&session.created_at),
                encode_ts(&session.expires_at),
            ],
        )
        .map_err(|err| map_err("insert session", err))?;
        Ok(())
    }

    async fn session_by_id(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, user_id, created_at, expires_at FROM sessions WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| map_err("load session", err))?;
        row.map(|(id, user_id, created_at, expires_at)| {
            Ok(Session {
                id,
                user_id,
                created_at: decode_ts(&created_at)?,
                expires_at: decode_ts(&expires_at)?,
            })
        })
        .transpose()
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])
            .map_err(|err| map_err("delete session", err))?;
        Ok(deleted > 0)
    }

    async fn delete_sessions_for_user(&self, user_id: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])
            .map_err(|err| map_err("delete user sessions", err))?;
        Ok(deleted as u64)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![encode_ts(&now)],
            )
            .map_err(|err| map_err("reap sessions", err))?;
        Ok(deleted as u64)
    }

    async fn upsert_acknowledgment(&self, ack: &Acknowledgment) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|err| map_err("begin ack upsert", err))?;
        let replaced = tx
            .execute(
                "DELETE FROM acknowledgments WHERE alert_key = ?1 AND user_id = ?2",
                params![ack.alert_key, ack.user_id],
            )
            .map_err(|err| map_err("replace acknowledgment", err))?
            > 0;
        tx.execute(
            "INSERT INTO acknowledgments (id, alert_key, user_id, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                ack.id,
                ack.alert_key,
                ack.user_id,
                ack.reason,
                encode_ts(&ack.created_at),
            ],
        )
        .map_err(|err| map_err("insert acknowledgment", err))?;
        tx.commit().map_err(|err| map_err("commit ack upsert", err))?;
        Ok(replaced)
    }

    async fn delete_acknowledgment(
        &self,
        alert_key: &str,
        user_id: &str,
    ) -> Result<Option<Acknowledgment>> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|err| map_err("begin ack delete", err))?;
        let row = tx
            .query_row(
                "SELECT id, alert_key, user_id, reason, created_at
                 FROM acknowledgments WHERE alert_key = ?1 AND user_id = ?2",
                params![alert_key, user_id],
                ack_columns,
            )
            .optional()
            .map_err(|err| map_err("load acknowledgment", err))?;
        let Some(row) = row else {
            return Ok(None);
        };
        tx.execute(
            "DELETE FROM acknowledgments WHERE alert_key = ?1 AND user_id = ?2",
            params![alert_key, user_id],
        )
        .map_err(|err| map_err("delete acknowledgment", err))?;
        tx.commit().map_err(|err| map_err("commit ack delete", err))?;
        Ok(Some(decode_ack(row)?))
    }

    async fn acknowledgments_for_alert(&self, alert_key: &str) -> Result<Vec<Acknowledgment>> {
        let conn = self.conn.lock().await;
        let mut statement = conn
            .prepare(
                "SELECT id, alert_key, user_id, reason, created_at
                 FROM acknowledgments WHERE alert_key = ?1
                 ORDER BY created_at ASC, id ASC",
            )
            .map_err(|err| map_err("list acknowledgments", err))?;
        let rows = statement
            .query_map(params![alert_key], ack_columns)
            .map_err(|err| map_err("list acknowledgments", err))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|err| map_err("list acknowledgments", err))?;
        rows.into_iter().map(decode_ack).collect()
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO comments (id, alert_key, user_id, content, created_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                comment.id,
                comment.alert_key,
                comment.user_id,
                comment.content,
                encode_ts(&comment.created_at),
                comment.deleted_at.as_ref().map(encode_ts),
            ],
        )
        .map_err(|err| map_err("insert comment", err))?;
        Ok(())
    }

    async fn comment_by_id(&self, id: &str) -> Result<Option<Comment>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, alert_key, user_id, content, created_at, deleted_at
                 FROM comments WHERE id = ?1",
                params![id],
                comment_columns,
            )
            .optional()
            .map_err(|err| map_err("load comment", err))?;
        row.map(decode_comment).transpose()
    }

    async fn soft_delete_comment(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().await;
        let deleted_at: Option<Option<String>> = conn
            .query_row(
                "SELECT deleted_at FROM comments WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| map_err("load comment", err))?;
        match deleted_at {
            None => Err(Error::not_found("comment")),
            Some(Some(_)) => Ok(false),
            Some(None) => {
                conn.execute(
                    "UPDATE comments SET deleted_at = ?1 WHERE id = ?2",
                    params![encode_ts(&at), id],
                )
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
        let conn = self.conn.lock().await;
        let sql = if include_deleted {
            "SELECT id, alert_key, user_id, content, created_at, deleted_at
             FROM comments WHERE alert_key = ?1
             ORDER BY created_at ASC, id ASC"
        } else {
            "SELECT id, alert_key, user_id, content, created_at, deleted_at
             FROM comments WHERE alert_key = ?1 AND deleted_at IS NULL
             ORDER BY created_at ASC, id ASC"
        };
        let mut statement = conn.prepare(sql).map_err(|err| map_err("list comments", err))?;
        let rows = statement
            .query_map(params![alert_key], comment_columns)
            .map_err(|err| map_err("list comments", err))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|err| map_err("list comments", err))?;
        rows.into_iter().map(decode_comment).collect()
    }

    async fn interaction_count(&self, user_id: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT (SELECT COUNT(*) FROM acknowledgments WHERE user_id = ?1)
                  + (SELECT COUNT(*) FROM comments WHERE user_id = ?1)",
            params![user_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(|err| map_err("interaction count", err))
    }
}

type UserRow = (String, String, Option<String>, String, Option<String>);
type AckRow = (String, String, String, Option<String>, String);
type CommentRow = (String, String, String, String, String, Option<String>);

fn user_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn ack_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<AckRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn comment_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_user((id, username, email, created_at, last_login_at): UserRow) -> Result<User> {
    Ok(User {
        id,
        username,
        email,
        created_at: decode_ts(&created_at)?,
        last_login_at: last_login_at.as_deref().map(decode_ts).transpose()?,
    })
}

fn decode_ack((id, alert_key, user_id, reason, created_at): AckRow) -> Result<Acknowledgment> {
    Ok(Acknowledgment {
        id,
        alert_key,
        user_id,
        reason,
        created_at: decode_ts(&created_at)?,
    })
}

fn decode_comment(
    (id, alert_key, user_id, content, created_at, deleted_at): CommentRow,
) -> Result<Comment> {
    Ok(Comment {
        id,
        alert_key,
        user_id,
        content,
        created_at: decode_ts(&created_at)?,
        deleted_at: deleted_at.as_deref().map(decode_ts).transpose()?,
    })
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text (nanosecond
/// precision) so that textual ordering matches chronological ordering and
/// values round-trip losslessly.
fn encode_ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| Error::internal(format!("malformed timestamp {raw}: {err}")))
}

fn open_error(path: &str, err: rusqlite::Error) -> Error {
    error!(target: "persistence", path, error = %err, "failed to open sqlite database");
    Error::Unavailable
}

fn map_err(context: &str, err: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        match failure.code {
            ErrorCode::ConstraintViolation => {
                if message
                    .as_deref()
                    .map_or(false, |m| m.contains("users.username"))
                {
                    return Error::already_exists("username");
                }
            }
            ErrorCode::CannotOpen | ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                error!(target: "persistence", context, error = %err, "sqlite unavailable");
                return Error::Unavailable;
            }
            _ => {}
        }
    }
    error!(target: "persistence", context, error = %err, "sqlite operation failed");
    Error::internal(format!("{context}: {err}"))
}
