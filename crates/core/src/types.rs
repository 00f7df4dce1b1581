//! Domain types shared across the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered operator.
///
/// The password hash never appears here; it travels only inside
/// [`UserCredentials`] between the persistence layer and the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Opaque identifier (UUID v4 in practice).
    pub id: String,
    /// Unique, case-sensitive username.
    pub username: String,
    /// Optional contact address.
    pub email: Option<String>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last successful login, if any.
    pub last_login_at: Option<DateTime<Utc>>,
}

/// A user together with its stored password hash.
///
/// Returned only by credential lookups; must never cross the RPC boundary.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

/// A server-authoritative bearer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque random token; 32 CSPRNG bytes as lowercase hex.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// True once `now` has reached the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// An acknowledgment filed against an alert fingerprint.
///
/// At most one active acknowledgment exists per `(alert_key, user_id)` pair;
/// a second acknowledgment by the same user replaces the prior one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub id: String,
    pub alert_key: String,
    pub user_id: String,
    /// Optional free-text reason.
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A threaded comment filed against an alert fingerprint.
///
/// Deletion is soft: the row remains with `deleted_at` set and clients
/// surface it as deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub alert_key: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Comment {
    /// True if the comment has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Kind of a live update emitted on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateKind {
    AckAdded,
    AckReplaced,
    AckRemoved,
    CommentAdded,
    CommentDeleted,
    /// Sentinel sent to a single slow subscriber whose buffer overflowed;
    /// instructs the client to reconcile by re-querying.
    Lagged,
    /// Final event before the server closes every stream.
    ServerStopping,
}

/// A live update delivered to subscribers of one alert fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertUpdate {
    pub kind: UpdateKind,
    pub alert_key: String,
    /// User whose action produced the update; absent on sentinels.
    pub actor: Option<User>,
    /// Acknowledgment payload for ack-typed updates.
    pub ack: Option<Acknowledgment>,
    /// Comment payload for comment-typed updates.
    pub comment: Option<Comment>,
    pub emitted_at: DateTime<Utc>,
}

impl AlertUpdate {
    fn bare(kind: UpdateKind, alert_key: &str) -> Self {
        AlertUpdate {
            kind,
            alert_key: alert_key.to_string(),
            actor: None,
            ack: None,
            comment: None,
            emitted_at: Utc::now(),
        }
    }

    /// An `ACK_ADDED` or `ACK_REPLACED` update.
    pub fn ack_added(actor: User, ack: Acknowledgment, replaced: bool) -> Self {
        let kind = if replaced {
            UpdateKind::AckReplaced
        } else {
            UpdateKind::AckAdded
        };
        AlertUpdate {
            actor: Some(actor),
            alert_key: ack.alert_key.clone(),
            ack: Some(ack),
            ..Self::bare(kind, "")
        }
    }

    /// An `ACK_REMOVED` update carrying the deleted row.
    pub fn ack_removed(actor: User, ack: Acknowledgment) -> Self {
        AlertUpdate {
            actor: Some(actor),
            alert_key: ack.alert_key.clone(),
            ack: Some(ack),
            ..Self::bare(UpdateKind::AckRemoved, "")
        }
    }

    /// A `COMMENT_ADDED` update.
    pub fn comment_added(actor: User, comment: Comment) -> Self {
        AlertUpdate {
            actor: Some(actor),
            alert_key: comment.alert_key.clone(),
            comment: Some(comment),
            ..Self::bare(UpdateKind::CommentAdded, "")
        }
    }

    /// A `COMMENT_DELETED` update carrying the soft-deleted row.
    pub fn comment_deleted(actor: User, comment: Comment) -> Self {
        AlertUpdate {
            actor: Some(actor),
            alert_key: comment.alert_key.clone(),
            comment: Some(comment),
            ..Self::bare(UpdateKind::CommentDeleted, "")
        }
    }

    /// The `LAGGED` sentinel for one overflowing subscriber.
    pub fn lagged(alert_key: &str) -> Self {
        Self::bare(UpdateKind::Lagged, alert_key)
    }

    /// The `SERVER_STOPPING` sentinel broadcast during drain.
    pub fn server_stopping(alert_key: &str) -> Self {
        Self::bare(UpdateKind::ServerStopping, alert_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user() -> User {
        User {
            id: "u-1".into(),
            username: "alice".into(),
            email: None,
            created_at: Utc::now(),
            last_login_at: None,
        }
    }

    #[test]
    fn session_expiry_is_inclusive() {
        let now = Utc::now();
        let session = Session {
            id: "t".into(),
            user_id: "u-1".into(),
            created_at: now,
            expires_at: now,
        };
        assert!(session.is_expired(now));
        assert!(!session.is_expired(now - Duration::seconds(1)));
        assert!(session.is_expired(now + Duration::seconds(1)));
    }

    #[test]
    fn ack_update_kind_tracks_replacement() {
        let ack = Acknowledgment {
            id: "a-1".into(),
            alert_key: "k".into(),
            user_id: "u-1".into(),
            reason: None,
            created_at: Utc::now(),
        };
        let added = AlertUpdate::ack_added(user(), ack.clone(), false);
        assert_eq!(added.kind, UpdateKind::AckAdded);
        assert_eq!(added.alert_key, "k");

        let replaced = AlertUpdate::ack_added(user(), ack, true);
        assert_eq!(replaced.kind, UpdateKind::AckReplaced);
    }

    #[test]
    fn sentinels_carry_no_payload() {
        let update = AlertUpdate::lagged("k");
        assert!(update.actor.is_none());
        assert!(update.ack.is_none());
        assert!(update.comment.is_none());
    }
}
