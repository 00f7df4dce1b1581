//! Notificator wire schema.
//!
//! Generated tonic/prost stubs for `notificator.v1` plus conversions between
//! domain types and wire messages. Timestamps travel as unix milliseconds
//! with zero meaning "unset".

use chrono::{DateTime, Utc};
use notificator_core::{Acknowledgment, AlertUpdate, Comment, UpdateKind, User};

#[allow(clippy::all)]
pub mod v1 {
    tonic::include_proto!("notificator.v1");
}

fn millis(value: &DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

fn opt_millis(value: &Option<DateTime<Utc>>) -> i64 {
    value.as_ref().map(millis).unwrap_or(0)
}

impl From<&User> for v1::User {
    fn from(user: &User) -> Self {
        v1::User {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone().unwrap_or_default(),
            created_at_ms: millis(&user.created_at),
            last_login_at_ms: opt_millis(&user.last_login_at),
        }
    }
}

impl From<&Acknowledgment> for v1::Acknowledgment {
    fn from(ack: &Acknowledgment) -> Self {
        v1::Acknowledgment {
            id: ack.id.clone(),
            alert_key: ack.alert_key.clone(),
            user_id: ack.user_id.clone(),
            reason: ack.reason.clone().unwrap_or_default(),
            created_at_ms: millis(&ack.created_at),
        }
    }
}

impl From<&Comment> for v1::Comment {
    fn from(comment: &Comment) -> Self {
        v1::Comment {
            id: comment.id.clone(),
            alert_key: comment.alert_key.clone(),
            user_id: comment.user_id.clone(),
            content: comment.content.clone(),
            created_at_ms: millis(&comment.created_at),
            deleted_at_ms: opt_millis(&comment.deleted_at),
        }
    }
}

impl From<UpdateKind> for v1::UpdateType {
    fn from(kind: UpdateKind) -> Self {
        match kind {
            UpdateKind::AckAdded => v1::UpdateType::AckAdded,
            UpdateKind::AckReplaced => v1::UpdateType::AckReplaced,
            UpdateKind::AckRemoved => v1::UpdateType::AckRemoved,
            UpdateKind::CommentAdded => v1::UpdateType::CommentAdded,
            UpdateKind::CommentDeleted => v1::UpdateType::CommentDeleted,
            UpdateKind::Lagged => v1::UpdateType::Lagged,
            UpdateKind::ServerStopping => v1::UpdateType::ServerStopping,
        }
    }
}

impl From<&AlertUpdate> for v1::AlertUpdate {
    fn from(update: &AlertUpdate) -> Self {
        v1::AlertUpdate {
            update_type: v1::UpdateType::from(update.kind) as i32,
            alert_key: update.alert_key.clone(),
            actor_user: update.actor.as_ref().map(v1::User::from),
            acknowledgment: update.ack.as_ref().map(v1::Acknowledgment::from),
            comment: update.comment.as_ref().map(v1::Comment::from),
            emitted_at_ms: millis(&update.emitted_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u-1".into(),
            username: "alice".into(),
            email: Some("alice@example.com".into()),
            created_at: Utc::now(),
            last_login_at: None,
        }
    }

    #[test]
    fn user_conversion_uses_zero_for_unset() {
        let wire = v1::User::from(&user());
        assert_eq!(wire.email, "alice@example.com");
        assert_eq!(wire.last_login_at_ms, 0);
        assert!(wire.created_at_ms > 0);
    }

    #[test]
    fn update_conversion_carries_payload_and_type() {
        let ack = Acknowledgment {
            id: "a-1".into(),
            alert_key: "k".into(),
            user_id: "u-1".into(),
            reason: Some("looking".into()),
            created_at: Utc::now(),
        };
        let update = AlertUpdate::ack_added(user(), ack, true);
        let wire = v1::AlertUpdate::from(&update);
        assert_eq!(wire.update_type(), v1::UpdateType::AckReplaced);
        assert_eq!(wire.alert_key, "k");
        assert_eq!(wire.acknowledgment.as_ref().unwrap().reason, "looking");
        assert!(wire.comment.is_none());
    }

    #[test]
    fn sentinel_conversion_has_no_actor() {
        let wire = v1::AlertUpdate::from(&AlertUpdate::server_stopping("k"));
        assert_eq!(wire.update_type(), v1::UpdateType::ServerStopping);
        assert!(wire.actor_user.is_none());
    }
}
