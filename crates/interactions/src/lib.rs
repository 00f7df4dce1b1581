//! Notificator Interaction Store
//!
//! Acknowledgments and threaded comments keyed by alert fingerprint, with
//! ownership checks and live fan-out. Every mutation for a given alert key
//! holds that key's mutex from just before the commit until the event has
//! been published, so subscribers observe events in commit order. Locks are
//! created lazily and kept for the server's lifetime; alert-key cardinality
//! is small enough that the map never needs pruning.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use notificator_bus::UpdateBus;
use notificator_core::{
    Acknowledgment, AlertUpdate, Comment, Error, Result, User,
};
use notificator_persistence::Store;

pub mod mentions;

/// Upper bound on comment content, in bytes.
pub const MAX_COMMENT_BYTES: usize = 4096;

/// A committed comment together with the users its content mentioned.
#[derive(Debug, Clone)]
pub struct CommentPosted {
    pub comment: Comment,
    pub mentioned: Vec<User>,
}

/// A committed acknowledgment and whether it replaced a prior one by the
/// same user.
#[derive(Debug, Clone)]
pub struct AckRecorded {
    pub ack: Acknowledgment,
    pub replaced: bool,
}

/// Interaction operations over the shared store and update bus.
pub struct InteractionService {
    store: Arc<dyn Store>,
    bus: Arc<UpdateBus>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InteractionService {
    pub fn new(store: Arc<dyn Store>, bus: Arc<UpdateBus>) -> Self {
        Self {
            store,
            bus,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, alert_key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(alert_key.to_string())
            .or_default()
            .clone()
    }

    /// Files (or replaces) the caller's acknowledgment of one alert.
    pub async fn add_acknowledgment(
        &self,
        user: &User,
        alert_key: &str,
        reason: Option<String>,
    ) -> Result<AckRecorded> {
        if alert_key.trim().is_empty() {
            return Err(Error::invalid_argument("alert key must not be empty"));
        }
        let reason = reason.filter(|value| !value.trim().is_empty());

        let lock = self.key_lock(alert_key);
        let _ordering = lock.lock().await;

        let ack = Acknowledgment {
            id: Uuid::new_v4().to_string(),
            alert_key: alert_key.to_string(),
            user_id: user.id.clone(),
            reason,
            created_at: Utc::now(),
        };
        let replaced = self.store.upsert_acknowledgment(&ack).await?;
        info!(
            target: "interactions",
            alert_key,
            user_id = %user.id,
            replaced,
            "acknowledgment added"
        );
        self.bus.publish(
            alert_key,
            AlertUpdate::ack_added(user.clone(), ack.clone(), replaced),
        );
        Ok(AckRecorded { ack, replaced })
    }

    /// Removes the caller's acknowledgment. Succeeds silently when none
    /// exists; only an actual removal is broadcast.
    pub async fn delete_acknowledgment(&self, user: &User, alert_key: &str) -> Result<()> {
        let lock = self.key_lock(alert_key);
        let _ordering = lock.lock().await;

        if let Some(removed) = self
            .store
            .delete_acknowledgment(alert_key, &user.id)
            .await?
        {
            info!(
                target: "interactions",
                alert_key,
                user_id = %user.id,
                "acknowledgment removed"
            );
            self.bus
                .publish(alert_key, AlertUpdate::ack_removed(user.clone(), removed));
        }
        Ok(())
    }

    /// All acknowledgments of one alert, oldest first.
    pub async fn list_acknowledgments(&self, alert_key: &str) -> Result<Vec<Acknowledgment>> {
        self.store.acknowledgments_for_alert(alert_key).await
    }

    /// Posts a comment, resolving any `@username` mentions at commit time.
    pub async fn add_comment(
        &self,
        user: &User,
        alert_key: &str,
        content: &str,
    ) -> Result<CommentPosted> {
        if alert_key.trim().is_empty() {
            return Err(Error::invalid_argument("alert key must not be empty"));
        }
        if content.trim().is_empty() {
            return Err(Error::invalid_argument("comment content must not be empty"));
        }
        if content.len() > MAX_COMMENT_BYTES {
            return Err(Error::invalid_argument(format!(
                "comment content exceeds {} bytes",
                MAX_COMMENT_BYTES
            )));
        }

        let lock = self.key_lock(alert_key);
        let _ordering = lock.lock().await;

        let mut mentioned = Vec::new();
        for candidate in mentions::extract(content) {
            if let Some(found) = self.store.credentials_by_username(&candidate).await? {
                mentioned.push(found.user);
            }
        }

        let comment = Comment {
            id: Uuid::new_v4().to_string(),
            alert_key: alert_key.to_string(),
            user_id: user.id.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.store.insert_comment(&comment).await?;
        info!(
            target: "interactions",
            alert_key,
            user_id = %user.id,
            comment_id = %comment.id,
            mentions = mentioned.len(),
            "comment added"
        );
        self.bus.publish(
            alert_key,
            AlertUpdate::comment_added(user.clone(), comment.clone()),
        );
        Ok(CommentPosted { comment, mentioned })
    }

    /// Soft-deletes the caller's own comment. Deleting an already-deleted
    /// comment succeeds without a second broadcast; a comment that never
    /// existed is `NotFound`.
    pub async fn delete_comment(&self, user: &User, comment_id: &str) -> Result<()> {
        let comment = self
            .store
            .comment_by_id(comment_id)
            .await?
            .ok_or_else(|| Error::not_found("comment"))?;
        if comment.user_id != user.id {
            return Err(Error::permission_denied(
                "comment belongs to another user",
            ));
        }

        let lock = self.key_lock(&comment.alert_key);
        let _ordering = lock.lock().await;

        let now = Utc::now();
        let deleted = self.store.soft_delete_comment(comment_id, now).await?;
        if deleted {
            let mut tombstone = comment;
            tombstone.deleted_at = Some(now);
            info!(
                target: "interactions",
                alert_key = %tombstone.alert_key,
                comment_id,
                "comment deleted"
            );
            let alert_key = tombstone.alert_key.clone();
            self.bus.publish(
                &alert_key,
                AlertUpdate::comment_deleted(user.clone(), tombstone),
            );
        }
        Ok(())
    }

    /// Comments on one alert, oldest first; soft-deleted rows only when
    /// explicitly requested.
    pub async fn list_comments(
        &self,
        alert_key: &str,
        include_deleted: bool,
    ) -> Result<Vec<Comment>> {
        self.store.comments_for_alert(alert_key, include_deleted).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notificator_core::UpdateKind;
    use notificator_persistence::SqliteStore;

    async fn fixture() -> (Arc<dyn Store>, Arc<UpdateBus>, InteractionService) {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(store);
        let bus = Arc::new(UpdateBus::new());
        let service = InteractionService::new(store.clone(), bus.clone());
        (store, bus, service)
    }

    async fn make_user(store: &Arc<dyn Store>, username: &str) -> User {
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: None,
            created_at: Utc::now(),
            last_login_at: None,
        };
        store.create_user(&user, "hash").await.unwrap();
        user
    }

    #[tokio::test]
    async fn second_ack_replaces_first() {
        let (store, bus, service) = fixture().await;
        let alice = make_user(&store, "alice").await;
        let sub = bus.subscribe("k1").unwrap();

        let first = service
            .add_acknowledgment(&alice, "k1", Some("looking".into()))
            .await
            .unwrap();
        assert!(!first.replaced);
        let second = service
            .add_acknowledgment(&alice, "k1", Some("confirmed downtime".into()))
            .await
            .unwrap();
        assert!(second.replaced);

        let listed = service.list_acknowledgments("k1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].reason.as_deref(), Some("confirmed downtime"));

        assert_eq!(sub.recv().await.unwrap().kind, UpdateKind::AckAdded);
        assert_eq!(sub.recv().await.unwrap().kind, UpdateKind::AckReplaced);
    }

    #[tokio::test]
    async fn two_users_ack_independently() {
        let (store, _bus, service) = fixture().await;
        let alice = make_user(&store, "alice").await;
        let bob = make_user(&store, "bob").await;

        service
            .add_acknowledgment(&alice, "k1", Some("investigating".into()))
            .await
            .unwrap();
        service.add_acknowledgment(&bob, "k1", None).await.unwrap();

        let listed = service.list_acknowledgments("k1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].user_id, alice.id);
        assert_eq!(listed[1].user_id, bob.id);
        assert!(listed[1].reason.is_none());
    }

    #[tokio::test]
    async fn ack_delete_is_silent_when_absent() {
        let (store, bus, service) = fixture().await;
        let alice = make_user(&store, "alice").await;
        let sub = bus.subscribe("k1").unwrap();

        service.delete_acknowledgment(&alice, "k1").await.unwrap();
        assert!(sub.try_recv().is_none());

        service.add_acknowledgment(&alice, "k1", None).await.unwrap();
        service.delete_acknowledgment(&alice, "k1").await.unwrap();
        assert_eq!(sub.recv().await.unwrap().kind, UpdateKind::AckAdded);
        assert_eq!(sub.recv().await.unwrap().kind, UpdateKind::AckRemoved);
    }

    #[tokio::test]
    async fn comment_content_bounds() {
        let (store, _bus, service) = fixture().await;
        let alice = make_user(&store, "alice").await;

        assert!(matches!(
            service.add_comment(&alice, "k1", "   ").await.unwrap_err(),
            Error::InvalidArgument { .. }
        ));

        let at_limit = "x".repeat(MAX_COMMENT_BYTES);
        service.add_comment(&alice, "k1", &at_limit).await.unwrap();

        let over_limit = "x".repeat(MAX_COMMENT_BYTES + 1);
        assert!(matches!(
            service.add_comment(&alice, "k1", &over_limit).await.unwrap_err(),
            Error::InvalidArgument { .. }
        ));
    }

    #[tokio::test]
    async fn mentions_resolve_against_registered_users() {
        let (store, _bus, service) = fixture().await;
        let alice = make_user(&store, "alice").await;
        let bob = make_user(&store, "bob").await;

        let posted = service
            .add_comment(&alice, "k1", "@bob @ghost can you look?")
            .await
            .unwrap();
        assert_eq!(posted.mentioned.len(), 1);
        assert_eq!(posted.mentioned[0].id, bob.id);
        // The unresolved token stays in the stored content.
        assert!(posted.comment.content.contains("@ghost"));
    }

    #[tokio::test]
    async fn only_the_author_may_delete() {
        let (store, _bus, service) = fixture().await;
        let alice = make_user(&store, "alice").await;
        let bob = make_user(&store, "bob").await;

        let posted = service.add_comment(&alice, "k1", "c1").await.unwrap();
        let err = service
            .delete_comment(&bob, &posted.comment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));

        let listed = service.list_comments("k1", false).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].is_deleted());
    }

    #[tokio::test]
    async fn delete_comment_is_idempotent() {
        let (store, bus, service) = fixture().await;
        let alice = make_user(&store, "alice").await;
        let sub = bus.subscribe("k1").unwrap();

        let posted = service.add_comment(&alice, "k1", "c1").await.unwrap();
        service.delete_comment(&alice, &posted.comment.id).await.unwrap();
        // Second delete succeeds without a second broadcast.
        service.delete_comment(&alice, &posted.comment.id).await.unwrap();
        assert!(matches!(
            service.delete_comment(&alice, "never-existed").await.unwrap_err(),
            Error::NotFound { .. }
        ));

        assert_eq!(sub.recv().await.unwrap().kind, UpdateKind::CommentAdded);
        assert_eq!(sub.recv().await.unwrap().kind, UpdateKind::CommentDeleted);
        assert!(sub.try_recv().is_none());

        let hidden = service.list_comments("k1", false).await.unwrap();
        assert!(hidden.is_empty());
        let all = service.list_comments("k1", true).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_deleted());
    }

    #[tokio::test]
    async fn subscriber_sees_mutations_in_issue_order() {
        let (store, bus, service) = fixture().await;
        let alice = make_user(&store, "alice").await;
        let sub = bus.subscribe("k1").unwrap();

        service
            .add_acknowledgment(&alice, "k1", Some("r".into()))
            .await
            .unwrap();
        service.add_comment(&alice, "k1", "c1").await.unwrap();
        service.delete_acknowledgment(&alice, "k1").await.unwrap();

        assert_eq!(sub.recv().await.unwrap().kind, UpdateKind::AckAdded);
        assert_eq!(sub.recv().await.unwrap().kind, UpdateKind::CommentAdded);
        assert_eq!(sub.recv().await.unwrap().kind, UpdateKind::AckRemoved);
    }

    #[tokio::test]
    async fn concurrent_writers_on_one_key_all_land() {
        let (store, bus, service) = fixture().await;
        let alice = make_user(&store, "alice").await;
        let sub = bus.subscribe("k1").unwrap();
        let service = Arc::new(service);

        let mut handles = Vec::new();
        for index in 0..10 {
            let service = service.clone();
            let alice = alice.clone();
            handles.push(tokio::spawn(async move {
                service
                    .add_comment(&alice, "k1", &format!("c{index}"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let listed = service.list_comments("k1", false).await.unwrap();
        assert_eq!(listed.len(), 10);
        for _ in 0..10 {
            assert_eq!(sub.recv().await.unwrap().kind, UpdateKind::CommentAdded);
        }
        assert!(sub.try_recv().is_none());
    }
}
