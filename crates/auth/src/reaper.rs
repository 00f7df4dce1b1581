//! Periodic session reaper.
//!
//! Bulk cleanup of expired sessions. Works together with the lazy sweep in
//! `validate_session`: the reaper bounds the number of stale rows, the lazy
//! sweep keeps validation itself authoritative.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use notificator_persistence::Store;

/// How often the reaper wakes up.
pub const REAP_INTERVAL: Duration = Duration::from_secs(300);

/// Handle used by the supervisor to stop the reaper task.
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signals the task and waits for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Spawns the reaper loop on the current runtime.
pub fn spawn_reaper(store: Arc<dyn Store>, interval: Duration) -> ReaperHandle {
    let (shutdown, mut signal) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.delete_expired_sessions(Utc::now()).await {
                        Ok(0) => {}
                        Ok(reaped) => {
                            info!(target: "auth", reaped, "reaped expired sessions");
                        }
                        Err(err) => {
                            warn!(target: "auth", error = %err, "session reap failed");
                        }
                    }
                }
                _ = signal.changed() => break,
            }
        }
    });
    ReaperHandle { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use notificator_core::Session;
    use notificator_persistence::SqliteStore;

    #[tokio::test]
    async fn reaper_deletes_expired_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(store);

        let user = notificator_core::User {
            id: "u-1".to_string(),
            username: "alice".to_string(),
            email: None,
            created_at: Utc::now(),
            last_login_at: None,
        };
        store.create_user(&user, "hash").await.unwrap();
        let now = Utc::now();
        store
            .insert_session(&Session {
                id: "stale".to_string(),
                user_id: user.id.clone(),
                created_at: now - ChronoDuration::hours(2),
                expires_at: now - ChronoDuration::hours(1),
            })
            .await
            .unwrap();

        let handle = spawn_reaper(store.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;

        assert!(store.session_by_id("stale").await.unwrap().is_none());
    }
}
