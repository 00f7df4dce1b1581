//! Notificator Identity & Session Store
//!
//! Credentialed user records, bcrypt password hashing, server-authoritative
//! session tokens with TTL, and user search. All operations are safe under
//! parallel invocation; the only background state is the session reaper task.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use notificator_config::AuthSection;
use notificator_core::{Error, Result, Session, User};
use notificator_persistence::Store;

pub mod password;
pub mod reaper;
pub mod token;

pub use reaper::{spawn_reaper, ReaperHandle, REAP_INTERVAL};

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_CHARS: usize = 4;

/// Hard cap applied to `search_users` limits.
pub const MAX_SEARCH_LIMIT: u32 = 50;

/// A successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,
    pub user: User,
}

/// Identity and session operations over the shared store.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
    session_ttl: Duration,
    bcrypt_cost: u32,
    /// Valid bcrypt hash verified against when the username is unknown, so a
    /// missing user costs the same as a wrong password.
    dummy_hash: String,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, config: &AuthSection) -> Result<Self> {
        let dummy_hash = password::hash("login-timing-placeholder", config.bcrypt_cost)?;
        Ok(Self {
            store,
            session_ttl: Duration::hours(config.session_ttl_hours as i64),
            bcrypt_cost: config.bcrypt_cost,
            dummy_hash,
        })
    }

    /// Creates a new user. The password is hashed before it ever reaches the
    /// store; the plaintext is dropped here.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<String>,
    ) -> Result<User> {
        if username.trim().is_empty() {
            return Err(Error::invalid_argument("username must not be empty"));
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(Error::invalid_argument(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_CHARS
            )));
        }

        let hashed = password::hash(password, self.bcrypt_cost)?;
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email,
            created_at: Utc::now(),
            last_login_at: None,
        };
        self.store.create_user(&user, &hashed).await?;
        info!(target: "auth", user_id = %user.id, "registered user");
        Ok(user)
    }

    /// Authenticates credentials and opens a fresh session.
    ///
    /// A missing user and a wrong password are indistinguishable to the
    /// caller; both cost one bcrypt verification and both yield
    /// `Unauthenticated`.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome> {
        let credentials = self.store.credentials_by_username(username).await?;
        let Some(credentials) = credentials else {
            let _ = password::verify(password, &self.dummy_hash)?;
            return Err(Error::Unauthenticated);
        };
        if !password::verify(password, &credentials.password_hash)? {
            return Err(Error::Unauthenticated);
        }

        let now = Utc::now();
        let session = Session {
            id: token::generate(),
            user_id: credentials.user.id.clone(),
            created_at: now,
            expires_at: now + self.session_ttl,
        };
        self.store.insert_session(&session).await?;
        self.store
            .update_last_login(&credentials.user.id, now)
            .await?;

        let mut user = credentials.user;
        user.last_login_at = Some(now);
        info!(target: "auth", user_id = %user.id, "login");
        Ok(LoginOutcome { session, user })
    }

    /// Destroys a session. Idempotent: unknown or expired tokens succeed.
    pub async fn logout(&self, session_id: &str) -> Result<()> {
        let _ = self.store.delete_session(session_id).await?;
        Ok(())
    }

    /// Resolves a session to its user, sweeping the row lazily once expired.
    /// Expiry is never extended.
    pub async fn validate_session(&self, session_id: &str) -> Result<Option<User>> {
        let Some(session) = self.store.session_by_id(session_id).await? else {
            return Ok(None);
        };
        if session.is_expired(Utc::now()) {
            let _ = self.store.delete_session(session_id).await?;
            return Ok(None);
        }
        self.store.user_by_id(&session.user_id).await
    }

    /// Like [`AuthService::validate_session`] but failure is an error; used
    /// by the RPC authentication middleware.
    pub async fn authenticate(&self, session_id: &str) -> Result<User> {
        self.validate_session(session_id)
            .await?
            .ok_or(Error::Unauthenticated)
    }

    /// The caller's profile plus a count of their recorded interactions.
    pub async fn get_profile(&self, session_id: &str) -> Result<(User, u64)> {
        let user = self.authenticate(session_id).await?;
        let interactions = self.store.interaction_count(&user.id).await?;
        Ok((user, interactions))
    }

    /// Case-insensitive prefix search on usernames; the limit is clamped
    /// server-side.
    pub async fn search_users(&self, query: &str, limit: u32) -> Result<Vec<User>> {
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        self.store.search_users(query, limit).await
    }

    /// Replaces the caller's password and destroys every one of their
    /// sessions, including the current one.
    pub async fn change_password(
        &self,
        session_id: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let user = self.authenticate(session_id).await?;
        if new_password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(Error::invalid_argument(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_CHARS
            )));
        }

        let credentials = self
            .store
            .credentials_by_username(&user.username)
            .await?
            .ok_or(Error::Unauthenticated)?;
        if !password::verify(old_password, &credentials.password_hash)? {
            return Err(Error::Unauthenticated);
        }

        let hashed = password::hash(new_password, self.bcrypt_cost)?;
        self.store.update_password_hash(&user.id, &hashed).await?;
        let destroyed = self.store.delete_sessions_for_user(&user.id).await?;
        info!(
            target: "auth",
            user_id = %user.id,
            sessions_destroyed = destroyed,
            "password changed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notificator_persistence::SqliteStore;

    async fn service() -> AuthService {
        service_with_ttl(168).await
    }

    async fn service_with_ttl(ttl_hours: u64) -> AuthService {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        let section = AuthSection {
            session_ttl_hours: ttl_hours,
            bcrypt_cost: 4, // MIN_COST keeps tests fast
        };
        AuthService::new(Arc::new(store), &section).unwrap()
    }

    #[tokio::test]
    async fn register_then_login() {
        let auth = service().await;
        let user = auth.register("alice", "pw1234", None).await.unwrap();
        assert_eq!(user.username, "alice");

        let outcome = auth.login("alice", "pw1234").await.unwrap();
        assert_eq!(outcome.user.id, user.id);
        assert!(outcome.user.last_login_at.is_some());
        assert_eq!(outcome.session.user_id, user.id);
    }

    #[tokio::test]
    async fn wrong_password_and_missing_user_are_indistinguishable() {
        let auth = service().await;
        auth.register("alice", "pw1234", None).await.unwrap();

        let wrong = auth.login("alice", "pw9999").await.unwrap_err();
        let missing = auth.login("nobody", "pw1234").await.unwrap_err();
        assert_eq!(wrong, Error::Unauthenticated);
        assert_eq!(missing, Error::Unauthenticated);
    }

    #[tokio::test]
    async fn register_validates_input() {
        let auth = service().await;
        assert!(matches!(
            auth.register("", "pw1234", None).await.unwrap_err(),
            Error::InvalidArgument { .. }
        ));
        assert!(matches!(
            auth.register("alice", "pw1", None).await.unwrap_err(),
            Error::InvalidArgument { .. }
        ));
        // Four characters is the documented floor.
        auth.register("alice", "pw12", None).await.unwrap();

        let duplicate = auth.register("alice", "pw1234", None).await.unwrap_err();
        assert!(matches!(duplicate, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_final() {
        let auth = service().await;
        auth.register("alice", "pw1234", None).await.unwrap();
        let outcome = auth.login("alice", "pw1234").await.unwrap();
        let session_id = outcome.session.id;

        assert!(auth.validate_session(&session_id).await.unwrap().is_some());
        auth.logout(&session_id).await.unwrap();
        auth.logout(&session_id).await.unwrap();
        assert!(auth.validate_session(&session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_is_swept_on_validation() {
        let auth = service_with_ttl(0).await;
        auth.register("alice", "pw1234", None).await.unwrap();
        let outcome = auth.login("alice", "pw1234").await.unwrap();

        // TTL of zero expires the session at its own creation instant.
        assert!(auth
            .validate_session(&outcome.session.id)
            .await
            .unwrap()
            .is_none());
        let err = auth.authenticate(&outcome.session.id).await.unwrap_err();
        assert_eq!(err, Error::Unauthenticated);
    }

    #[tokio::test]
    async fn search_clamps_limit() {
        let auth = service().await;
        for index in 0..55 {
            auth.register(&format!("user{index:02}"), "pw1234", None)
                .await
                .unwrap();
        }
        let found = auth.search_users("user", 1000).await.unwrap();
        assert_eq!(found.len(), MAX_SEARCH_LIMIT as usize);

        let narrow = auth.search_users("user0", 10).await.unwrap();
        assert_eq!(narrow.len(), 10);
    }

    #[tokio::test]
    async fn profile_counts_interactions() {
        let auth = service().await;
        auth.register("alice", "pw1234", None).await.unwrap();
        let outcome = auth.login("alice", "pw1234").await.unwrap();

        let (user, interactions) = auth.get_profile(&outcome.session.id).await.unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(interactions, 0);
    }

    #[tokio::test]
    async fn change_password_destroys_all_sessions() {
        let auth = service().await;
        auth.register("alice", "pw1234", None).await.unwrap();
        let first = auth.login("alice", "pw1234").await.unwrap();
        let second = auth.login("alice", "pw1234").await.unwrap();

        auth.change_password(&first.session.id, "pw1234", "pw5678")
            .await
            .unwrap();

        assert!(auth
            .validate_session(&first.session.id)
            .await
            .unwrap()
            .is_none());
        assert!(auth
            .validate_session(&second.session.id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            auth.login("alice", "pw1234").await.unwrap_err(),
            Error::Unauthenticated
        );
        auth.login("alice", "pw5678").await.unwrap();
    }
}
