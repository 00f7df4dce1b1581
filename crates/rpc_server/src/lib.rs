//! Notificator RPC Server
//!
//! The authenticated gRPC surface plus the plain-HTTP sidecar port. Unary
//! endpoints run under a server-side deadline and log method, duration and
//! outcome; payloads are never logged. `session_id` travels in request
//! bodies and is resolved to a user before any handler logic runs.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tonic::transport::Server;
use tonic::{Response, Status};
use tracing::{error, info};

use notificator_auth::AuthService;
use notificator_bus::UpdateBus;
use notificator_core::{Error, User};
use notificator_interactions::InteractionService;
use notificator_persistence::Store;
use notificator_proto::v1::alert_service_server::AlertServiceServer;
use notificator_proto::v1::auth_service_server::AuthServiceServer;

pub mod alert_service;
pub mod auth_service;
pub mod http;

use alert_service::AlertGrpc;
use auth_service::AuthGrpc;

/// Server-side deadline applied to every unary call.
pub const UNARY_DEADLINE: Duration = Duration::from_secs(10);

/// Shared handles behind both RPC services and the HTTP sidecar.
pub struct AppState {
    pub auth: AuthService,
    pub interactions: Arc<InteractionService>,
    pub bus: Arc<UpdateBus>,
    pub store: Arc<dyn Store>,
    draining: AtomicBool,
}

impl AppState {
    pub fn new(
        auth: AuthService,
        interactions: Arc<InteractionService>,
        bus: Arc<UpdateBus>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            auth,
            interactions,
            bus,
            store,
            draining: AtomicBool::new(false),
        }
    }

    /// Flips the server into draining mode: logins and authenticated calls
    /// answer `Unavailable` from here on.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Gate for endpoints that must refuse work during drain.
    pub(crate) fn ensure_accepting(&self) -> Result<(), Error> {
        if self.is_draining() {
            Err(Error::Unavailable)
        } else {
            Ok(())
        }
    }

    /// Authentication middleware: resolves the body-borne `session_id` to a
    /// user. Applied to every endpoint except `Register`, `Login`,
    /// `ValidateSession` and the deliberately idempotent `Logout`.
    pub(crate) async fn require_session(&self, session_id: &str) -> Result<User, Error> {
        self.ensure_accepting()?;
        if session_id.is_empty() {
            return Err(Error::Unauthenticated);
        }
        self.auth.authenticate(session_id).await
    }
}

/// The gRPC server front.
pub struct RpcServer {
    state: Arc<AppState>,
}

impl RpcServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Serves both services until `shutdown` resolves, then stops accepting
    /// new calls while letting in-flight unary calls complete.
    pub async fn serve<F>(
        &self,
        addr: SocketAddr,
        shutdown: F,
    ) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()>,
    {
        info!(target: "rpc", %addr, "grpc server listening");
        Server::builder()
            .add_service(AuthServiceServer::new(AuthGrpc::new(self.state.clone())))
            .add_service(AlertServiceServer::new(AlertGrpc::new(self.state.clone())))
            .serve_with_shutdown(addr, shutdown)
            .await
    }
}

/// Maps the shared taxonomy onto gRPC status codes. Only `InvalidArgument`
/// carries caller-authored detail; everything else stays generic.
pub(crate) fn status_from_error(err: Error) -> Status {
    match err {
        Error::InvalidArgument { message } => Status::invalid_argument(message),
        Error::Unauthenticated => Status::unauthenticated("invalid or expired session"),
        Error::PermissionDenied { .. } => Status::permission_denied("permission denied"),
        Error::AlreadyExists { resource } => {
            Status::already_exists(format!("{resource} already exists"))
        }
        Error::NotFound { resource } => Status::not_found(format!("{resource} not found")),
        Error::Unavailable => Status::unavailable("service unavailable"),
        Error::Internal { message } => {
            error!(target: "rpc", detail = %message, "internal error");
            Status::internal("internal error")
        }
    }
}

/// Runs one unary handler under the server deadline and logs its outcome.
pub(crate) async fn unary<T, F>(method: &'static str, handler: F) -> Result<Response<T>, Status>
where
    F: Future<Output = Result<T, Error>>,
{
    let started = Instant::now();
    let outcome = match tokio::time::timeout(UNARY_DEADLINE, handler).await {
        Ok(result) => result.map_err(status_from_error),
        Err(_) => Err(Status::deadline_exceeded("deadline exceeded")),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let code = outcome.as_ref().map_or_else(Status::code, |_| tonic::Code::Ok);
    info!(target: "rpc", method, elapsed_ms, status = ?code, "unary call");
    outcome.map(Response::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notificator_config::AuthSection;
    use notificator_persistence::SqliteStore;

    pub(crate) async fn test_state() -> Arc<AppState> {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(store);
        let bus = Arc::new(UpdateBus::new());
        let auth = AuthService::new(
            store.clone(),
            &AuthSection {
                session_ttl_hours: 168,
                bcrypt_cost: 4,
            },
        )
        .unwrap();
        let interactions = Arc::new(InteractionService::new(store.clone(), bus.clone()));
        Arc::new(AppState::new(auth, interactions, bus, store))
    }

    #[test]
    fn status_mapping_keeps_detail_only_for_invalid_argument() {
        let status = status_from_error(Error::invalid_argument("content too long"));
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert_eq!(status.message(), "content too long");

        let status = status_from_error(Error::internal("driver said: password=hunter2"));
        assert_eq!(status.code(), tonic::Code::Internal);
        assert_eq!(status.message(), "internal error");

        let status = status_from_error(Error::Unauthenticated);
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[tokio::test]
    async fn require_session_rejects_empty_and_unknown() {
        let state = test_state().await;
        assert!(matches!(
            state.require_session("").await.unwrap_err(),
            Error::Unauthenticated
        ));
        assert!(matches!(
            state.require_session("deadbeef").await.unwrap_err(),
            Error::Unauthenticated
        ));
    }

    #[tokio::test]
    async fn draining_turns_sessions_away() {
        let state = test_state().await;
        state.auth.register("alice", "pw1234", None).await.unwrap();
        let outcome = state.auth.login("alice", "pw1234").await.unwrap();

        state.begin_drain();
        assert!(matches!(
            state.require_session(&outcome.session.id).await.unwrap_err(),
            Error::Unavailable
        ));
    }

    #[tokio::test]
    async fn unary_logs_and_wraps() {
        let ok = unary("test.ok", async { Ok::<_, Error>(42u32) }).await;
        assert_eq!(ok.unwrap().into_inner(), 42);

        let err = unary("test.err", async {
            Err::<u32, _>(Error::not_found("comment"))
        })
        .await;
        assert_eq!(err.unwrap_err().code(), tonic::Code::NotFound);
    }
}
