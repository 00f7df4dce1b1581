//! Auth service endpoints.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use notificator_core::Error;
use notificator_proto::v1;
use notificator_proto::v1::auth_service_server::AuthService as AuthServiceHandler;

use crate::{unary, AppState};

/// gRPC front for registration, login and session management.
pub struct AuthGrpc {
    state: Arc<AppState>,
}

impl AuthGrpc {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl AuthServiceHandler for AuthGrpc {
    async fn register(
        &self,
        request: Request<v1::RegisterRequest>,
    ) -> Result<Response<v1::RegisterResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        unary("auth.register", async move {
            state.ensure_accepting()?;
            let email = Some(req.email).filter(|value| !value.is_empty());
            let user = state.auth.register(&req.username, &req.password, email).await?;
            Ok(v1::RegisterResponse {
                user: Some(v1::User::from(&user)),
            })
        })
        .await
    }

    async fn login(
        &self,
        request: Request<v1::LoginRequest>,
    ) -> Result<Response<v1::LoginResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        unary("auth.login", async move {
            state.ensure_accepting()?;
            let outcome = state.auth.login(&req.username, &req.password).await?;
            Ok(v1::LoginResponse {
                session_id: outcome.session.id,
                user: Some(v1::User::from(&outcome.user)),
                expires_at_ms: outcome.session.expires_at.timestamp_millis(),
            })
        })
        .await
    }

    async fn logout(
        &self,
        request: Request<v1::LogoutRequest>,
    ) -> Result<Response<v1::LogoutResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        // Deliberately unauthenticated: logging out an unknown or expired
        // token still succeeds.
        unary("auth.logout", async move {
            state.auth.logout(&req.session_id).await?;
            Ok(v1::LogoutResponse {})
        })
        .await
    }

    async fn validate_session(
        &self,
        request: Request<v1::ValidateSessionRequest>,
    ) -> Result<Response<v1::ValidateSessionResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        unary("auth.validate_session", async move {
            let user = state.auth.validate_session(&req.session_id).await?;
            Ok(v1::ValidateSessionResponse {
                valid: user.is_some(),
                user: user.as_ref().map(v1::User::from),
            })
        })
        .await
    }

    async fn get_profile(
        &self,
        request: Request<v1::GetProfileRequest>,
    ) -> Result<Response<v1::GetProfileResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        unary("auth.get_profile", async move {
            state.ensure_accepting()?;
            let (user, interaction_count) = state.auth.get_profile(&req.session_id).await?;
            Ok(v1::GetProfileResponse {
                user: Some(v1::User::from(&user)),
                interaction_count,
            })
        })
        .await
    }

    async fn search_users(
        &self,
        request: Request<v1::SearchUsersRequest>,
    ) -> Result<Response<v1::SearchUsersResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        unary("auth.search_users", async move {
            let _caller = state.require_session(&req.session_id).await?;
            let users = state.auth.search_users(&req.query, req.limit).await?;
            Ok(v1::SearchUsersResponse {
                users: users.iter().map(v1::User::from).collect(),
            })
        })
        .await
    }

    async fn change_password(
        &self,
        request: Request<v1::ChangePasswordRequest>,
    ) -> Result<Response<v1::ChangePasswordResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        unary("auth.change_password", async move {
            state.ensure_accepting()?;
            if req.session_id.is_empty() {
                return Err(Error::Unauthenticated);
            }
            state
                .auth
                .change_password(&req.session_id, &req.old_password, &req.new_password)
                .await?;
            Ok(v1::ChangePasswordResponse {})
        })
        .await
    }
}
