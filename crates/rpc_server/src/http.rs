//! Plain-HTTP sidecar port: `GET /health` and `GET /metrics` only.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::json;
use tracing::info;

use crate::AppState;

/// Requests with bodies beyond this are rejected outright.
const MAX_BODY_BYTES: u64 = 4096;

/// Serves the sidecar until `shutdown` resolves.
pub async fn serve_http<F>(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: F,
) -> hyper::Result<()>
where
    F: Future<Output = ()>,
{
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let state = state.clone();
                async move { handle_request(req, state).await }
            }))
        }
    });

    info!(target: "http", %addr, "http server listening");
    Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await
}

pub(crate) async fn handle_request(
    req: Request<Body>,
    state: Arc<AppState>,
) -> Result<Response<Body>, hyper::Error> {
    let body_len = req
        .headers()
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);
    if body_len > MAX_BODY_BYTES {
        return Ok(plain_status(StatusCode::PAYLOAD_TOO_LARGE, "payload too large"));
    }

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => Ok(health_response(&state).await),
        (&Method::GET, "/metrics") => Ok(metrics_response(&state).await),
        _ => Ok(plain_status(StatusCode::NOT_FOUND, "not found")),
    }
}

async fn health_response(state: &Arc<AppState>) -> Response<Body> {
    match state.store.health_check().await {
        Ok(()) => json_response(
            StatusCode::OK,
            json!({"status": "healthy", "database": "up"}),
        ),
        Err(_) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"status": "unhealthy", "database": "down"}),
        ),
    }
}

async fn metrics_response(state: &Arc<AppState>) -> Response<Body> {
    let now = Utc::now();
    match state.store.stats(now).await {
        Ok(stats) => json_response(
            StatusCode::OK,
            json!({
                "users": stats.users,
                "active_sessions": stats.active_sessions,
                "comments": stats.comments,
                "acknowledgments": stats.acknowledgments,
                "timestamp": now.timestamp(),
            }),
        ),
        Err(_) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"status": "unhealthy", "database": "down"}),
        ),
    }
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn plain_status(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use notificator_auth::AuthService;
    use notificator_bus::UpdateBus;
    use notificator_config::AuthSection;
    use notificator_interactions::InteractionService;
    use notificator_persistence::{SqliteStore, Store};

    async fn state() -> Arc<AppState> {
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

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_database_up() {
        let state = state().await;
        let req = Request::builder()
            .method(Method::GET)
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = handle_request(req, state).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], "up");
    }

    #[tokio::test]
    async fn metrics_counts_rows() {
        let state = state().await;
        state.auth.register("alice", "pw1234", None).await.unwrap();
        state.auth.login("alice", "pw1234").await.unwrap();

        let req = Request::builder()
            .method(Method::GET)
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = handle_request(req, state).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["users"], 1);
        assert_eq!(body["active_sessions"], 1);
        assert_eq!(body["comments"], 0);
        assert_eq!(body["acknowledgments"], 0);
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn unknown_path_is_404_and_large_bodies_rejected() {
        let state = state().await;
        let req = Request::builder()
            .method(Method::GET)
            .uri("/other")
            .body(Body::empty())
            .unwrap();
        let response = handle_request(req, state.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/health")
            .header(hyper::header::CONTENT_LENGTH, "8192")
            .body(Body::empty())
            .unwrap();
        let response = handle_request(req, state).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
