//! Alert service endpoints: acknowledgments, comments and the live update
//! stream.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use notificator_core::{Error, UpdateKind};
use notificator_proto::v1;
use notificator_proto::v1::alert_service_server::AlertService as AlertServiceHandler;

use crate::{status_from_error, unary, AppState};

/// Buffered wire events per open stream between the bus and tonic.
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// gRPC front for alert interactions.
pub struct AlertGrpc {
    state: Arc<AppState>,
}

impl AlertGrpc {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl AlertServiceHandler for AlertGrpc {
    type SubscribeToAlertUpdatesStream =
        Pin<Box<dyn Stream<Item = Result<v1::AlertUpdate, Status>> + Send>>;

    async fn add_acknowledgment(
        &self,
        request: Request<v1::AddAcknowledgmentRequest>,
    ) -> Result<Response<v1::AddAcknowledgmentResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        unary("alert.add_acknowledgment", async move {
            let user = state.require_session(&req.session_id).await?;
            let reason = Some(req.reason).filter(|value| !value.is_empty());
            let recorded = state
                .interactions
                .add_acknowledgment(&user, &req.alert_key, reason)
                .await?;
            Ok(v1::AddAcknowledgmentResponse {
                acknowledgment: Some(v1::Acknowledgment::from(&recorded.ack)),
                replaced: recorded.replaced,
            })
        })
        .await
    }

    async fn get_acknowledgments(
        &self,
        request: Request<v1::GetAcknowledgmentsRequest>,
    ) -> Result<Response<v1::GetAcknowledgmentsResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        unary("alert.get_acknowledgments", async move {
            let _caller = state.require_session(&req.session_id).await?;
            let acks = state.interactions.list_acknowledgments(&req.alert_key).await?;
            Ok(v1::GetAcknowledgmentsResponse {
                acknowledgments: acks.iter().map(v1::Acknowledgment::from).collect(),
            })
        })
        .await
    }

    async fn delete_acknowledgment(
        &self,
        request: Request<v1::DeleteAcknowledgmentRequest>,
    ) -> Result<Response<v1::DeleteAcknowledgmentResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        unary("alert.delete_acknowledgment", async move {
            let user = state.require_session(&req.session_id).await?;
            state
                .interactions
                .delete_acknowledgment(&user, &req.alert_key)
                .await?;
            Ok(v1::DeleteAcknowledgmentResponse {})
        })
        .await
    }

    async fn add_comment(
        &self,
        request: Request<v1::AddCommentRequest>,
    ) -> Result<Response<v1::AddCommentResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        unary("alert.add_comment", async move {
            let user = state.require_session(&req.session_id).await?;
            let posted = state
                .interactions
                .add_comment(&user, &req.alert_key, &req.content)
                .await?;
            Ok(v1::AddCommentResponse {
                comment: Some(v1::Comment::from(&posted.comment)),
                mentioned_users: posted.mentioned.iter().map(v1::User::from).collect(),
            })
        })
        .await
    }

    async fn get_comments(
        &self,
        request: Request<v1::GetCommentsRequest>,
    ) -> Result<Response<v1::GetCommentsResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        unary("alert.get_comments", async move {
            let _caller = state.require_session(&req.session_id).await?;
            let comments = state
                .interactions
                .list_comments(&req.alert_key, req.include_deleted)
                .await?;
            Ok(v1::GetCommentsResponse {
                comments: comments.iter().map(v1::Comment::from).collect(),
            })
        })
        .await
    }

    async fn delete_comment(
        &self,
        request: Request<v1::DeleteCommentRequest>,
    ) -> Result<Response<v1::DeleteCommentResponse>, Status> {
        let state = self.state.clone();
        let req = request.into_inner();
        unary("alert.delete_comment", async move {
            let user = state.require_session(&req.session_id).await?;
            state.interactions.delete_comment(&user, &req.comment_id).await?;
            Ok(v1::DeleteCommentResponse {})
        })
        .await
    }

    async fn subscribe_to_alert_updates(
        &self,
        request: Request<v1::SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeToAlertUpdatesStream>, Status> {
        let req = request.into_inner();
        let user = self
            .state
            .require_session(&req.session_id)
            .await
            .map_err(status_from_error)?;
        if req.alert_key.is_empty() {
            return Err(Status::invalid_argument("alert key must not be empty"));
        }

        let subscription = self
            .state
            .bus
            .subscribe(&req.alert_key)
            .map_err(status_from_error)?;
        info!(
            target: "rpc",
            method = "alert.subscribe_to_alert_updates",
            alert_key = %req.alert_key,
            user_id = %user.id,
            "stream opened"
        );

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = subscription.recv() => {
                        let Some(update) = received else { break };
                        let stopping = update.kind == UpdateKind::ServerStopping;
                        if tx.send(Ok(v1::AlertUpdate::from(&update))).await.is_err() {
                            break;
                        }
                        if stopping {
                            break;
                        }
                    }
                    // Peer cancellation: free the bus subscription promptly.
                    _ = tx.closed() => break,
                }
            }
            debug!(
                target: "rpc",
                alert_key = %subscription.alert_key(),
                "stream closed"
            );
            // Dropping the subscription here releases its buffer.
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}
