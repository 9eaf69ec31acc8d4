//! Data-request HTTP server
//!
//! One endpoint, `GET /datareq?taskID=<u64>&epoch=<u64>&req=<string>`.
//! The handler forwards each request to the framework's dispatcher over a
//! channel and answers with the payload bytes, or:
//! - 400 for missing or unparseable parameters,
//! - 409 with the current epoch as body on epoch discrepancy,
//! - 500 for internal errors.
//!
//! Peer misbehavior is never allowed to take the server down.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::common::Result;

pub const DATA_REQUEST_PATH: &str = "/datareq";

/// Query parameters of a data request, named as they travel on the wire.
#[derive(Debug, Deserialize)]
pub struct DataQuery {
    #[serde(rename = "taskID")]
    pub task_id: u64,
    pub epoch: u64,
    pub req: String,
}

/// A parsed data request awaiting an answer from the dispatcher.
#[derive(Debug)]
pub struct ServeRequest {
    /// Requester's slot
    pub from: u64,
    /// Epoch the requester believes is current
    pub epoch: u64,
    /// Request tag, interpreted by the user task
    pub req: String,
    pub reply: oneshot::Sender<ServeReply>,
}

/// Dispatcher's answer to a data request.
#[derive(Debug)]
pub enum ServeReply {
    Data(Vec<u8>),
    EpochMismatch { current: u64 },
    BadRequest(String),
    Internal(String),
}

#[derive(Clone)]
struct ServerState {
    requests: mpsc::UnboundedSender<ServeRequest>,
}

/// Build the data-request router over a dispatcher channel.
pub fn create_router(requests: mpsc::UnboundedSender<ServeRequest>) -> Router {
    Router::new()
        .route(DATA_REQUEST_PATH, axum::routing::get(data_request))
        .with_state(ServerState { requests })
}

/// Serve data requests on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    requests: mpsc::UnboundedSender<ServeRequest>,
    cancel: CancellationToken,
) -> Result<()> {
    let router = create_router(requests);
    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

async fn data_request(
    State(state): State<ServerState>,
    query: std::result::Result<Query<DataQuery>, QueryRejection>,
) -> impl IntoResponse {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("bad data request: {}", rejection),
            )
                .into_response();
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let request = ServeRequest {
        from: query.task_id,
        epoch: query.epoch,
        req: query.req,
        reply: reply_tx,
    };
    if state.requests.send(request).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "node shutting down").into_response();
    }

    match reply_rx.await {
        Ok(ServeReply::Data(bytes)) => (StatusCode::OK, bytes).into_response(),
        Ok(ServeReply::EpochMismatch { current }) => {
            (StatusCode::CONFLICT, current.to_string()).into_response()
        }
        Ok(ServeReply::BadRequest(msg)) => (StatusCode::BAD_REQUEST, msg).into_response(),
        Ok(ServeReply::Internal(msg)) => {
            tracing::warn!("data request failed: {}", msg);
            (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
        }
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "node shutting down").into_response(),
    }
}
