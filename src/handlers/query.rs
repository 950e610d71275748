//! Read-only HTTP queries over the collaboration state
//!
//! Every response uses the same `{code, message, data}` envelope.

use log::error;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::reply::{json, with_status, Json, WithStatus};

use crate::constants::DEFAULT_RECENT_MESSAGES_LIMIT;
use crate::core::document::DocumentStats;
use crate::core::server::SharedCollabServer;
use crate::core::session::ActiveUser;
use crate::error::{CollabError, Result};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub document_id: String,
    pub stats: DocumentStats,
    pub active_connections: usize,
    pub active_users: Vec<ActiveUser>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
}

type JsonReply = WithStatus<Json>;

fn respond<T: Serialize>(result: Result<T>) -> std::result::Result<JsonReply, Infallible> {
    let reply = match result {
        Ok(data) => with_status(
            json(&ApiResponse {
                code: 0,
                message: "success".to_string(),
                data: Some(data),
            }),
            StatusCode::OK,
        ),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("Query failed: {}", e);
            }
            error_reply(status, &e.to_string())
        }
    };
    Ok(reply)
}

/// Error envelope with the HTTP status as `code`
pub fn error_reply(status: StatusCode, message: &str) -> JsonReply {
    with_status(
        json(&ApiResponse::<()> {
            code: status.as_u16(),
            message: message.to_string(),
            data: None,
        }),
        status,
    )
}

fn status_for(error: &CollabError) -> StatusCode {
    if error.is_not_found() {
        StatusCode::NOT_FOUND
    } else if error.is_message_error() {
        StatusCode::BAD_REQUEST
    } else if matches!(error, CollabError::UpstreamError(_)) {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub async fn document_status(
    document_id: String,
    server: SharedCollabServer,
) -> std::result::Result<JsonReply, Infallible> {
    let result = async {
        let service = server.collaboration();
        let stats = service.get_document_stats(&document_id).await?;
        let active_users = service.get_active_users(&document_id).await?;
        let active_connections = server
            .broadcaster()
            .get_document_connection_count(&document_id)
            .await?;
        Ok::<_, CollabError>(DocumentStatus {
            document_id,
            stats,
            active_connections,
            active_users,
        })
    }
    .await;
    respond(result)
}

pub async fn active_users(
    document_id: String,
    server: SharedCollabServer,
) -> std::result::Result<JsonReply, Infallible> {
    respond(server.collaboration().get_active_users(&document_id).await)
}

pub async fn document_connections(
    document_id: String,
    server: SharedCollabServer,
) -> std::result::Result<JsonReply, Infallible> {
    respond(server.get_document_connections(&document_id).await)
}

pub async fn connection_stats(
    server: SharedCollabServer,
) -> std::result::Result<JsonReply, Infallible> {
    respond(server.get_connection_stats().await)
}

pub async fn recent_messages(
    document_id: String,
    query: MessagesQuery,
    server: SharedCollabServer,
) -> std::result::Result<JsonReply, Infallible> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_MESSAGES_LIMIT)
        .min(server.config().message_log_capacity);
    respond(
        server
            .collaboration()
            .get_recent_messages(&document_id, limit)
            .await,
    )
}
