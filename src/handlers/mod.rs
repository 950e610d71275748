//! Request handlers for the HTTP and WebSocket endpoints

pub mod query;
pub mod websocket;

use log::info;
use serde::Deserialize;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::constants::{API_VERSION_PATH, COLLABORATION_PATH};
use crate::core::connection::ConnectionKey;
use crate::core::server::SharedCollabServer;

pub use websocket::handle_ws_client;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<String>,
}

/// All routes of the hub
pub fn routes(
    server: SharedCollabServer,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })));

    let api = warp::path(API_VERSION_PATH).and(warp::path(COLLABORATION_PATH));

    let status = api
        .clone()
        .and(warp::path!("status" / String))
        .and(warp::get())
        .and(with_server(server.clone()))
        .and_then(query::document_status);

    let users = api
        .clone()
        .and(warp::path!("users" / String))
        .and(warp::get())
        .and(with_server(server.clone()))
        .and_then(query::active_users);

    let document_connections = api
        .clone()
        .and(warp::path!("conn" / String))
        .and(warp::get())
        .and(with_server(server.clone()))
        .and_then(query::document_connections);

    let connection_stats = api
        .clone()
        .and(warp::path!("conn"))
        .and(warp::get())
        .and(with_server(server.clone()))
        .and_then(query::connection_stats);

    let messages = api
        .clone()
        .and(warp::path!("messages" / String))
        .and(warp::get())
        .and(warp::query::<query::MessagesQuery>())
        .and(with_server(server.clone()))
        .and_then(query::recent_messages);

    // Last, so the fixed segments above win over a document called "conn"
    let collaborate = api
        .and(warp::path!(String))
        .and(warp::ws())
        .and(warp::query::<WsQuery>())
        .and(with_server(server))
        .map(upgrade);

    health
        .or(status)
        .or(users)
        .or(document_connections)
        .or(connection_stats)
        .or(messages)
        .or(collaborate)
}

fn upgrade(
    document_id: String,
    ws: warp::ws::Ws,
    query: WsQuery,
    server: SharedCollabServer,
) -> Box<dyn Reply> {
    let user_id = match query.user_id.filter(|id| !id.trim().is_empty()) {
        Some(user_id) => user_id,
        None => {
            return Box::new(query::error_reply(
                StatusCode::BAD_REQUEST,
                "user_id query parameter is required",
            ))
        }
    };
    if document_id.trim().is_empty() {
        return Box::new(query::error_reply(
            StatusCode::BAD_REQUEST,
            "document id is required",
        ));
    }

    let key = ConnectionKey::new(document_id, user_id);
    info!("New collaboration connection request for {}", key);
    Box::new(ws.on_upgrade(move |socket| handle_ws_client(socket, key, server)))
}

// Helper function to include the hub in request handlers
fn with_server(
    server: SharedCollabServer,
) -> impl Filter<Extract = (SharedCollabServer,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}
