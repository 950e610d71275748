use async_trait::async_trait;
use futures_util::sink::SinkExt;
use futures_util::stream::{SplitSink, SplitStream, StreamExt};
use log::{debug, info};
use warp::ws::{Message, WebSocket};

use crate::core::connection::ConnectionKey;
use crate::core::message_handler::serve_connection;
use crate::core::server::SharedCollabServer;
use crate::core::transport::{MessageSink, MessageSource};
use crate::error::{CollabError, Result};

/// Outgoing half of an upgraded WebSocket
pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.inner
            .send(Message::text(frame))
            .await
            .map_err(|e| CollabError::TransportError(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.inner
            .close()
            .await
            .map_err(|e| CollabError::TransportError(e.to_string()))
    }
}

/// Incoming half of an upgraded WebSocket
pub struct WsSource {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl MessageSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        while let Some(result) = self.inner.next().await {
            let msg = match result {
                Ok(msg) => msg,
                Err(e) => return Some(Err(CollabError::TransportError(e.to_string()))),
            };

            if msg.is_close() {
                debug!("Received close frame");
                return None;
            }
            if let Ok(text) = msg.to_str() {
                return Some(Ok(text.to_string()));
            }
            if msg.is_binary() {
                return Some(
                    String::from_utf8(msg.into_bytes())
                        .map_err(|e| CollabError::MessageParseError(e.to_string())),
                );
            }
            // Ping and pong frames are answered by the WebSocket layer
        }
        None
    }
}

/// Split an upgraded socket into hub transport halves
pub fn split_socket(ws: WebSocket) -> (WsSink, WsSource) {
    let (tx, rx) = ws.split();
    (WsSink { inner: tx }, WsSource { inner: rx })
}

// Handle a WebSocket connection for one document and user
pub async fn handle_ws_client(ws: WebSocket, key: ConnectionKey, server: SharedCollabServer) {
    info!("WebSocket upgraded for {}", key);
    let (sink, source) = split_socket(ws);
    serve_connection(server, key, Box::new(sink), Box::new(source)).await;
}
