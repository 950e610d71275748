//! Per-connection message dispatch
//!
//! One handler runs per connection: it reads frames until the connection
//! closes, routes each one to the collaboration service and reports failures
//! back to the sender only.

use log::{debug, info, warn};

use crate::core::connection::ConnectionKey;
use crate::core::message::{now_millis, Message, MessageType};
use crate::core::message_types::{ClientRequest, HeartBeat};
use crate::core::server::SharedCollabServer;
use crate::core::transport::{MessageSink, MessageSource};
use crate::error::{CollabError, Result};

/// Handles incoming client messages for one connection
pub struct MessageHandler {
    server: SharedCollabServer,
    key: ConnectionKey,
}

impl MessageHandler {
    pub fn new(server: SharedCollabServer, key: ConnectionKey) -> Self {
        Self { server, key }
    }

    /// Read and dispatch until the connection closes
    pub async fn run(&self) {
        loop {
            let message = match self.server.registry().read(&self.key).await {
                Ok(message) => message,
                Err(e) if e.is_message_error() => {
                    debug!("Malformed frame from {}: {}", self.key, e);
                    self.server.record_inbound(&self.key).await;
                    self.send_error(&e).await;
                    continue;
                }
                Err(CollabError::ConnectionClosed) => {
                    debug!("Connection {} closed", self.key);
                    break;
                }
                Err(e) => {
                    warn!("Read from {} failed: {}", self.key, e);
                    break;
                }
            };

            self.server.record_inbound(&self.key).await;

            if let Err(e) = self.handle_message(message).await {
                if e.is_transport() && self.is_closed().await {
                    break;
                }
                warn!("Failed to handle message from {}: {}", self.key, e);
                self.send_error(&e).await;
            }
        }
    }

    /// Route one inbound message
    pub async fn handle_message(&self, message: Message) -> Result<()> {
        let service = self.server.collaboration();
        match ClientRequest::try_from(&message)? {
            ClientRequest::Join(join) => {
                service.join(&self.key, join).await?;
            }
            ClientRequest::Leave(leave) => service.leave(&self.key, leave).await?,
            ClientRequest::Awareness(update) => service.awareness_update(&self.key, update).await?,
            ClientRequest::Heartbeat(heartbeat) => {
                service.heartbeat(&self.key, heartbeat).await?;
                self.send_pong().await?;
            }
            ClientRequest::Sync(request) => service.process_sync_request(&self.key, request).await?,
            ClientRequest::Update(update) => service.process_update_message(&self.key, update).await?,
            ClientRequest::Broadcast(data) => service.broadcast(&self.key, data).await?,
        }
        Ok(())
    }

    async fn send_pong(&self) -> Result<()> {
        let pong = Message::new(
            MessageType::Heartbeat,
            self.key.document_id.clone(),
            self.key.user_id.clone(),
            &HeartBeat {
                timestamp: now_millis(),
            },
        )?;
        self.server
            .broadcaster()
            .send_to_connection(&self.key, &pong)
            .await
    }

    /// Report an error to this connection, never to its peers
    async fn send_error(&self, error: &CollabError) {
        let event = Message::error(
            self.key.document_id.clone(),
            self.key.user_id.clone(),
            &error.to_string(),
        );
        if let Err(e) = self.server.registry().write(&self.key, &event).await {
            debug!("Could not report error to {}: {}", self.key, e);
        }
    }

    async fn is_closed(&self) -> bool {
        match self.server.registry().get(&self.key).await {
            Ok(handle) => handle.is_closed(),
            Err(_) => true,
        }
    }
}

/// Serve one transport from registration to teardown
pub async fn serve_connection(
    server: SharedCollabServer,
    key: ConnectionKey,
    sink: Box<dyn MessageSink>,
    source: Box<dyn MessageSource>,
) {
    if server
        .establish_connection(key.clone(), sink, source)
        .await
        .is_err()
    {
        return;
    }

    info!("Serving connection {}", key);
    MessageHandler::new(server.clone(), key.clone()).run().await;

    if let Err(e) = server.close_connection(&key).await {
        warn!("Teardown of {} failed: {}", key, e);
    }
}
