//! Document fan-out
//!
//! Delivers one message to every session of a document. Deliveries run
//! concurrently and independently: a failing peer never stops the others,
//! and a stalled peer is bounded by the registry's write timeout.

use futures_util::future::join_all;
use log::{debug, warn};
use std::sync::Arc;

use crate::core::connection::ConnectionKey;
use crate::core::message::Message;
use crate::core::registry::ConnectionRegistry;
use crate::error::{CollabError, Result};
use crate::storage::{ConnectionStorage, SessionStorage};

/// Outcome of a fan-out where every delivery succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
}

pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<dyn SessionStorage>,
    connections: Arc<dyn ConnectionStorage>,
}

impl Broadcaster {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        sessions: Arc<dyn SessionStorage>,
        connections: Arc<dyn ConnectionStorage>,
    ) -> Self {
        Self {
            registry,
            sessions,
            connections,
        }
    }

    /// Send `message` to every session of the document except the excluded users
    ///
    /// Returns `PartialBroadcastFailure` if at least one delivery failed; the
    /// individual failures are logged as they happen.
    pub async fn broadcast_to_document(
        &self,
        document_id: &str,
        message: &Message,
        exclude_user_ids: &[&str],
    ) -> Result<BroadcastReport> {
        let targets: Vec<ConnectionKey> = self
            .sessions
            .get_document_connections(document_id)
            .await?
            .into_iter()
            .filter(|key| !exclude_user_ids.contains(&key.user_id.as_str()))
            .collect();

        if targets.is_empty() {
            debug!("No recipients for {:?} in document {}", message.kind, document_id);
            return Ok(BroadcastReport {
                attempted: 0,
                delivered: 0,
            });
        }

        let deliveries = targets.iter().map(|key| async move {
            let result = self.registry.write(key, message).await;
            if let Err(e) = &result {
                warn!(
                    "Failed to deliver {} to connection {}: {}",
                    message.kind.as_str(),
                    key,
                    e
                );
            }
            result
        });
        let results = join_all(deliveries).await;

        let attempted = results.len();
        let delivered = results.iter().filter(|r| r.is_ok()).count();
        self.record_sent(delivered).await;

        if delivered < attempted {
            return Err(CollabError::PartialBroadcastFailure {
                document_id: document_id.to_string(),
                attempted,
                failed: attempted - delivered,
            });
        }

        debug!(
            "Broadcast {} to {} connections of document {}",
            message.kind.as_str(),
            delivered,
            document_id
        );
        Ok(BroadcastReport {
            attempted,
            delivered,
        })
    }

    /// Send to a single connection
    pub async fn send_to_connection(&self, key: &ConnectionKey, message: &Message) -> Result<()> {
        self.registry.write(key, message).await?;
        self.record_sent(1).await;
        Ok(())
    }

    /// Send to the first active session of a user
    pub async fn send_to_user(&self, user_id: &str, message: &Message) -> Result<()> {
        let session = self
            .sessions
            .find_active_user_session(user_id)
            .await?
            .ok_or_else(|| CollabError::SessionNotFound(format!("active user {}", user_id)))?;
        self.send_to_connection(&session.connection_id, message).await
    }

    /// Number of active sessions in a document
    pub async fn get_document_connection_count(&self, document_id: &str) -> Result<usize> {
        self.sessions.count_active_sessions(document_id).await
    }

    async fn record_sent(&self, count: usize) {
        if count == 0 {
            return;
        }
        if let Err(e) = self.connections.increment_messages_sent(count as u64).await {
            debug!("Failed to update sent counter: {}", e);
        }
    }
}
