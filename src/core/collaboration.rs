//! Collaboration use cases
//!
//! Session and document stores are updated one after the other, never under a
//! shared lock. A reader running between the two writes of a join or leave can
//! see a session without its active user entry (or the reverse); the window
//! closes as soon as the second write lands.

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::check_representable;
use crate::core::broadcaster::Broadcaster;
use crate::core::connection::ConnectionKey;
use crate::core::document::DocumentStats;
use crate::core::message::{Message, MessageType};
use crate::core::message_types::{
    AwarenessUpdate, HeartBeat, JoinDocument, LeaveDocument, SyncRequest, UpdateMessage,
    UserJoined, UserLeft,
};
use crate::core::session::{ActiveUser, UserSession};
use crate::core::sync_client::SyncServiceClient;
use crate::error::{CollabError, Result};
use crate::storage::{DocumentStorage, SessionStorage};

pub struct CollaborationService {
    sessions: Arc<dyn SessionStorage>,
    documents: Arc<dyn DocumentStorage>,
    broadcaster: Arc<Broadcaster>,
    sync_client: Arc<dyn SyncServiceClient>,
}

impl CollaborationService {
    pub fn new(
        sessions: Arc<dyn SessionStorage>,
        documents: Arc<dyn DocumentStorage>,
        broadcaster: Arc<Broadcaster>,
        sync_client: Arc<dyn SyncServiceClient>,
    ) -> Self {
        Self {
            sessions,
            documents,
            broadcaster,
            sync_client,
        }
    }

    /// Join the connection's document
    ///
    /// Joining again overwrites the previous session with a fresh client id.
    pub async fn join(&self, key: &ConnectionKey, mut request: JoinDocument) -> Result<UserSession> {
        check_user(key, &request.user_id)?;
        request.user_id = key.user_id.clone();

        let now = Utc::now();
        let user = ActiveUser::from_join(&request, now);
        let session = UserSession::new(key, user.clone(), now);

        self.sessions.save_user_session(session.clone()).await?;
        self.documents.add_active_user(&key.document_id, user).await?;
        self.refresh_connection_count(&key.document_id).await;

        info!(
            "User {} joined document {} as {}",
            key.user_id, key.document_id, session.client_id
        );

        let event = UserJoined {
            user_id: request.user_id,
            user_name: request.user_name,
            user_color: request.user_color,
            client_id: session.client_id.clone(),
            user_metadata: request.user_metadata,
        };
        let message = Message::new(
            MessageType::UserJoined,
            key.document_id.clone(),
            key.user_id.clone(),
            &event,
        )?;
        self.fan_out(&key.document_id, &message, &[key.user_id.as_str()])
            .await?;

        Ok(session)
    }

    /// Leave the connection's document and tell everyone still in it
    pub async fn leave(&self, key: &ConnectionKey, request: LeaveDocument) -> Result<()> {
        check_user(key, &request.user_id)?;
        let session = self.require_session(key).await?;

        self.documents
            .remove_active_user(&session.document_id, &session.user_id)
            .await?;

        // Concurrent leaves race here; only the one that deletes the session announces it
        let Some(removed) = self.sessions.delete_user_session(key).await? else {
            debug!("Session {} already removed", key);
            return Ok(());
        };
        self.refresh_connection_count(&removed.document_id).await;

        info!("User {} left document {}", removed.user_id, removed.document_id);

        let event = UserLeft {
            user_id: removed.user_id.clone(),
            client_id: removed.client_id.clone(),
        };
        let message = Message::new(
            MessageType::UserLeft,
            removed.document_id.clone(),
            removed.user_id.clone(),
            &event,
        )?;
        let delivered = self.fan_out(&removed.document_id, &message, &[]).await;
        self.release_document_if_empty(&removed.document_id).await;
        delivered
    }

    /// Refresh liveness of a session; nothing is sent to peers
    pub async fn heartbeat(&self, key: &ConnectionKey, _heartbeat: HeartBeat) -> Result<UserSession> {
        let now = Utc::now();
        let session = self.sessions.record_heartbeat(key, now).await?;
        self.touch_document_user(&session, now).await?;
        Ok(session)
    }

    /// Relay presence state to the other users of the document
    pub async fn awareness_update(&self, key: &ConnectionKey, update: AwarenessUpdate) -> Result<()> {
        let now = Utc::now();
        let session = self.sessions.touch_last_seen(key, now).await?;
        self.touch_document_user(&session, now).await?;

        let message = Message::new(
            MessageType::Awareness,
            session.document_id.clone(),
            session.user_id.clone(),
            &update,
        )?;
        self.fan_out(&session.document_id, &message, &[session.user_id.as_str()])
            .await
    }

    /// Ask the Sync Service for the updates the client is missing and reply to it
    pub async fn process_sync_request(&self, key: &ConnectionKey, request: SyncRequest) -> Result<()> {
        let session = self.require_session(key).await?;
        let response = self
            .sync_client
            .sync(&session.document_id, &request)
            .await?;

        self.documents
            .cache_document_data(&session.document_id, response.update_data.clone())
            .await?;

        let message = Message::new(
            MessageType::Sync,
            session.document_id.clone(),
            session.user_id.clone(),
            &response,
        )?;
        self.broadcaster.send_to_connection(key, &message).await
    }

    /// Apply an update through the Sync Service, then echo it to the other users
    pub async fn process_update_message(&self, key: &ConnectionKey, update: UpdateMessage) -> Result<()> {
        let session = self.require_session(key).await?;
        self.sync_client
            .process_update(&session.document_id, &update)
            .await?;

        let message = Message::new(
            MessageType::Update,
            session.document_id.clone(),
            session.user_id.clone(),
            &update,
        )?;
        self.fan_out(&session.document_id, &message, &[session.user_id.as_str()])
            .await
    }

    /// Relay an application payload to every session of the document, sender included
    pub async fn broadcast(&self, key: &ConnectionKey, data: Value) -> Result<()> {
        let message = Message {
            kind: MessageType::Broadcast,
            doc_id: key.document_id.clone(),
            user_id: key.user_id.clone(),
            data,
            timestamp: crate::core::message::now_millis(),
        };
        self.fan_out(&key.document_id, &message, &[]).await
    }

    pub async fn get_active_users(&self, document_id: &str) -> Result<Vec<ActiveUser>> {
        self.documents.get_active_users(document_id).await
    }

    pub async fn get_document_stats(&self, document_id: &str) -> Result<DocumentStats> {
        self.documents.get_document_stats(document_id).await
    }

    pub async fn get_recent_messages(&self, document_id: &str, limit: usize) -> Result<Vec<Message>> {
        self.documents.get_recent_messages(document_id, limit).await
    }

    /// Fetch the document's state vector from the Sync Service and cache it
    pub async fn get_state_vector(&self, document_id: &str) -> Result<Vec<u8>> {
        let state_vector = self.sync_client.get_state_vector(document_id).await?;
        self.documents
            .cache_state_vector(document_id, state_vector.clone())
            .await?;
        Ok(state_vector)
    }

    /// Flag sessions without a heartbeat for `idle_timeout` as idle
    pub async fn mark_idle_sessions(&self, idle_timeout: Duration) -> Result<usize> {
        let idle_timeout = check_representable("idle timeout", idle_timeout)?;
        let cutoff = Utc::now().checked_sub_signed(idle_timeout).ok_or_else(|| {
            CollabError::ConfigError("idle timeout reaches before the epoch".to_string())
        })?;
        let idled = self.sessions.mark_idle(cutoff).await?;

        for session in &idled {
            debug!("Session {} is idle", session.connection_id);
            self.documents
                .set_user_active(&session.document_id, &session.user_id, false)
                .await?;
        }
        Ok(idled.len())
    }

    async fn require_session(&self, key: &ConnectionKey) -> Result<UserSession> {
        self.sessions
            .get_user_session(key)
            .await?
            .ok_or_else(|| CollabError::SessionNotFound(key.encode()))
    }

    async fn touch_document_user(&self, session: &UserSession, at: chrono::DateTime<Utc>) -> Result<()> {
        match self
            .documents
            .update_user_last_seen(&session.document_id, &session.user_id, at)
            .await
        {
            Err(e) if e.is_not_found() => {
                debug!("No document session for {}: {}", session.connection_id, e);
                Ok(())
            }
            other => other,
        }
    }

    /// Drop the aggregate of a document nobody is in any more
    async fn release_document_if_empty(&self, document_id: &str) {
        match self.sessions.get_document_connections(document_id).await {
            Ok(keys) if keys.is_empty() => {}
            Ok(_) => return,
            Err(e) => {
                warn!("Failed to list sessions of {}: {}", document_id, e);
                return;
            }
        }
        match self.documents.delete_document_if_empty(document_id).await {
            Ok(true) => debug!("Released document {}", document_id),
            Ok(false) => {}
            Err(e) => warn!("Failed to release document {}: {}", document_id, e),
        }
    }

    async fn refresh_connection_count(&self, document_id: &str) {
        let count = match self.sessions.get_document_connections(document_id).await {
            Ok(keys) => keys.len(),
            Err(e) => {
                warn!("Failed to count connections of {}: {}", document_id, e);
                return;
            }
        };
        if let Err(e) = self.documents.update_connection_count(document_id, count).await {
            warn!("Failed to refresh connection count of {}: {}", document_id, e);
        }
    }

    /// Record an event in the audit log and deliver it
    ///
    /// Partial delivery failures are logged, not returned: the use case itself succeeded.
    async fn fan_out(&self, document_id: &str, message: &Message, exclude: &[&str]) -> Result<()> {
        if let Err(e) = self.documents.save_message(message.clone()).await {
            warn!("Failed to record {} in audit log: {}", message.kind.as_str(), e);
        }

        match self
            .broadcaster
            .broadcast_to_document(document_id, message, exclude)
            .await
        {
            Ok(_) => Ok(()),
            Err(e @ CollabError::PartialBroadcastFailure { .. }) => {
                warn!("{}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// The payload may name the user only if it names the connection's user
fn check_user(key: &ConnectionKey, user_id: &str) -> Result<()> {
    if user_id.is_empty() || user_id == key.user_id {
        return Ok(());
    }
    Err(CollabError::ValidationError(format!(
        "user {} cannot act for connection {}",
        user_id, key
    )))
}
