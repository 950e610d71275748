//! In-memory storage implementation
//!
//! Keeps all collaboration state in process memory. Every store guards its
//! state with a single `RwLock` and hands out owned clones, so callers can
//! never mutate stored values through a returned object.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::message_store::MessageLog;
use super::traits::*;
use crate::config::check_representable;
use crate::constants::{DEFAULT_MESSAGE_LOG_CAPACITY, REGISTRY_SHARD_COUNT};
use crate::core::connection::{Connection, ConnectionKey, ConnectionStats, ConnectionStatus};
use crate::core::document::{DocumentSession, DocumentStats};
use crate::core::message::Message;
use crate::core::session::{ActiveUser, UserSession};
use crate::error::{CollabError, Result};

#[derive(Default)]
struct SessionState {
    sessions: HashMap<ConnectionKey, UserSession>,
    // document_id -> connection keys, in join order
    by_document: HashMap<String, Vec<ConnectionKey>>,
}

/// In-memory user session storage
#[derive(Default)]
pub struct MemorySessionStorage {
    state: RwLock<SessionState>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStorage for MemorySessionStorage {
    async fn save_user_session(&self, session: UserSession) -> Result<()> {
        let mut state = self.state.write().await;
        let key = session.connection_id.clone();

        let keys = state
            .by_document
            .entry(session.document_id.clone())
            .or_default();
        if !keys.contains(&key) {
            keys.push(key.clone());
        }
        state.sessions.insert(key, session);
        Ok(())
    }

    async fn get_user_session(&self, key: &ConnectionKey) -> Result<Option<UserSession>> {
        Ok(self.state.read().await.sessions.get(key).cloned())
    }

    async fn delete_user_session(&self, key: &ConnectionKey) -> Result<Option<UserSession>> {
        let mut state = self.state.write().await;
        let removed = state.sessions.remove(key);

        if let Some(session) = &removed {
            if let Some(keys) = state.by_document.get_mut(&session.document_id) {
                keys.retain(|k| k != key);
                if keys.is_empty() {
                    state.by_document.remove(&session.document_id);
                }
            }
        }
        Ok(removed)
    }

    async fn record_heartbeat(&self, key: &ConnectionKey, at: DateTime<Utc>) -> Result<UserSession> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(key)
            .ok_or_else(|| CollabError::SessionNotFound(key.encode()))?;
        session.record_heartbeat(at);
        Ok(session.clone())
    }

    async fn touch_last_seen(&self, key: &ConnectionKey, at: DateTime<Utc>) -> Result<UserSession> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(key)
            .ok_or_else(|| CollabError::SessionNotFound(key.encode()))?;
        session.touch(at);
        Ok(session.clone())
    }

    async fn get_document_connections(&self, document_id: &str) -> Result<Vec<ConnectionKey>> {
        let state = self.state.read().await;
        Ok(state.by_document.get(document_id).cloned().unwrap_or_default())
    }

    async fn find_active_user_session(&self, user_id: &str) -> Result<Option<UserSession>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.user_id == user_id && s.is_active)
            .cloned())
    }

    async fn count_active_sessions(&self, document_id: &str) -> Result<usize> {
        let state = self.state.read().await;
        let count = state.by_document.get(document_id).map_or(0, |keys| {
            keys.iter()
                .filter(|key| state.sessions.get(*key).is_some_and(|s| s.is_active))
                .count()
        });
        Ok(count)
    }

    async fn mark_idle(&self, older_than: DateTime<Utc>) -> Result<Vec<UserSession>> {
        let mut state = self.state.write().await;
        let mut idled = Vec::new();
        for session in state.sessions.values_mut() {
            if session.is_active && session.last_heartbeat < older_than {
                session.mark_idle();
                idled.push(session.clone());
            }
        }
        Ok(idled)
    }

    async fn all_keys(&self) -> Result<Vec<ConnectionKey>> {
        Ok(self.state.read().await.sessions.keys().cloned().collect())
    }
}

struct DocumentState {
    sessions: HashMap<String, DocumentSession>,
    stats: HashMap<String, DocumentStats>,
    messages: MessageLog,
}

impl DocumentState {
    /// Recompute the derived counters of one document
    fn recompute_stats(&mut self, document_id: &str) {
        let message_count = self.messages.count(document_id) as u64;
        let session = self.sessions.get(document_id);
        let stats = self
            .stats
            .entry(document_id.to_string())
            .or_insert_with(|| DocumentStats::empty(document_id));

        stats.message_count = message_count;
        match session {
            Some(session) => {
                stats.active_user_count = session.active_users.len();
                stats.last_activity = session.last_activity;
            }
            None => stats.active_user_count = 0,
        }
    }
}

/// In-memory document aggregate storage
pub struct MemoryDocumentStorage {
    state: RwLock<DocumentState>,
}

impl MemoryDocumentStorage {
    pub fn new() -> Self {
        Self::with_log_capacity(DEFAULT_MESSAGE_LOG_CAPACITY)
    }

    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(DocumentState {
                sessions: HashMap::new(),
                stats: HashMap::new(),
                messages: MessageLog::with_capacity(capacity),
            }),
        }
    }
}

impl Default for MemoryDocumentStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStorage for MemoryDocumentStorage {
    async fn get_document_session(&self, document_id: &str) -> Result<Option<DocumentSession>> {
        Ok(self.state.read().await.sessions.get(document_id).cloned())
    }

    async fn save_document_session(&self, session: DocumentSession) -> Result<()> {
        let mut state = self.state.write().await;
        let document_id = session.document_id.clone();
        state.sessions.insert(document_id.clone(), session);
        state.recompute_stats(&document_id);
        Ok(())
    }

    async fn delete_document_if_empty(&self, document_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let occupied = state
            .sessions
            .get(document_id)
            .map_or(false, |s| !s.active_users.is_empty());
        if occupied {
            return Ok(false);
        }
        state.sessions.remove(document_id);
        state.stats.remove(document_id);
        state.messages.remove(document_id);
        Ok(true)
    }

    async fn get_active_users(&self, document_id: &str) -> Result<Vec<ActiveUser>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .get(document_id)
            .map(|s| s.active_users.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_active_user(&self, document_id: &str, user: ActiveUser) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .entry(document_id.to_string())
            .or_insert_with(|| DocumentSession::new(document_id));
        session.last_activity = Utc::now();
        session.active_users.insert(user.user_id.clone(), user);
        state.recompute_stats(document_id);
        Ok(())
    }

    async fn remove_active_user(&self, document_id: &str, user_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(session) = state.sessions.get_mut(document_id) else {
            debug!("Document {} has no session, nothing to remove", document_id);
            return Ok(());
        };
        session.active_users.remove(user_id);
        session.last_activity = Utc::now();
        state.recompute_stats(document_id);
        Ok(())
    }

    async fn update_user_last_seen(
        &self,
        document_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(document_id)
            .ok_or_else(|| CollabError::DocumentNotFound(document_id.to_string()))?;
        if let Some(user) = session.active_users.get_mut(user_id) {
            user.touch(at);
        }
        if at > session.last_activity {
            session.last_activity = at;
        }
        state.recompute_stats(document_id);
        Ok(())
    }

    async fn set_user_active(&self, document_id: &str, user_id: &str, active: bool) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(user) = state
            .sessions
            .get_mut(document_id)
            .and_then(|s| s.active_users.get_mut(user_id))
        {
            user.is_active = active;
        }
        Ok(())
    }

    async fn get_document_stats(&self, document_id: &str) -> Result<DocumentStats> {
        let state = self.state.read().await;
        Ok(state
            .stats
            .get(document_id)
            .cloned()
            .unwrap_or_else(|| DocumentStats::empty(document_id)))
    }

    async fn update_connection_count(&self, document_id: &str, count: usize) -> Result<()> {
        let mut state = self.state.write().await;
        state.recompute_stats(document_id);
        if let Some(stats) = state.stats.get_mut(document_id) {
            stats.total_connections = count;
        }
        Ok(())
    }

    async fn save_message(&self, message: Message) -> Result<()> {
        let mut state = self.state.write().await;
        let document_id = message.doc_id.clone();
        state.messages.append(message);
        state.recompute_stats(&document_id);
        Ok(())
    }

    async fn get_recent_messages(&self, document_id: &str, limit: usize) -> Result<Vec<Message>> {
        Ok(self.state.read().await.messages.recent(document_id, limit))
    }

    async fn cache_state_vector(&self, document_id: &str, state_vector: Vec<u8>) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .sessions
            .entry(document_id.to_string())
            .or_insert_with(|| DocumentSession::new(document_id))
            .state_vector = state_vector;
        Ok(())
    }

    async fn cache_document_data(&self, document_id: &str, document_data: Vec<u8>) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .sessions
            .entry(document_id.to_string())
            .or_insert_with(|| DocumentSession::new(document_id))
            .document_data = document_data;
        Ok(())
    }
}

struct ConnectionState {
    connections: HashMap<ConnectionKey, Connection>,
    stats: ConnectionStats,
}

/// In-memory connection record storage
pub struct MemoryConnectionStorage {
    state: RwLock<ConnectionState>,
}

impl MemoryConnectionStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState {
                connections: HashMap::new(),
                stats: ConnectionStats {
                    shard_count: REGISTRY_SHARD_COUNT,
                    ..ConnectionStats::default()
                },
            }),
        }
    }
}

impl Default for MemoryConnectionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionStorage for MemoryConnectionStorage {
    async fn add(&self, connection: Connection) -> Result<()> {
        let mut state = self.state.write().await;
        let key = connection.key();
        if state.connections.contains_key(&key) {
            return Err(CollabError::ConnectionAlreadyExists(connection.id));
        }
        state.connections.insert(key, connection);
        state.stats.total_connections += 1;
        Ok(())
    }

    async fn remove(&self, key: &ConnectionKey) -> Result<Option<Connection>> {
        let mut state = self.state.write().await;
        let removed = state.connections.remove(key).map(|mut conn| {
            conn.status = ConnectionStatus::Disconnected;
            conn
        });
        if removed.is_some() {
            state.stats.total_connections = state.stats.total_connections.saturating_sub(1);
        }
        Ok(removed)
    }

    async fn get_by_document(&self, document_id: &str) -> Result<Vec<Connection>> {
        let state = self.state.read().await;
        let mut connections: Vec<Connection> = state
            .connections
            .values()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        connections.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(connections)
    }

    async fn update_last_ping(&self, key: &ConnectionKey, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let connection = state
            .connections
            .get_mut(key)
            .ok_or_else(|| CollabError::ConnectionNotFound(key.encode()))?;
        connection.update_ping(at);
        Ok(())
    }

    async fn stats(&self) -> Result<ConnectionStats> {
        Ok(self.state.read().await.stats.clone())
    }

    async fn cleanup_timeout(&self, timeout: Duration, now: DateTime<Utc>) -> Result<Vec<Connection>> {
        let timeout = check_representable("connection timeout", timeout)?;
        let mut state = self.state.write().await;
        let stale: Vec<ConnectionKey> = state
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_stale(timeout, now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for key in stale {
            if let Some(mut conn) = state.connections.remove(&key) {
                conn.status = ConnectionStatus::TimedOut;
                state.stats.total_connections = state.stats.total_connections.saturating_sub(1);
                evicted.push(conn);
            }
        }
        Ok(evicted)
    }

    async fn increment_messages_sent(&self, count: u64) -> Result<()> {
        let mut state = self.state.write().await;
        state.stats.messages_sent = state.stats.messages_sent.saturating_add(count);
        Ok(())
    }

    async fn increment_messages_received(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.stats.messages_received = state.stats.messages_received.saturating_add(1);
        Ok(())
    }
}
