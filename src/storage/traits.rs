//! Abstract storage interfaces for pluggable backends
//!
//! The collaboration hub keeps three independent stores: user sessions,
//! document aggregates and connection records. Each backend guards its own
//! state; no operation spans two stores, so callers that touch more than one
//! store observe them separately.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::core::connection::{Connection, ConnectionKey, ConnectionStats};
use crate::core::document::{DocumentSession, DocumentStats};
use crate::core::message::Message;
use crate::core::session::{ActiveUser, UserSession};
use crate::error::Result;

/// Per-connection user sessions, indexed by document
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Store a session, overwriting any previous session of the same connection
    async fn save_user_session(&self, session: UserSession) -> Result<()>;

    /// Get the session of a connection
    async fn get_user_session(&self, key: &ConnectionKey) -> Result<Option<UserSession>>;

    /// Delete the session of a connection, returning it if it existed
    async fn delete_user_session(&self, key: &ConnectionKey) -> Result<Option<UserSession>>;

    /// Apply a heartbeat; `last_heartbeat` never moves backwards
    async fn record_heartbeat(&self, key: &ConnectionKey, at: DateTime<Utc>) -> Result<UserSession>;

    /// Record non-heartbeat activity: refreshes `last_seen` and clears the idle
    /// flag, leaving `last_heartbeat` alone
    async fn touch_last_seen(&self, key: &ConnectionKey, at: DateTime<Utc>) -> Result<UserSession>;

    /// Connection keys of every session in a document
    async fn get_document_connections(&self, document_id: &str) -> Result<Vec<ConnectionKey>>;

    /// First active session of a user, in any document
    async fn find_active_user_session(&self, user_id: &str) -> Result<Option<UserSession>>;

    /// Number of active sessions in a document
    async fn count_active_sessions(&self, document_id: &str) -> Result<usize>;

    /// Flag sessions whose last heartbeat is older than `older_than` as idle
    async fn mark_idle(&self, older_than: DateTime<Utc>) -> Result<Vec<UserSession>>;

    /// Keys of every stored session
    async fn all_keys(&self) -> Result<Vec<ConnectionKey>>;
}

/// Document aggregates: active users, CRDT caches, stats and the audit log
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    async fn get_document_session(&self, document_id: &str) -> Result<Option<DocumentSession>>;

    /// Store a document session, overwriting the previous one
    async fn save_document_session(&self, session: DocumentSession) -> Result<()>;

    /// Drop a document's session, stats and audit log if it has no active users
    ///
    /// Returns false and leaves everything in place while a user is present.
    async fn delete_document_if_empty(&self, document_id: &str) -> Result<bool>;

    /// Active users of a document; empty when the document is unknown
    async fn get_active_users(&self, document_id: &str) -> Result<Vec<ActiveUser>>;

    /// Insert or replace a user, creating the document session when needed
    async fn add_active_user(&self, document_id: &str, user: ActiveUser) -> Result<()>;

    /// Remove a user; an unknown document is a no-op
    async fn remove_active_user(&self, document_id: &str, user_id: &str) -> Result<()>;

    /// Refresh a user's `last_seen`; never moves it backwards
    async fn update_user_last_seen(
        &self,
        document_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn set_user_active(&self, document_id: &str, user_id: &str, active: bool) -> Result<()>;

    /// Stats of a document; zeroed stats when the document is unknown
    async fn get_document_stats(&self, document_id: &str) -> Result<DocumentStats>;

    /// Record the number of live connections of a document
    async fn update_connection_count(&self, document_id: &str, count: usize) -> Result<()>;

    /// Append a message to the document's bounded audit log
    async fn save_message(&self, message: Message) -> Result<()>;

    /// Most recent audit log entries, oldest first
    async fn get_recent_messages(&self, document_id: &str, limit: usize) -> Result<Vec<Message>>;

    async fn cache_state_vector(&self, document_id: &str, state_vector: Vec<u8>) -> Result<()>;

    async fn cache_document_data(&self, document_id: &str, document_data: Vec<u8>) -> Result<()>;
}

/// Lightweight connection records and process-wide counters
#[async_trait]
pub trait ConnectionStorage: Send + Sync {
    /// Track a new connection; a second record for the same id is rejected
    async fn add(&self, connection: Connection) -> Result<()>;

    /// Stop tracking a connection, returning its record if it existed
    async fn remove(&self, key: &ConnectionKey) -> Result<Option<Connection>>;

    async fn get_by_document(&self, document_id: &str) -> Result<Vec<Connection>>;

    async fn update_last_ping(&self, key: &ConnectionKey, at: DateTime<Utc>) -> Result<()>;

    async fn stats(&self) -> Result<ConnectionStats>;

    /// Drop every record that has not pinged within `timeout` of `now`
    async fn cleanup_timeout(&self, timeout: Duration, now: DateTime<Utc>) -> Result<Vec<Connection>>;

    async fn increment_messages_sent(&self, count: u64) -> Result<()>;

    async fn increment_messages_received(&self) -> Result<()>;
}
