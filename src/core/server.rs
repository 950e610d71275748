//! Collaboration hub
//!
//! Owns the registry, the three stores, the broadcaster and the domain
//! service. Built once at startup and shared as [`SharedCollabServer`].

use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::core::broadcaster::Broadcaster;
use crate::core::collaboration::CollaborationService;
use crate::core::connection::{Connection, ConnectionKey, ConnectionStats};
use crate::core::message::Message;
use crate::core::message_types::LeaveDocument;
use crate::core::registry::{ConnectionHandle, ConnectionRegistry};
use crate::core::sync_client::SyncServiceClient;
use crate::core::transport::{MessageSink, MessageSource};
use crate::error::Result;
use crate::storage::{
    ConnectionStorage, DocumentStorage, MemoryConnectionStorage, MemoryDocumentStorage,
    MemorySessionStorage, SessionStorage,
};

/// Counts from one cleanup cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub evicted: usize,
    pub idled: usize,
    pub orphaned: usize,
}

pub struct CollabServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<dyn SessionStorage>,
    connections: Arc<dyn ConnectionStorage>,
    broadcaster: Arc<Broadcaster>,
    collaboration: Arc<CollaborationService>,
}

pub type SharedCollabServer = Arc<CollabServer>;

impl CollabServer {
    /// Create a hub backed by in-memory stores
    pub fn new(config: ServerConfig, sync_client: Arc<dyn SyncServiceClient>) -> Self {
        let documents = Arc::new(MemoryDocumentStorage::with_log_capacity(
            config.message_log_capacity,
        ));
        Self::with_storage(
            config,
            Arc::new(MemorySessionStorage::new()),
            documents,
            Arc::new(MemoryConnectionStorage::new()),
            sync_client,
        )
    }

    /// Create a hub over caller-provided stores
    pub fn with_storage(
        config: ServerConfig,
        sessions: Arc<dyn SessionStorage>,
        documents: Arc<dyn DocumentStorage>,
        connections: Arc<dyn ConnectionStorage>,
        sync_client: Arc<dyn SyncServiceClient>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.write_timeout));
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&registry),
            Arc::clone(&sessions),
            Arc::clone(&connections),
        ));
        let collaboration = Arc::new(CollaborationService::new(
            Arc::clone(&sessions),
            documents,
            Arc::clone(&broadcaster),
            sync_client,
        ));

        Self {
            config,
            registry,
            sessions,
            connections,
            broadcaster,
            collaboration,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn collaboration(&self) -> &Arc<CollaborationService> {
        &self.collaboration
    }

    /// Register a new transport for `key`
    ///
    /// Fails with `ConnectionAlreadyExists` while another connection for the
    /// same document and user is live; the rejected peer gets an error event
    /// and its transport is closed.
    pub async fn establish_connection(
        &self,
        key: ConnectionKey,
        sink: Box<dyn MessageSink>,
        source: Box<dyn MessageSource>,
    ) -> Result<Arc<ConnectionHandle>> {
        let handle = self.registry.new_handle(key.clone(), sink, source);

        if let Err(e) = self.registry.add(Arc::clone(&handle)).await {
            warn!("Rejected connection {}: {}", key, e);
            let event = Message::error(key.document_id.clone(), key.user_id.clone(), &e.to_string());
            if let Err(write_err) = handle.write(&event).await {
                debug!("Could not notify rejected connection {}: {}", key, write_err);
            }
            handle.close().await;
            return Err(e);
        }

        if let Err(e) = self.connections.add(Connection::new(&key)).await {
            self.registry.remove(&key).await;
            return Err(e);
        }

        info!("Connection {} established", key);
        Ok(handle)
    }

    /// Tear a connection down: close the transport, drop its record, end its session
    ///
    /// Safe to call from several places at once; only the first call does the
    /// work and returns `true`.
    pub async fn close_connection(&self, key: &ConnectionKey) -> Result<bool> {
        if self.registry.remove(key).await.is_none() {
            return Ok(false);
        }

        if let Err(e) = self.connections.remove(key).await {
            warn!("Failed to drop connection record {}: {}", key, e);
        }
        self.end_session(key).await?;

        info!("Connection {} closed", key);
        Ok(true)
    }

    /// Refresh liveness after an inbound frame
    pub async fn record_inbound(&self, key: &ConnectionKey) {
        if let Err(e) = self.connections.update_last_ping(key, Utc::now()).await {
            debug!("Could not update last ping of {}: {}", key, e);
        }
        if let Err(e) = self.connections.increment_messages_received().await {
            debug!("Could not update received counter: {}", e);
        }
    }

    /// Evict connections that have not pinged within `timeout`
    pub async fn cleanup_timeout_connections(&self, timeout: Duration) -> Result<usize> {
        let evicted = self.connections.cleanup_timeout(timeout, Utc::now()).await?;

        for connection in &evicted {
            let key = connection.key();
            info!("Evicting connection {} after {:?} without ping", key, timeout);
            // The record is already gone; close the transport and end the session
            if self.registry.remove(&key).await.is_none() {
                continue;
            }
            // A failed leave leaves an orphan session for the reaper, not an open handle
            if let Err(e) = self.end_session(&key).await {
                warn!("Failed to end session of evicted connection {}: {}", key, e);
            }
        }
        Ok(evicted.len())
    }

    /// Flag sessions that stopped heartbeating as idle
    pub async fn mark_idle_sessions(&self, idle_timeout: Duration) -> Result<usize> {
        self.collaboration.mark_idle_sessions(idle_timeout).await
    }

    /// End sessions whose connection is no longer registered
    pub async fn reap_orphan_sessions(&self) -> Result<usize> {
        let mut reaped = 0;
        for key in self.sessions.all_keys().await? {
            if self.registry.contains(&key).await {
                continue;
            }
            debug!("Reaping orphan session {}", key);
            match self.end_session(&key).await {
                Ok(true) => reaped += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to reap orphan session {}: {}", key, e),
            }
        }
        Ok(reaped)
    }

    /// One pass of the cleanup sweeper
    pub async fn run_cleanup_cycle(
        &self,
        connection_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<CleanupReport> {
        let evicted = self.cleanup_timeout_connections(connection_timeout).await?;
        let idled = self.mark_idle_sessions(idle_timeout).await?;
        let orphaned = self.reap_orphan_sessions().await?;
        Ok(CleanupReport {
            evicted,
            idled,
            orphaned,
        })
    }

    pub async fn get_connection_stats(&self) -> Result<ConnectionStats> {
        self.connections.stats().await
    }

    pub async fn get_document_connections(&self, document_id: &str) -> Result<Vec<Connection>> {
        self.connections.get_by_document(document_id).await
    }

    /// Number of live transports
    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    async fn end_session(&self, key: &ConnectionKey) -> Result<bool> {
        match self
            .collaboration
            .leave(key, LeaveDocument::default())
            .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
