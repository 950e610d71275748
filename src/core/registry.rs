//! Connection registry
//! Owns the live transport handle of every connection

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::timeout;

use crate::core::connection::ConnectionKey;
use crate::core::message::Message;
use crate::core::transport::{MessageSink, MessageSource};
use crate::error::{CollabError, Result};

/// Live transport of one connection
///
/// Writers are serialized by the sink mutex, so frames to one connection keep
/// their order. Closing flips a watch channel that unblocks a pending read.
pub struct ConnectionHandle {
    key: ConnectionKey,
    sink: Mutex<Box<dyn MessageSink>>,
    source: Mutex<Box<dyn MessageSource>>,
    write_timeout: Duration,
    closed: AtomicBool,
    close_signal: watch::Sender<bool>,
    connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    pub fn new(
        key: ConnectionKey,
        sink: Box<dyn MessageSink>,
        source: Box<dyn MessageSource>,
        write_timeout: Duration,
    ) -> Self {
        let (close_signal, _) = watch::channel(false);
        Self {
            key,
            sink: Mutex::new(sink),
            source: Mutex::new(source),
            write_timeout,
            closed: AtomicBool::new(false),
            close_signal,
            connected_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write one message, waiting at most the write timeout
    ///
    /// A failed or timed out write closes the handle: the peer is considered gone.
    pub async fn write(&self, message: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(CollabError::ConnectionClosed);
        }
        let frame = serde_json::to_string(message)?;

        let mut sink = self.sink.lock().await;
        // Closed while we were queued behind another writer
        if self.is_closed() {
            return Err(CollabError::ConnectionClosed);
        }

        let err = match timeout(self.write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => CollabError::WriteTimeout(self.key.encode()),
        };

        warn!("Write to connection {} failed: {}", self.key, err);
        if self.mark_closed() {
            if let Err(e) = sink.close().await {
                debug!("Error releasing transport of {}: {}", self.key, e);
            }
        }
        Err(err)
    }

    /// Read and decode the next message
    ///
    /// Returns `ConnectionClosed` as soon as the handle is closed, even while
    /// blocked waiting for the peer.
    pub async fn read(&self) -> Result<Message> {
        let mut close_rx = self.close_signal.subscribe();
        if *close_rx.borrow() {
            return Err(CollabError::ConnectionClosed);
        }

        let mut source = self.source.lock().await;
        tokio::select! {
            _ = close_rx.wait_for(|closed| *closed) => Err(CollabError::ConnectionClosed),
            frame = source.next_frame() => match frame {
                Some(Ok(text)) => Ok(serde_json::from_str(&text)?),
                Some(Err(e)) => Err(e),
                None => Err(CollabError::ConnectionClosed),
            },
        }
    }

    /// Close the connection; returns true only for the call that actually closed it
    pub async fn close(&self) -> bool {
        if !self.mark_closed() {
            return false;
        }
        // Waits for an in-flight write, which is bounded by the write timeout
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!("Error releasing transport of {}: {}", self.key, e);
        }
        true
    }

    fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.close_signal.send_replace(true);
        true
    }
}

/// Registry of live connection handles
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionKey, Arc<ConnectionHandle>>>,
    write_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            write_timeout,
        }
    }

    /// Wrap a transport in a handle using the registry's write timeout
    pub fn new_handle(
        &self,
        key: ConnectionKey,
        sink: Box<dyn MessageSink>,
        source: Box<dyn MessageSource>,
    ) -> Arc<ConnectionHandle> {
        Arc::new(ConnectionHandle::new(key, sink, source, self.write_timeout))
    }

    /// Register a handle; a second live connection for the same key is rejected
    ///
    /// The rejected handle stays with the caller, which can still tell the peer why.
    pub async fn add(&self, handle: Arc<ConnectionHandle>) -> Result<()> {
        let mut connections = self.connections.write().await;
        if connections.contains_key(handle.key()) {
            return Err(CollabError::ConnectionAlreadyExists(handle.key().encode()));
        }
        connections.insert(handle.key().clone(), handle);
        Ok(())
    }

    /// Unregister and close a connection
    ///
    /// Only the caller that gets `Some` back owns the teardown of that connection.
    pub async fn remove(&self, key: &ConnectionKey) -> Option<Arc<ConnectionHandle>> {
        let handle = self.connections.write().await.remove(key)?;
        handle.close().await;
        Some(handle)
    }

    pub async fn get(&self, key: &ConnectionKey) -> Result<Arc<ConnectionHandle>> {
        self.connections
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| CollabError::ConnectionNotFound(key.encode()))
    }

    pub async fn contains(&self, key: &ConnectionKey) -> bool {
        self.connections.read().await.contains_key(key)
    }

    /// Write to a connection; the registry lock is not held during the write
    pub async fn write(&self, key: &ConnectionKey, message: &Message) -> Result<()> {
        let handle = self.get(key).await?;
        handle.write(message).await
    }

    /// Read from a connection; the registry lock is not held while waiting
    pub async fn read(&self, key: &ConnectionKey) -> Result<Message> {
        let handle = self.get(key).await?;
        handle.read().await
    }

    pub async fn keys(&self) -> Vec<ConnectionKey> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
