// Shared helpers for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

use collab_hub::config::ServerConfig;
use collab_hub::core::message_types::{JoinDocument, SyncRequest, SyncResponse, UpdateMessage};
use collab_hub::core::sync_client::SyncServiceClient;
use collab_hub::core::transport::{channel_transport, ChannelPeer};
use collab_hub::core::{CollabServer, ConnectionKey, Message, MessageType, SharedCollabServer};
use collab_hub::error::{CollabError, Result};

/// Sync Service double that records updates and can be told to fail
#[derive(Default)]
pub struct MockSyncClient {
    pub fail: AtomicBool,
    pub updates: Mutex<Vec<(String, UpdateMessage)>>,
}

impl MockSyncClient {
    pub fn failing() -> Self {
        let client = Self::default();
        client.fail.store(true, Ordering::SeqCst);
        client
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollabError::UpstreamError("sync service down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SyncServiceClient for MockSyncClient {
    async fn sync(&self, _document_id: &str, request: &SyncRequest) -> Result<SyncResponse> {
        self.check()?;
        let mut update_data = b"diff:".to_vec();
        update_data.extend_from_slice(&request.state_vector);
        Ok(SyncResponse { update_data })
    }

    async fn process_update(&self, document_id: &str, update: &UpdateMessage) -> Result<()> {
        self.check()?;
        self.updates
            .lock()
            .unwrap()
            .push((document_id.to_string(), update.clone()));
        Ok(())
    }

    async fn get_state_vector(&self, _document_id: &str) -> Result<Vec<u8>> {
        self.check()?;
        Ok(vec![1, 2, 3])
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        write_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    }
}

pub fn test_server() -> SharedCollabServer {
    test_server_with(Arc::new(MockSyncClient::default()))
}

pub fn test_server_with(sync_client: Arc<dyn SyncServiceClient>) -> SharedCollabServer {
    Arc::new(CollabServer::new(test_config(), sync_client))
}

/// A registered connection whose far end the test holds
pub struct TestPeer {
    pub key: ConnectionKey,
    pub peer: ChannelPeer,
}

impl TestPeer {
    /// Next message written to this connection
    pub async fn recv(&mut self) -> Message {
        let frame = timeout(Duration::from_secs(2), self.peer.incoming.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed");
        serde_json::from_str(&frame).expect("hub wrote invalid JSON")
    }

    /// Skip messages until one of `kind` arrives
    pub async fn recv_kind(&mut self, kind: MessageType) -> Message {
        loop {
            let msg = self.recv().await;
            if msg.kind == kind {
                return msg;
            }
        }
    }

    /// Drop everything already delivered
    pub fn drain(&mut self) {
        while self.peer.incoming.try_recv().is_ok() {}
    }

    /// Assert nothing arrives within a short window
    pub async fn expect_silence(&mut self) {
        let result = timeout(Duration::from_millis(100), self.peer.incoming.recv()).await;
        assert!(result.is_err(), "unexpected message: {:?}", result);
    }

    /// Send a raw frame as the client
    pub fn send_frame(&self, frame: impl Into<String>) {
        self.peer.outgoing.send(frame.into()).expect("hub dropped the connection");
    }

    pub fn send(&self, kind: MessageType, data: serde_json::Value) {
        let msg = Message {
            kind,
            doc_id: self.key.document_id.clone(),
            user_id: self.key.user_id.clone(),
            data,
            timestamp: 0,
        };
        self.send_frame(serde_json::to_string(&msg).unwrap());
    }
}

/// Register a connection without a read loop
pub async fn connect(server: &SharedCollabServer, doc: &str, user: &str) -> TestPeer {
    let key = ConnectionKey::new(doc, user);
    let (sink, source, peer) = channel_transport();
    server
        .establish_connection(key.clone(), Box::new(sink), Box::new(source))
        .await
        .expect("connection rejected");
    TestPeer { key, peer }
}

/// Register a connection and join its document
pub async fn connect_and_join(server: &SharedCollabServer, doc: &str, user: &str) -> TestPeer {
    let peer = connect(server, doc, user).await;
    server
        .collaboration()
        .join(&peer.key, join_request(user))
        .await
        .expect("join failed");
    peer
}

pub fn join_request(user: &str) -> JoinDocument {
    JoinDocument {
        user_id: user.to_string(),
        user_name: user.to_uppercase(),
        user_color: "#336699".to_string(),
        ..Default::default()
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
