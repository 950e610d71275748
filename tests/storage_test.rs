use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use collab_hub::core::message_types::JoinDocument;
use collab_hub::core::{
    ActiveUser, Connection, ConnectionKey, ConnectionStatus, DocumentSession, Message, MessageType,
    UserSession,
};
use collab_hub::storage::{
    ConnectionStorage, DocumentStorage, MemoryConnectionStorage, MemoryDocumentStorage,
    MemorySessionStorage, SessionStorage,
};

fn active_user(id: &str) -> ActiveUser {
    let join = JoinDocument {
        user_id: id.to_string(),
        user_name: id.to_uppercase(),
        user_metadata: [("team".to_string(), "core".to_string())].into(),
        ..Default::default()
    };
    ActiveUser::from_join(&join, Utc::now())
}

fn session(doc: &str, user: &str) -> UserSession {
    UserSession::new(&ConnectionKey::new(doc, user), active_user(user), Utc::now())
}

#[tokio::test]
async fn test_returned_sessions_are_copies() {
    let storage = MemorySessionStorage::new();
    let key = ConnectionKey::new("D1", "alice");
    storage.save_user_session(session("D1", "alice")).await.unwrap();

    let mut copy = storage.get_user_session(&key).await.unwrap().unwrap();
    copy.is_active = false;
    copy.user_info.user_metadata.insert("team".to_string(), "hacked".to_string());

    let stored = storage.get_user_session(&key).await.unwrap().unwrap();
    assert!(stored.is_active);
    assert_eq!(stored.user_info.user_metadata["team"], "core");
}

#[tokio::test]
async fn test_returned_document_sessions_are_copies() {
    let storage = MemoryDocumentStorage::new();
    let mut doc = DocumentSession::new("D1");
    doc.active_users.insert("alice".to_string(), active_user("alice"));
    storage.save_document_session(doc).await.unwrap();

    let mut copy = storage.get_document_session("D1").await.unwrap().unwrap();
    copy.active_users.clear();
    copy.state_vector.push(9);

    let stored = storage.get_document_session("D1").await.unwrap().unwrap();
    assert_eq!(stored.active_users.len(), 1);
    assert!(stored.state_vector.is_empty());

    let mut users = storage.get_active_users("D1").await.unwrap();
    users[0].user_name = "changed".to_string();
    assert_eq!(storage.get_active_users("D1").await.unwrap()[0].user_name, "ALICE");
}

#[tokio::test]
async fn test_concurrent_heartbeats_stay_monotonic() {
    let storage = Arc::new(MemorySessionStorage::new());
    let key = ConnectionKey::new("D1", "alice");
    storage.save_user_session(session("D1", "alice")).await.unwrap();

    let base = Utc::now();
    let latest = base + ChronoDuration::seconds(50);

    // Heartbeats land in arbitrary order
    let mut tasks = Vec::new();
    for offset in (0..=50).rev() {
        let storage = Arc::clone(&storage);
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            storage
                .record_heartbeat(&key, base + ChronoDuration::seconds(offset))
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stored = storage.get_user_session(&key).await.unwrap().unwrap();
    assert_eq!(stored.last_heartbeat, latest);

    // An older heartbeat never moves it back
    storage.record_heartbeat(&key, base).await.unwrap();
    let stored = storage.get_user_session(&key).await.unwrap().unwrap();
    assert_eq!(stored.last_heartbeat, latest);
}

#[tokio::test]
async fn test_audit_log_keeps_the_newest_thousand() {
    let storage = MemoryDocumentStorage::new();
    for i in 0..1005 {
        let msg = Message::new(
            MessageType::Broadcast,
            "D1",
            "alice",
            &serde_json::json!({ "seq": i }),
        )
        .unwrap();
        storage.save_message(msg).await.unwrap();
    }

    assert_eq!(storage.get_document_stats("D1").await.unwrap().message_count, 1000);

    let recent = storage.get_recent_messages("D1", 3).await.unwrap();
    let seqs: Vec<i64> = recent.iter().map(|m| m.data["seq"].as_i64().unwrap()).collect();
    assert_eq!(seqs, vec![1002, 1003, 1004]);

    let all = storage.get_recent_messages("D1", 5000).await.unwrap();
    assert_eq!(all.len(), 1000);
    assert_eq!(all[0].data["seq"], 5);
}

#[tokio::test]
async fn test_update_last_seen_needs_document() {
    let storage = MemoryDocumentStorage::new();
    let err = storage
        .update_user_last_seen("missing", "alice", Utc::now())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    storage.add_active_user("D1", active_user("alice")).await.unwrap();
    let later = Utc::now() + ChronoDuration::seconds(5);
    storage.update_user_last_seen("D1", "alice", later).await.unwrap();
    let users = storage.get_active_users("D1").await.unwrap();
    assert_eq!(users[0].last_seen, later);
}

#[tokio::test]
async fn test_caches_create_document_session() {
    let storage = MemoryDocumentStorage::new();
    storage.cache_state_vector("D1", vec![1, 2]).await.unwrap();
    storage.cache_document_data("D1", vec![3]).await.unwrap();

    let doc = storage.get_document_session("D1").await.unwrap().unwrap();
    assert_eq!(doc.state_vector, vec![1, 2]);
    assert_eq!(doc.document_data, vec![3]);
    assert!(doc.active_users.is_empty());

    assert!(storage.delete_document_if_empty("D1").await.unwrap());
    assert!(storage.get_document_session("D1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_occupied_document_is_not_deleted() {
    let storage = MemoryDocumentStorage::new();
    storage.add_active_user("D1", active_user("alice")).await.unwrap();
    let msg = Message::new(MessageType::Broadcast, "D1", "alice", &serde_json::json!({})).unwrap();
    storage.save_message(msg).await.unwrap();

    assert!(!storage.delete_document_if_empty("D1").await.unwrap());
    assert_eq!(storage.get_active_users("D1").await.unwrap().len(), 1);
    assert_eq!(storage.get_recent_messages("D1", 10).await.unwrap().len(), 1);

    storage.remove_active_user("D1", "alice").await.unwrap();
    assert!(storage.delete_document_if_empty("D1").await.unwrap());
    assert!(storage.get_recent_messages("D1", 10).await.unwrap().is_empty());
    assert_eq!(storage.get_document_stats("D1").await.unwrap().message_count, 0);
}

#[tokio::test]
async fn test_connection_timeout_sweep() {
    let storage = MemoryConnectionStorage::new();
    let fresh = ConnectionKey::new("D1", "fresh");
    let stale = ConnectionKey::new("D1", "stale");
    storage.add(Connection::new(&fresh)).await.unwrap();
    storage.add(Connection::new(&stale)).await.unwrap();

    let later = Utc::now() + ChronoDuration::seconds(120);
    storage.update_last_ping(&fresh, later).await.unwrap();

    let evicted = storage
        .cleanup_timeout(Duration::from_secs(60), later + ChronoDuration::seconds(30))
        .await
        .unwrap();
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].user_id, "stale");
    assert_eq!(evicted[0].status, ConnectionStatus::TimedOut);

    assert_eq!(storage.stats().await.unwrap().total_connections, 1);
    let remaining = storage.get_by_document("D1").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key(), fresh);
    assert!(storage.update_last_ping(&stale, later).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_ping_never_moves_backwards() {
    let storage = MemoryConnectionStorage::new();
    let key = ConnectionKey::new("D1", "alice");
    storage.add(Connection::new(&key)).await.unwrap();

    let later = Utc::now() + ChronoDuration::seconds(10);
    storage.update_last_ping(&key, later).await.unwrap();
    storage
        .update_last_ping(&key, later - ChronoDuration::seconds(5))
        .await
        .unwrap();
    assert_eq!(storage.get_by_document("D1").await.unwrap()[0].last_ping, later);
}

#[tokio::test]
async fn test_unrepresentable_timeout_is_an_error() {
    let storage = MemoryConnectionStorage::new();
    let key = ConnectionKey::new("D1", "alice");
    storage.add(Connection::new(&key)).await.unwrap();

    let err = storage
        .cleanup_timeout(Duration::from_secs(u64::MAX), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, collab_hub::error::CollabError::ConfigError(_)));
    assert_eq!(storage.stats().await.unwrap().total_connections, 1);
}
