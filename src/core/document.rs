//! Document-level aggregate: who is editing a document and its derived counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::message_types::base64_bytes;
use crate::core::session::ActiveUser;

/// Collaboration state of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSession {
    pub document_id: String,
    /// user_id -> active user
    pub active_users: HashMap<String, ActiveUser>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Cached CRDT state vector, owned by the Sync Service
    #[serde(default, with = "base64_bytes")]
    pub state_vector: Vec<u8>,
    /// Cached CRDT document blob, owned by the Sync Service
    #[serde(default, with = "base64_bytes")]
    pub document_data: Vec<u8>,
}

impl DocumentSession {
    pub fn new(document_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            document_id: document_id.into(),
            active_users: HashMap::new(),
            created_at: now,
            last_activity: now,
            state_vector: Vec::new(),
            document_data: Vec::new(),
        }
    }
}

/// Counters derived from the document session; recomputed, never authoritative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub document_id: String,
    pub active_user_count: usize,
    pub total_connections: usize,
    pub message_count: u64,
    pub last_activity: DateTime<Utc>,
}

impl DocumentStats {
    pub fn empty(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            active_user_count: 0,
            total_connections: 0,
            message_count: 0,
            last_activity: Utc::now(),
        }
    }
}
