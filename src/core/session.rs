use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::core::connection::ConnectionKey;
use crate::core::message_types::JoinDocument;

/// A user present in a document session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveUser {
    pub user_id: String,
    pub user_name: String,
    pub user_color: String,
    pub is_active: bool,
    pub user_metadata: HashMap<String, String>,
    pub last_seen: DateTime<Utc>,
}

impl ActiveUser {
    pub fn from_join(join: &JoinDocument, now: DateTime<Utc>) -> Self {
        Self {
            user_id: join.user_id.clone(),
            user_name: join.user_name.clone(),
            user_color: join.user_color.clone(),
            is_active: true,
            user_metadata: join.user_metadata.clone(),
            last_seen: now,
        }
    }

    /// Record activity, never moving `last_seen` backwards
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen {
            self.last_seen = at;
        }
        self.is_active = true;
    }
}

/// Per-connection state of a user who joined a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub user_id: String,
    pub document_id: String,
    /// Regenerated on every join to tell successive sessions of one user apart
    pub client_id: String,
    pub connection_id: ConnectionKey,
    pub joined_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    /// Snapshot of the user's entry in the document session
    pub user_info: ActiveUser,
    pub is_active: bool,
}

impl UserSession {
    pub fn new(key: &ConnectionKey, user_info: ActiveUser, now: DateTime<Utc>) -> Self {
        Self {
            user_id: key.user_id.clone(),
            document_id: key.document_id.clone(),
            client_id: generate_client_id(&key.user_id),
            connection_id: key.clone(),
            joined_at: now,
            last_heartbeat: now,
            user_info,
            is_active: true,
        }
    }

    /// Apply a heartbeat; the stored heartbeat time only ever grows
    pub fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        if at > self.last_heartbeat {
            self.last_heartbeat = at;
        }
        self.is_active = true;
        self.user_info.touch(at);
    }

    /// Record activity other than a heartbeat; an idle session becomes active again
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.is_active = true;
        self.user_info.touch(at);
    }

    pub fn mark_idle(&mut self) {
        self.is_active = false;
        self.user_info.is_active = false;
    }
}

fn generate_client_id(user_id: &str) -> String {
    format!("client_{}_{}", user_id, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> UserSession {
        let key = ConnectionKey::new("D1", "alice");
        let join = JoinDocument {
            user_id: "alice".to_string(),
            user_name: "Alice".to_string(),
            ..Default::default()
        };
        let now = Utc::now();
        UserSession::new(&key, ActiveUser::from_join(&join, now), now)
    }

    #[test]
    fn test_client_ids_are_unique_per_join() {
        assert_ne!(session().client_id, session().client_id);
        assert!(session().client_id.starts_with("client_alice_"));
    }

    #[test]
    fn test_heartbeat_is_monotonic() {
        let mut s = session();
        let later = s.last_heartbeat + chrono::Duration::seconds(5);
        s.record_heartbeat(later);
        s.record_heartbeat(later - chrono::Duration::seconds(3));
        assert_eq!(s.last_heartbeat, later);
        assert_eq!(s.user_info.last_seen, later);
    }

    #[test]
    fn test_heartbeat_reactivates_idle_session() {
        let mut s = session();
        s.mark_idle();
        assert!(!s.is_active && !s.user_info.is_active);
        s.record_heartbeat(Utc::now());
        assert!(s.is_active && s.user_info.is_active);
    }

    #[test]
    fn test_touch_reactivates_without_heartbeat() {
        let mut s = session();
        let heartbeat = s.last_heartbeat;
        s.mark_idle();
        s.touch(heartbeat + chrono::Duration::seconds(5));
        assert!(s.is_active && s.user_info.is_active);
        assert_eq!(s.last_heartbeat, heartbeat);
    }
}
