//! Connection identity and lifecycle records
//! A connection is one live transport for a (document, user) pair

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite identity of a connection
///
/// Document and user ids are kept as separate fields. The `document:user`
/// string form only exists at the transport boundary (logs, JSON records) and
/// escapes both parts so that ids containing `:` cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub document_id: String,
    pub user_id: String,
}

impl ConnectionKey {
    pub fn new(document_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Injective string form used at the transport boundary
    pub fn encode(&self) -> String {
        format!("{}:{}", escape(&self.document_id), escape(&self.user_id))
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn escape(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    TimedOut,
}

/// Lightweight record of a live connection, tracked for statistics and eviction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Encoded [`ConnectionKey`]
    pub id: String,
    pub document_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_ping: DateTime<Utc>,
    pub status: ConnectionStatus,
}

impl Connection {
    /// Create a record for a freshly upgraded connection
    pub fn new(key: &ConnectionKey) -> Self {
        let now = Utc::now();
        Self {
            id: key.encode(),
            document_id: key.document_id.clone(),
            user_id: key.user_id.clone(),
            created_at: now,
            last_ping: now,
            status: ConnectionStatus::Connected,
        }
    }

    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(self.document_id.clone(), self.user_id.clone())
    }

    /// Update the last ping time, never moving it backwards
    pub fn update_ping(&mut self, at: DateTime<Utc>) {
        if at > self.last_ping {
            self.last_ping = at;
        }
    }

    /// Check if the connection has not pinged within `timeout` of `now`
    pub fn is_stale(&self, timeout: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.last_ping > timeout
    }
}

/// Process-wide connection counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub total_connections: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub shard_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_encoding_escapes_separator() {
        let a = ConnectionKey::new("doc:1", "user");
        let b = ConnectionKey::new("doc", "1:user");
        assert_ne!(a.encode(), b.encode());
        assert_eq!(a.encode(), "doc%3A1:user");
        assert_eq!(b.encode(), "doc:1%3Auser");

        // An escaped-looking id cannot impersonate an escaped separator
        let c = ConnectionKey::new("doc%3A1", "user");
        assert_ne!(c.encode(), a.encode());
    }

    #[test]
    fn test_plain_ids_stay_readable() {
        let key = ConnectionKey::new("D1", "alice");
        assert_eq!(key.to_string(), "D1:alice");
    }

    #[test]
    fn test_stale_detection() {
        let key = ConnectionKey::new("D1", "alice");
        let mut conn = Connection::new(&key);
        let now = Utc::now();
        conn.last_ping = now - chrono::Duration::minutes(6);
        assert!(conn.is_stale(chrono::Duration::seconds(300), now));

        conn.update_ping(now);
        assert!(!conn.is_stale(chrono::Duration::seconds(300), now));

        // Older pings never move last_ping backwards
        conn.update_ping(now - chrono::Duration::minutes(10));
        assert_eq!(conn.last_ping, now);
    }
}
