use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Kind tag of a [`Message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Join,
    Leave,
    Awareness,
    Heartbeat,
    Sync,
    Update,
    Broadcast,
    UserJoined,
    UserLeft,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Awareness => "awareness",
            Self::Heartbeat => "heartbeat",
            Self::Sync => "sync",
            Self::Update => "update",
            Self::Broadcast => "broadcast",
            Self::UserJoined => "user_joined",
            Self::UserLeft => "user_left",
            Self::Error => "error",
        }
    }
}

/// Wire envelope exchanged with clients, the dispatcher and the broadcaster
///
/// `data` holds the kind-specific payload; see `message_types` for the shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub data: Value,
    /// Unix milliseconds
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    /// Build a message stamped with the current time
    pub fn new<T: Serialize>(
        kind: MessageType,
        doc_id: impl Into<String>,
        user_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self {
            kind,
            doc_id: doc_id.into(),
            user_id: user_id.into(),
            data: serde_json::to_value(payload)?,
            timestamp: now_millis(),
        })
    }

    /// Error event addressed to a single connection
    pub fn error(doc_id: impl Into<String>, user_id: impl Into<String>, error: &str) -> Self {
        Self {
            kind: MessageType::Error,
            doc_id: doc_id.into(),
            user_id: user_id.into(),
            data: serde_json::json!({ "error": error }),
            timestamp: now_millis(),
        }
    }

    /// Decode the payload into its typed form
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        // A missing payload decodes like an empty object so all-default payloads work
        let data = match &self.data {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        Ok(serde_json::from_value(data)?)
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
