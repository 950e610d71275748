//! Payload types carried in the `data` field of a [`Message`]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::message::{Message, MessageType};
use crate::error::{CollabError, Result};

/// Serde adapter that encodes opaque byte payloads as base64 strings
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// Client-to-server payloads

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinDocument {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_color: String,
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaveDocument {
    #[serde(default)]
    pub user_id: String,
}

/// Cursor, selection and presence state; opaque to the hub
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwarenessUpdate {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub user_info: String,
    #[serde(default)]
    pub awareness_state: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartBeat {
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default, with = "base64_bytes")]
    pub state_vector: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessage {
    #[serde(default, with = "base64_bytes")]
    pub update_data: Vec<u8>,
    #[serde(default)]
    pub sequence_number: i64,
}

// Server-to-client payloads

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default, with = "base64_bytes")]
    pub update_data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserJoined {
    pub user_id: String,
    pub user_name: String,
    pub user_color: String,
    pub client_id: String,
    pub user_metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserLeft {
    pub user_id: String,
    pub client_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: String,
}

/// Inbound message decoded into its typed payload
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Join(JoinDocument),
    Leave(LeaveDocument),
    Awareness(AwarenessUpdate),
    Heartbeat(HeartBeat),
    Sync(SyncRequest),
    Update(UpdateMessage),
    Broadcast(Value),
}

impl TryFrom<&Message> for ClientRequest {
    type Error = CollabError;

    fn try_from(msg: &Message) -> Result<Self> {
        let request = match msg.kind {
            MessageType::Join => ClientRequest::Join(msg.payload()?),
            MessageType::Leave => ClientRequest::Leave(msg.payload()?),
            MessageType::Awareness => ClientRequest::Awareness(msg.payload()?),
            MessageType::Heartbeat => ClientRequest::Heartbeat(msg.payload()?),
            MessageType::Sync => ClientRequest::Sync(msg.payload()?),
            MessageType::Update => ClientRequest::Update(msg.payload()?),
            MessageType::Broadcast => ClientRequest::Broadcast(msg.data.clone()),
            // Server-originated events are never accepted from clients
            MessageType::UserJoined | MessageType::UserLeft | MessageType::Error => {
                return Err(CollabError::UnsupportedMessageType(
                    msg.kind.as_str().to_string(),
                ))
            }
        };
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(raw: &str) -> Result<ClientRequest> {
        let msg: Message = serde_json::from_str(raw)?;
        ClientRequest::try_from(&msg)
    }

    #[test]
    fn test_join_payload() {
        let request = inbound(
            r##"{"type":"join","doc_id":"D1","user_id":"alice","timestamp":1,
                "data":{"user_id":"alice","user_name":"Alice","user_color":"#f00",
                        "user_metadata":{"team":"core"}}}"##,
        )
        .unwrap();
        match request {
            ClientRequest::Join(join) => {
                assert_eq!(join.user_name, "Alice");
                assert_eq!(join.user_metadata.get("team"), Some(&"core".to_string()));
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_byte_payloads_are_base64() {
        let request = inbound(
            r#"{"type":"update","data":{"update_data":"AQID","sequence_number":7}}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            ClientRequest::Update(UpdateMessage {
                update_data: vec![1, 2, 3],
                sequence_number: 7,
            })
        );

        let encoded = serde_json::to_value(SyncResponse {
            update_data: vec![1, 2, 3],
        })
        .unwrap();
        assert_eq!(encoded["update_data"], "AQID");
    }

    #[test]
    fn test_heartbeat_without_data() {
        let request = inbound(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(request, ClientRequest::Heartbeat(HeartBeat { timestamp: 0 }));
    }

    #[test]
    fn test_server_events_are_not_accepted() {
        let err = inbound(r#"{"type":"user_left","data":{"user_id":"x","client_id":"y"}}"#)
            .unwrap_err();
        assert!(matches!(err, CollabError::UnsupportedMessageType(_)));
    }

    #[test]
    fn test_invalid_base64_is_a_parse_error() {
        let err = inbound(r#"{"type":"sync","data":{"state_vector":"***"}}"#).unwrap_err();
        assert!(err.is_message_error());
    }
}
