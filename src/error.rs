use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum CollabError {
    // Lookup errors
    ConnectionNotFound(String),
    SessionNotFound(String),
    DocumentNotFound(String),

    // Registration errors
    ConnectionAlreadyExists(String),

    // Transport errors
    TransportError(String),
    ConnectionClosed,
    WriteTimeout(String),

    // Sync Service errors
    UpstreamError(String),

    // Fan-out errors
    PartialBroadcastFailure {
        document_id: String,
        attempted: usize,
        failed: usize,
    },

    // Message errors
    MessageParseError(String),
    UnsupportedMessageType(String),
    ValidationError(String),

    // Configuration errors
    ConfigError(String),
}

impl CollabError {
    /// Unknown connection, session or document
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ConnectionNotFound(_) | Self::SessionNotFound(_) | Self::DocumentNotFound(_)
        )
    }

    /// Errors that end the read loop of the connection they happened on
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::TransportError(_) | Self::ConnectionClosed | Self::WriteTimeout(_)
        )
    }

    /// A malformed inbound frame; reported back to the sender, the connection stays up
    pub fn is_message_error(&self) -> bool {
        matches!(
            self,
            Self::MessageParseError(_) | Self::UnsupportedMessageType(_) | Self::ValidationError(_)
        )
    }
}

impl fmt::Display for CollabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionNotFound(id) => write!(f, "Connection not found: {}", id),
            Self::SessionNotFound(id) => write!(f, "User session not found: {}", id),
            Self::DocumentNotFound(id) => write!(f, "Document session not found: {}", id),
            Self::ConnectionAlreadyExists(id) => write!(f, "Connection already exists: {}", id),
            Self::TransportError(msg) => write!(f, "Transport error: {}", msg),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::WriteTimeout(id) => write!(f, "Write to connection {} timed out", id),
            Self::UpstreamError(msg) => write!(f, "Sync service error: {}", msg),
            Self::PartialBroadcastFailure {
                document_id,
                attempted,
                failed,
            } => write!(
                f,
                "Broadcast to document {} failed for {} of {} connections",
                document_id, failed, attempted
            ),
            Self::MessageParseError(msg) => write!(f, "Message parse error: {}", msg),
            Self::UnsupportedMessageType(kind) => write!(f, "Unsupported message type: {}", kind),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for CollabError {}

impl From<serde_json::Error> for CollabError {
    fn from(err: serde_json::Error) -> Self {
        CollabError::MessageParseError(err.to_string())
    }
}

impl From<reqwest::Error> for CollabError {
    fn from(err: reqwest::Error) -> Self {
        CollabError::UpstreamError(err.to_string())
    }
}

// Generic result type for the hub
pub type Result<T> = std::result::Result<T, CollabError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(CollabError::SessionNotFound("D1:alice".to_string()).is_not_found());
        assert!(CollabError::ConnectionClosed.is_transport());
        assert!(CollabError::WriteTimeout("D1:bob".to_string()).is_transport());
        assert!(!CollabError::UpstreamError("down".to_string()).is_transport());
        assert!(CollabError::UnsupportedMessageType("user_left".to_string()).is_message_error());
    }

    #[test]
    fn test_partial_broadcast_display() {
        let err = CollabError::PartialBroadcastFailure {
            document_id: "D1".to_string(),
            attempted: 3,
            failed: 1,
        };
        assert_eq!(
            err.to_string(),
            "Broadcast to document D1 failed for 1 of 3 connections"
        );
    }
}
