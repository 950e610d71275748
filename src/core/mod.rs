//! Core functionality of the collaboration hub

pub mod broadcaster;
pub mod collaboration;
pub mod connection;
pub mod document;
pub mod message;
pub mod message_handler;
pub mod message_types;
pub mod registry;
pub mod server;
pub mod session;
pub mod sweeper;
pub mod sync_client;
pub mod transport;

// Re-export main components for convenience
pub use broadcaster::{BroadcastReport, Broadcaster};
pub use collaboration::CollaborationService;
pub use connection::{Connection, ConnectionKey, ConnectionStats, ConnectionStatus};
pub use document::{DocumentSession, DocumentStats};
pub use message::{Message, MessageType};
pub use message_handler::{serve_connection, MessageHandler};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use server::{CleanupReport, CollabServer, SharedCollabServer};
pub use session::{ActiveUser, UserSession};
pub use sweeper::{CleanupSweeper, SweeperSettings};
pub use sync_client::{HttpSyncClient, SyncServiceClient, UnavailableSyncClient};
pub use transport::{channel_transport, ChannelPeer, MessageSink, MessageSource};
