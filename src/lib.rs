//! Collab Hub - a real-time collaboration session and broadcast hub
//!
//! This library tracks who is editing which document, relays presence and
//! document updates between the connections of a document, and forwards CRDT
//! payloads to an external Sync Service.

pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod storage;

// Re-export main components
pub use config::ServerConfig;
pub use core::server::{CollabServer, SharedCollabServer};
pub use error::{CollabError, Result};
