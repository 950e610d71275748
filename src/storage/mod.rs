//! Storage for sessions, document aggregates and connection records

pub mod memory;
pub mod message_store;
pub mod traits;

pub use memory::{MemoryConnectionStorage, MemoryDocumentStorage, MemorySessionStorage};
pub use message_store::{MessageLog, MessageStore};
pub use traits::{ConnectionStorage, DocumentStorage, SessionStorage};
