//! Bounded in-memory audit log of document messages
//!
//! Each document keeps a circular buffer of the events fanned out to it.
//! Nothing is persisted to disk.

use std::collections::{HashMap, VecDeque};

use crate::constants::DEFAULT_MESSAGE_LOG_CAPACITY;
use crate::core::message::Message;

/// Recent messages of one document with a maximum capacity
#[derive(Debug, Clone)]
pub struct MessageStore {
    messages: VecDeque<Message>,
    max_size: usize,
}

impl MessageStore {
    /// Create a message store with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MESSAGE_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_size: capacity.max(1),
        }
    }

    /// Add a message, dropping the oldest ones past capacity
    pub fn add_message(&mut self, message: Message) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_size {
            self.messages.pop_front();
        }
    }

    /// Up to `limit` of the most recent messages, oldest first
    pub fn recent_messages(&self, limit: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-document message stores sharing one capacity
#[derive(Debug)]
pub struct MessageLog {
    documents: HashMap<String, MessageStore>,
    capacity: usize,
}

impl MessageLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            documents: HashMap::new(),
            capacity,
        }
    }

    pub fn append(&mut self, message: Message) {
        let capacity = self.capacity;
        self.documents
            .entry(message.doc_id.clone())
            .or_insert_with(|| MessageStore::with_capacity(capacity))
            .add_message(message);
    }

    pub fn recent(&self, document_id: &str, limit: usize) -> Vec<Message> {
        self.documents
            .get(document_id)
            .map(|store| store.recent_messages(limit))
            .unwrap_or_default()
    }

    pub fn count(&self, document_id: &str) -> usize {
        self.documents.get(document_id).map_or(0, MessageStore::count)
    }

    pub fn remove(&mut self, document_id: &str) {
        self.documents.remove(document_id);
    }
}
