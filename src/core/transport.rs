//! Transport abstraction for connection handles
//!
//! The registry only needs to push and pull text frames. WebSocket halves
//! implement these traits in `handlers::websocket`; the channel pair below
//! carries frames between tasks of the same process.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{CollabError, Result};

/// Outgoing half of a transport
#[async_trait]
pub trait MessageSink: Send {
    /// Send one text frame
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Release the underlying transport
    async fn close(&mut self) -> Result<()>;
}

/// Incoming half of a transport
#[async_trait]
pub trait MessageSource: Send {
    /// Next text frame; `None` once the peer has gone away
    async fn next_frame(&mut self) -> Option<Result<String>>;
}

/// Sink backed by an unbounded channel
pub struct ChannelSink {
    sender: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        match &self.sender {
            Some(sender) => sender
                .send(frame)
                .map_err(|_| CollabError::TransportError("peer receiver dropped".to_string())),
            None => Err(CollabError::ConnectionClosed),
        }
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the sender ends the peer's receive stream
        self.sender.take();
        Ok(())
    }
}

/// Source backed by an unbounded channel
pub struct ChannelSource {
    receiver: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        self.receiver.recv().await.map(Ok)
    }
}

/// The far end of a channel transport, held by whoever plays the client
pub struct ChannelPeer {
    /// Frames sent here are read by the hub
    pub outgoing: mpsc::UnboundedSender<String>,
    /// Frames the hub writes arrive here
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Create a connected in-process transport
pub fn channel_transport() -> (ChannelSink, ChannelSource, ChannelPeer) {
    let (to_peer, from_hub) = mpsc::unbounded_channel();
    let (to_hub, from_peer) = mpsc::unbounded_channel();
    (
        ChannelSink {
            sender: Some(to_peer),
        },
        ChannelSource {
            receiver: from_peer,
        },
        ChannelPeer {
            outgoing: to_hub,
            incoming: from_hub,
        },
    )
}
