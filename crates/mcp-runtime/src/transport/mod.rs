//! Transports: how framed messages move between two peers.

pub mod framing;
#[cfg(feature = "sse")]
pub mod sse;
#[cfg(feature = "sse")]
pub mod sse_client;
pub mod stream;

use async_trait::async_trait;

use crate::types::{JsonRpcMessage, TransportError};

#[cfg(feature = "sse")]
pub use sse::{SseServer, SseServerConfig};
#[cfg(feature = "sse")]
pub use sse_client::SseClientTransport;
pub use stream::{ChildTransport, StdioTransport, StreamTransport};

/// A duplex channel carrying whole JSON-RPC messages.
///
/// `send` and `receive` may be called concurrently from different tasks.
/// `receive` never yields a partial frame: a frame cut off by end of stream
/// is a terminal error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError>;

    /// Wait for the next complete message.
    async fn receive(&self) -> Result<JsonRpcMessage, TransportError>;

    /// Release the channel. Safe to call more than once and after the peer
    /// has already gone away.
    async fn close(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}
