//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection closed by the peer
    Disconnected { reason: Option<String> },
    /// Raw bytes as they arrived; chunk boundaries carry no meaning
    Data(Bytes),
    /// Read error, the connection is unusable afterwards
    Error(String),
}

/// Trait for sending data
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Queue bytes for writing; they are flushed once written
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the connection, abandoning unwritten data
    async fn close(&self) -> Result<()>;
}

/// Trait for receiving data
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event, `None` once the connection is gone
    async fn recv(&mut self) -> Option<TransportEvent>;
}
