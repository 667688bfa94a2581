//! Transport trait definitions

use async_trait::async_trait;
use greenhouse_core::Tlv;
use std::net::SocketAddr;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection closed (clean or error)
    Disconnected { reason: Option<String> },
    /// Complete frame received
    Frame(Tlv),
    /// Error occurred
    Error(String),
}

/// Trait for sending frames
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send a frame, waiting for queue space
    async fn send(&self, frame: Tlv) -> Result<()>;

    /// Queue a frame without waiting.
    ///
    /// Frames queued from one task are written in queue order.
    fn try_send(&self, frame: Tlv) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Flush queued frames, then close
    async fn close(&self) -> Result<()>;
}

/// Trait for receiving frames
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Trait for transport servers (listeners)
#[async_trait]
pub trait TransportServer: Send + Sync {
    /// The sender type for accepted connections
    type Sender: TransportSender;
    /// The receiver type for accepted connections
    type Receiver: TransportReceiver;

    /// Accept a new connection
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Close the server
    async fn close(&self) -> Result<()>;
}
