//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("accept failed: {0}")]
    AcceptFailed(String),

    #[error("send buffer full")]
    BufferFull,

    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("datagram of {size} bytes exceeds safe size of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] greenhouse_core::Error),

    #[error("not connected")]
    NotConnected,
}

impl TransportError {
    /// Whether the connection can no longer be used
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::BufferFull
            | TransportError::PayloadTooLarge { .. }
            | TransportError::Timeout => false,
            TransportError::Codec(e) => e.is_fatal(),
            _ => true,
        }
    }
}
