//! Client error types

use greenhouse_core::{MessageId, StatusCode};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("not connected")]
    NotConnected,

    /// The hub answered with an error status
    #[error("request rejected ({status:?}): {description}")]
    Rejected {
        status: StatusCode,
        description: String,
    },

    #[error("unexpected response status {0:?}")]
    UnexpectedResponse(StatusCode),

    #[error("request {0} timed out")]
    Timeout(MessageId),

    #[error("actuator error: {0}")]
    Actuator(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] greenhouse_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] greenhouse_transport::TransportError),
}

impl ClientError {
    /// Status code of a rejection, if the hub rejected the request
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}
