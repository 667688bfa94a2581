//! Error types for the greenhouse protocol core

use thiserror::Error;

use crate::message::MessageId;

/// Result type alias for protocol core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol core error types
#[derive(Error, Debug)]
pub enum Error {
    /// TLV value does not fit in the length field
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Buffer ends before the frame does
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// Value or message could not be encoded
    #[error("encode error: {0}")]
    Encode(String),

    /// Value or message could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Tag not known to the value model
    #[error("unknown tag: 0x{0:04x}")]
    UnknownTag(u16),

    /// Request command absent from the receiving role's registry
    #[error("unknown command '{command}' in message {id}")]
    UnknownCommand { id: MessageId, command: String },

    /// Response status absent from the receiving role's registry
    #[error("unknown status code {code} in message {id}")]
    UnknownStatusCode { id: MessageId, code: i32 },

    /// Encryption handshake precondition violated, or a frame could not be sealed/opened
    #[error("encryption error: {0}")]
    Encryption(String),

    /// No response within the request's time-to-live
    #[error("request {0} timed out")]
    Timeout(MessageId),
}

impl Error {
    /// Whether the byte stream can still be trusted after this error.
    ///
    /// Framing, value and encryption failures poison the stream; an unknown
    /// command or status leaves the framing intact.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::UnknownCommand { .. } | Error::UnknownStatusCode { .. } | Error::Timeout(_)
        )
    }
}

/// Response status codes.
///
/// Success codes live in 0-99, error codes start at 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    FieldNodeRegistered = 1,
    ControlPanelRegistered = 2,
    FieldNodePool = 3,
    Subscribed = 4,
    Unsubscribed = 5,
    AdlUpdated = 6,
    ActuatorActivated = 7,
    Heartbeat = 8,
    PublicKey = 9,
    SecretKeyAccepted = 10,
    Disconnected = 11,

    // 100+: rejected requests
    ProtocolError = 100,
    AuthenticationError = 101,
    RegistrationError = 102,
    SubscriptionError = 103,
    EncryptionError = 104,
    ActuatorError = 105,
}

impl StatusCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(StatusCode::Ok),
            1 => Some(StatusCode::FieldNodeRegistered),
            2 => Some(StatusCode::ControlPanelRegistered),
            3 => Some(StatusCode::FieldNodePool),
            4 => Some(StatusCode::Subscribed),
            5 => Some(StatusCode::Unsubscribed),
            6 => Some(StatusCode::AdlUpdated),
            7 => Some(StatusCode::ActuatorActivated),
            8 => Some(StatusCode::Heartbeat),
            9 => Some(StatusCode::PublicKey),
            10 => Some(StatusCode::SecretKeyAccepted),
            11 => Some(StatusCode::Disconnected),
            100 => Some(StatusCode::ProtocolError),
            101 => Some(StatusCode::AuthenticationError),
            102 => Some(StatusCode::RegistrationError),
            103 => Some(StatusCode::SubscriptionError),
            104 => Some(StatusCode::EncryptionError),
            105 => Some(StatusCode::ActuatorError),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_error(self) -> bool {
        self.code() >= 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_families() {
        assert!(!StatusCode::Subscribed.is_error());
        assert!(StatusCode::AuthenticationError.is_error());
        assert_eq!(StatusCode::from_i32(104), Some(StatusCode::EncryptionError));
        assert_eq!(StatusCode::from_i32(99), None);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Decode("truncated".into()).is_fatal());
        assert!(Error::Encryption("no key".into()).is_fatal());
        assert!(!Error::UnknownCommand {
            id: 3,
            command: "dance".into()
        }
        .is_fatal());
    }
}
