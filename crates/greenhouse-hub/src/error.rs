//! Hub error types

use greenhouse_core::{Response, StatusCode};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Error, Debug)]
pub enum HubError {
    /// Action requires a (matching) registration
    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("registration error: {0}")]
    Registration(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("actuator error: {0}")]
    Actuator(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] greenhouse_transport::TransportError),

    #[error("core protocol error: {0}")]
    Core(#[from] greenhouse_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    /// Status code reported to the client for this error
    pub fn status(&self) -> StatusCode {
        match self {
            HubError::Authentication(_) => StatusCode::AuthenticationError,
            HubError::Registration(_) => StatusCode::RegistrationError,
            HubError::Subscription(_) => StatusCode::SubscriptionError,
            HubError::Encryption(_) => StatusCode::EncryptionError,
            HubError::Core(greenhouse_core::Error::Encryption(_)) => StatusCode::EncryptionError,
            HubError::Actuator(_) => StatusCode::ActuatorError,
            _ => StatusCode::ProtocolError,
        }
    }

    /// Error response carrying this error's description
    pub fn to_response(&self) -> Response {
        let description = match self {
            HubError::Authentication(s)
            | HubError::Registration(s)
            | HubError::Subscription(s)
            | HubError::Encryption(s)
            | HubError::Actuator(s)
            | HubError::Protocol(s) => s.clone(),
            HubError::Core(greenhouse_core::Error::Encryption(s)) => s.clone(),
            other => other.to_string(),
        };
        Response::error(self.status(), description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_mapping() {
        let response = HubError::Subscription("already subscribed".into()).to_response();
        assert_eq!(
            response,
            Response::error(StatusCode::SubscriptionError, "already subscribed")
        );

        let response =
            HubError::Core(greenhouse_core::Error::Encryption("unsecure request".into()))
                .to_response();
        assert_eq!(
            response,
            Response::error(StatusCode::EncryptionError, "unsecure request")
        );
    }
}
