//! Greenhouse Core
//!
//! Wire format and protocol primitives shared by the hub and its clients.
//!
//! This crate provides:
//! - TLV framing ([`Tlv`]) and the typed value model ([`Value`])
//! - Request/response envelopes ([`RequestMessage`], [`ResponseMessage`])
//! - Per-role dispatch tables ([`Registry`])
//! - Pending-request tracking with timeouts ([`PendingRequests`])
//! - Frame encryption and key exchange ([`CryptoChannel`])

pub mod broker;
pub mod crypto;
pub mod device;
pub mod error;
pub mod message;
pub mod registry;
pub mod tlv;
pub mod tracker;
pub mod types;
pub mod value;

pub use broker::{Broker, Listener, ListenerId};
pub use crypto::{CryptoChannel, KeyPair, SecurityState};
pub use device::{Actuator, ActuatorFault, Sensor};
pub use error::{Error, Result, StatusCode};
pub use message::{
    command, IdGenerator, Message, MessageId, Request, RequestMessage, Response, ResponseMessage,
};
pub use registry::{Registry, Role};
pub use tlv::{tag, Tlv};
pub use tracker::{spawn_sweeper, PendingRequests, TimeoutEvent, DEFAULT_REQUEST_TTL, SWEEP_INTERVAL};
pub use types::*;
pub use value::{decode_value, encode_value, Value, ValueKind, MAX_DEPTH};

/// Default TCP port of the hub
pub const DEFAULT_HUB_PORT: u16 = 60005;

/// Default UDP port on which the hub receives sensor data
pub const DEFAULT_SENSOR_PORT: u16 = 60006;
