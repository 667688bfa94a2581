//! Greenhouse Transport Layer
//!
//! This crate provides the transports the hub protocol runs on:
//! - TCP (ordered, reliable control traffic, one connection per client)
//! - UDP (best-effort sensor data)
//!
//! and [`Channel`], which layers message ids and frame encryption over any
//! [`TransportSender`].

pub mod channel;
pub mod error;
pub mod traits;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "udp")]
pub mod udp;

pub use channel::Channel;
pub use error::{Result, TransportError};
pub use traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

#[cfg(feature = "tcp")]
pub use tcp::{read_tlv, write_tlv, TcpConfig, TcpReceiver, TcpSender, TcpServer, TcpTransport};

#[cfg(feature = "udp")]
pub use udp::{UdpConfig, UdpReceiver, UdpSender, UdpTransport};
