//! Greenhouse Hub
//!
//! The hub is the central point every field node and control panel talks to:
//! - Assigns client addresses
//! - Keeps the subscription table and each field node's active device list
//! - Relays sensor data to compatible subscribers
//! - Forwards actuator commands and state changes
//!
//! # Example
//!
//! ```no_run
//! use greenhouse_hub::{HubConfig, HubServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = HubServer::new(HubConfig::default());
//!     server.serve().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod handlers;
pub mod hub;
pub mod proxy;
pub mod server;

pub use error::{HubError, Result};
pub use hub::{CentralHub, FieldNodeSnapshot, HubEvent};
pub use proxy::{ClientAgent, ClientKind, ClientProxy, ConnectionId, ControlPanelProxy, FieldNodeProxy};
pub use server::{HubConfig, HubServer};
