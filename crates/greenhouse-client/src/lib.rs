//! Greenhouse Client Library
//!
//! Async clients for the two roles that talk to a hub: field nodes, which
//! host sensors and actuators, and control panels, which watch and drive
//! them.
//!
//! # Example
//!
//! ```no_run
//! use greenhouse_client::ControlPanelBuilder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let panel = ControlPanelBuilder::new("127.0.0.1:60005")
//!     .compatible("A1")
//!     .connect()
//!     .await?;
//!
//! for (address, name) in panel.field_node_pool().await? {
//!     println!("{}: {}", address, name);
//! }
//! panel.subscribe(0).await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod connection;
pub mod control_panel;
pub mod error;
pub mod field_node;

pub use builder::{ControlPanelBuilder, FieldNodeBuilder};
pub use connection::{ClientConnection, ConnectionConfig, PendingCall, RequestHandler, Requester};
pub use control_panel::{ControlPanel, ControlPanelConfig, ControlPanelEvent, FieldNodeInfo};
pub use error::{ClientError, Result};
pub use field_node::{FieldNode, FieldNodeConfig, FieldNodeEvent};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::{ControlPanelBuilder, FieldNodeBuilder};
    pub use crate::control_panel::{ControlPanel, ControlPanelEvent};
    pub use crate::error::{ClientError, Result};
    pub use crate::field_node::{FieldNode, FieldNodeEvent};
    pub use greenhouse_core::{Actuator, ActuatorFault, Sensor, SensorReading};
}
