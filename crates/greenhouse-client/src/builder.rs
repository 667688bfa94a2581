//! Client builders

use greenhouse_core::{Actuator, DeviceAddress, DeviceClass, Sensor};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::control_panel::{ControlPanel, ControlPanelConfig};
use crate::field_node::{FieldNode, FieldNodeConfig};
use crate::Result;

/// Builder for a [`FieldNode`]
pub struct FieldNodeBuilder {
    config: FieldNodeConfig,
    sensors: BTreeMap<DeviceAddress, Arc<dyn Sensor>>,
    actuators: BTreeMap<DeviceAddress, Arc<dyn Actuator>>,
}

impl FieldNodeBuilder {
    /// Create a new builder
    pub fn new(hub_addr: &str) -> Self {
        Self {
            config: FieldNodeConfig {
                hub_addr: hub_addr.to_string(),
                ..Default::default()
            },
            sensors: BTreeMap::new(),
            actuators: BTreeMap::new(),
        }
    }

    /// Set the node's name, shown in the field node pool
    pub fn name(mut self, name: &str) -> Self {
        self.config.name = name.to_string();
        self
    }

    /// Attach a sensor at `address`
    pub fn sensor(mut self, address: DeviceAddress, sensor: Arc<dyn Sensor>) -> Self {
        self.sensors.insert(address, sensor);
        self
    }

    /// Attach an actuator at `address`
    pub fn actuator(mut self, address: DeviceAddress, actuator: Arc<dyn Actuator>) -> Self {
        self.actuators.insert(address, actuator);
        self
    }

    /// Where sensor readings are sent
    pub fn hub_data_addr(mut self, addr: SocketAddr) -> Self {
        self.config.hub_data_addr = Some(addr);
        self
    }

    pub fn sensor_interval(mut self, interval: Duration) -> Self {
        self.config.sensor_interval = interval;
        self
    }

    pub fn request_ttl(mut self, ttl: Duration) -> Self {
        self.config.connection.request_ttl = ttl;
        self
    }

    /// Negotiate frame encryption before registering
    pub fn encrypted(mut self, enabled: bool) -> Self {
        self.config.connection.encrypted = enabled;
        self
    }

    /// Build, connect and register
    pub async fn connect(self) -> Result<FieldNode> {
        FieldNode::connect(self.config, self.sensors, self.actuators).await
    }
}

/// Builder for a [`ControlPanel`]
pub struct ControlPanelBuilder {
    config: ControlPanelConfig,
}

impl ControlPanelBuilder {
    /// Create a new builder
    pub fn new(hub_addr: &str) -> Self {
        Self {
            config: ControlPanelConfig {
                hub_addr: hub_addr.to_string(),
                ..Default::default()
            },
        }
    }

    /// Add a device class the panel can display
    pub fn compatible(mut self, class: &str) -> Self {
        self.config.compatibility_list.insert(class.to_string());
        self
    }

    pub fn compatibility_list<I>(mut self, classes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<DeviceClass>,
    {
        self.config.compatibility_list = classes.into_iter().map(Into::into).collect();
        self
    }

    /// Local address to receive sensor data on
    pub fn data_bind_addr(mut self, addr: &str) -> Self {
        self.config.data_bind_addr = Some(addr.to_string());
        self
    }

    /// Do not receive sensor data
    pub fn without_data(mut self) -> Self {
        self.config.data_bind_addr = None;
        self
    }

    pub fn request_ttl(mut self, ttl: Duration) -> Self {
        self.config.connection.request_ttl = ttl;
        self
    }

    /// Negotiate frame encryption before registering
    pub fn encrypted(mut self, enabled: bool) -> Self {
        self.config.connection.encrypted = enabled;
        self
    }

    /// Build, connect and register
    pub async fn connect(self) -> Result<ControlPanel> {
        ControlPanel::connect(self.config).await
    }
}
