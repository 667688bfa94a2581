//! Hardware collaborators of a field node

use crate::types::{ActuatorState, DeviceClass};
use std::fmt;

/// Why an actuator refused a state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorFault(pub String);

impl fmt::Display for ActuatorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ActuatorFault {}

/// A device that produces periodic samples
pub trait Sensor: Send + Sync {
    fn device_class(&self) -> DeviceClass;

    fn read_value(&self) -> f64;
}

/// A device whose state can be driven remotely
pub trait Actuator: Send + Sync {
    fn device_class(&self) -> DeviceClass;

    /// State reported at registration
    fn initial_state(&self) -> ActuatorState {
        0
    }

    fn apply_state(&self, state: ActuatorState) -> Result<(), ActuatorFault>;
}
