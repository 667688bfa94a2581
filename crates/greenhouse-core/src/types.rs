//! Shared domain types

use crate::tlv::{tag, Tlv};
use crate::value::{decode_value, encode_value, Value};
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};

/// Hub-assigned address of a field node or control panel.
///
/// Both client kinds share one address space.
pub type ClientAddress = u32;

/// Address of a sensor or actuator within one field node
pub type DeviceAddress = u32;

/// Device class, e.g. `"A1"` for a temperature sensor
pub type DeviceClass = String;

/// Last known actuator state
pub type ActuatorState = i32;

/// Field Node System Table: device address to device class
pub type Fnst = BTreeMap<DeviceAddress, DeviceClass>;

/// Field Node Status Map: actuator address to last known state
pub type Fnsm = BTreeMap<DeviceAddress, ActuatorState>;

/// Active Device List: devices relevant to at least one subscriber
pub type Adl = BTreeSet<DeviceAddress>;

/// Discovery snapshot: field node address to field node name
pub type FieldNodePool = BTreeMap<ClientAddress, String>;

/// Largest datagram that is safe to send without fragmentation
pub const SAFE_DATAGRAM_SIZE: usize = 508;

/// Convert an address to an integer value.
///
/// Addresses travel as 32-bit signed integers, so only the non-negative
/// half of `u32` is representable.
pub fn address_to_value(address: u32) -> Result<Value> {
    i32::try_from(address)
        .map(Value::Integer)
        .map_err(|_| Error::Encode(format!("address {} out of range", address)))
}

/// Convert an integer value back to an address
pub fn address_from_value(value: &Value) -> Result<u32> {
    match value {
        Value::Integer(i) if *i >= 0 => Ok(*i as u32),
        Value::Integer(i) => Err(Error::Decode(format!("negative address {}", i))),
        other => Err(Error::Decode(format!(
            "expected integer address, got {:?}",
            other.kind()
        ))),
    }
}

/// One sensor sample pushed over the datagram channel
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub field_node: ClientAddress,
    pub sensor: DeviceAddress,
    pub value: f64,
}

impl SensorReading {
    pub fn new(field_node: ClientAddress, sensor: DeviceAddress, value: f64) -> Self {
        Self {
            field_node,
            sensor,
            value,
        }
    }

    /// Encode as a `SENSOR_DATA` frame
    pub fn encode(&self) -> Result<Bytes> {
        let children = [
            encode_value(&address_to_value(self.field_node)?)?,
            encode_value(&address_to_value(self.sensor)?)?,
            encode_value(&Value::Double(self.value))?,
        ];
        Ok(Tlv::from_children(tag::SENSOR_DATA, children.iter())?.encode())
    }

    /// Decode a datagram produced by [`SensorReading::encode`]
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        Self::from_tlv(&Tlv::decode(datagram)?)
    }

    pub fn from_tlv(frame: &Tlv) -> Result<Self> {
        if frame.tag() != tag::SENSOR_DATA {
            return Err(Error::UnknownTag(frame.tag()));
        }

        let mut values = Vec::with_capacity(3);
        for child in frame.children() {
            values.push(decode_value(&child?)?);
        }

        match values.as_slice() {
            [node, sensor, Value::Double(value)] => Ok(Self {
                field_node: address_from_value(node)?,
                sensor: address_from_value(sensor)?,
                value: *value,
            }),
            _ => Err(Error::Decode("malformed sensor data".into())),
        }
    }
}
