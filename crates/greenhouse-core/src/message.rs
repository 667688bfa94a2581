//! Request/response envelopes
//!
//! ```text
//! REQUEST  [Integer id][String command  ][ParameterContainer?]
//! RESPONSE [Integer id][Integer status  ][ParameterContainer?]
//! ```
//! The parameter container is a positional list of value frames. It is
//! omitted when a message carries no parameters.

use crate::error::StatusCode;
use crate::tlv::{tag, Tlv};
use crate::types::*;
use crate::value::{decode_value, encode_value, Value};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};

/// Connection-scoped message identifier, assigned by the sender
pub type MessageId = u32;

/// Command names
pub mod command {
    pub const REGISTER_FIELD_NODE: &str = "register field node";
    pub const REGISTER_CONTROL_PANEL: &str = "register control panel";
    pub const GET_FIELD_NODE_POOL: &str = "get field node pool";
    pub const SUBSCRIBE: &str = "subscribe to field node";
    pub const UNSUBSCRIBE: &str = "unsubscribe from field node";
    pub const ACTIVATE_ACTUATOR: &str = "activate actuator";
    pub const ACTUATOR_NOTIFICATION: &str = "actuator notification";
    pub const ACTUATOR_STATE: &str = "actuator state";
    pub const FIELD_NODE_UNAVAILABLE: &str = "field node unavailable";
    pub const ADL_UPDATE: &str = "ADL update";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const REQUEST_PUBLIC_KEY: &str = "request public key";
    pub const SHARE_SECRET_KEY: &str = "share secret key";
    pub const DISCONNECT: &str = "disconnect";
}

/// Request bodies
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    RegisterFieldNode {
        fnst: Fnst,
        fnsm: Fnsm,
        name: String,
    },
    RegisterControlPanel {
        compatibility_list: BTreeSet<DeviceClass>,
        data_port: Option<u16>,
    },
    GetFieldNodePool,
    Subscribe {
        field_node: ClientAddress,
    },
    Unsubscribe {
        field_node: ClientAddress,
    },
    /// Control panel asks the hub to drive an actuator on a field node
    ActivateActuator {
        field_node: ClientAddress,
        actuator: DeviceAddress,
        state: ActuatorState,
    },
    /// Hub asks a field node to drive one of its actuators
    ApplyActuatorState {
        actuator: DeviceAddress,
        state: ActuatorState,
    },
    /// Field node reports an actuator change to the hub
    ActuatorNotification {
        actuator: DeviceAddress,
        state: ActuatorState,
    },
    /// Hub relays an actuator change to a subscribed control panel
    ActuatorState {
        field_node: ClientAddress,
        actuator: DeviceAddress,
        state: ActuatorState,
    },
    FieldNodeUnavailable {
        field_node: ClientAddress,
    },
    AdlUpdate {
        adl: Adl,
    },
    Heartbeat,
    RequestPublicKey,
    ShareSecretKey {
        secret_key: Vec<u8>,
    },
    Disconnect,
}

impl Request {
    pub fn command(&self) -> &'static str {
        match self {
            Request::RegisterFieldNode { .. } => command::REGISTER_FIELD_NODE,
            Request::RegisterControlPanel { .. } => command::REGISTER_CONTROL_PANEL,
            Request::GetFieldNodePool => command::GET_FIELD_NODE_POOL,
            Request::Subscribe { .. } => command::SUBSCRIBE,
            Request::Unsubscribe { .. } => command::UNSUBSCRIBE,
            Request::ActivateActuator { .. } | Request::ApplyActuatorState { .. } => {
                command::ACTIVATE_ACTUATOR
            }
            Request::ActuatorNotification { .. } => command::ACTUATOR_NOTIFICATION,
            Request::ActuatorState { .. } => command::ACTUATOR_STATE,
            Request::FieldNodeUnavailable { .. } => command::FIELD_NODE_UNAVAILABLE,
            Request::AdlUpdate { .. } => command::ADL_UPDATE,
            Request::Heartbeat => command::HEARTBEAT,
            Request::RequestPublicKey => command::REQUEST_PUBLIC_KEY,
            Request::ShareSecretKey { .. } => command::SHARE_SECRET_KEY,
            Request::Disconnect => command::DISCONNECT,
        }
    }

    fn write_params(&self, w: &mut ParamWriter) -> Result<()> {
        match self {
            Request::RegisterFieldNode { fnst, fnsm, name } => {
                w.fnst(fnst)?;
                w.fnsm(fnsm)?;
                w.string(name);
            }
            Request::RegisterControlPanel {
                compatibility_list,
                data_port,
            } => {
                w.string_set(compatibility_list);
                w.int(data_port.map(i32::from).unwrap_or(-1));
            }
            Request::Subscribe { field_node }
            | Request::Unsubscribe { field_node }
            | Request::FieldNodeUnavailable { field_node } => {
                w.address(*field_node)?;
            }
            Request::ActivateActuator {
                field_node,
                actuator,
                state,
            }
            | Request::ActuatorState {
                field_node,
                actuator,
                state,
            } => {
                w.address(*field_node)?;
                w.address(*actuator)?;
                w.int(*state);
            }
            Request::ApplyActuatorState { actuator, state }
            | Request::ActuatorNotification { actuator, state } => {
                w.address(*actuator)?;
                w.int(*state);
            }
            Request::AdlUpdate { adl } => w.address_set(adl)?,
            Request::ShareSecretKey { secret_key } => {
                w.push(Value::SecretKey(secret_key.clone()));
            }
            Request::GetFieldNodePool
            | Request::Heartbeat
            | Request::RequestPublicKey
            | Request::Disconnect => {}
        }
        Ok(())
    }
}

/// Response bodies
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    FieldNodeRegistered {
        address: ClientAddress,
    },
    ControlPanelRegistered {
        address: ClientAddress,
    },
    FieldNodePool {
        pool: FieldNodePool,
    },
    Subscribed {
        field_node: ClientAddress,
        fnst: Fnst,
        fnsm: Fnsm,
        name: String,
    },
    Unsubscribed {
        field_node: ClientAddress,
    },
    AdlUpdated,
    ActuatorActivated {
        actuator: DeviceAddress,
        state: ActuatorState,
    },
    Heartbeat,
    PublicKey {
        key: Vec<u8>,
    },
    SecretKeyAccepted,
    Disconnected,
    /// A rejected request, with a human-readable description
    Error {
        status: StatusCode,
        description: String,
    },
}

impl Response {
    /// Create an error response. `status` should be one of the 100+ codes.
    pub fn error(status: StatusCode, description: impl Into<String>) -> Self {
        Response::Error {
            status,
            description: description.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Response::Ok => StatusCode::Ok,
            Response::FieldNodeRegistered { .. } => StatusCode::FieldNodeRegistered,
            Response::ControlPanelRegistered { .. } => StatusCode::ControlPanelRegistered,
            Response::FieldNodePool { .. } => StatusCode::FieldNodePool,
            Response::Subscribed { .. } => StatusCode::Subscribed,
            Response::Unsubscribed { .. } => StatusCode::Unsubscribed,
            Response::AdlUpdated => StatusCode::AdlUpdated,
            Response::ActuatorActivated { .. } => StatusCode::ActuatorActivated,
            Response::Heartbeat => StatusCode::Heartbeat,
            Response::PublicKey { .. } => StatusCode::PublicKey,
            Response::SecretKeyAccepted => StatusCode::SecretKeyAccepted,
            Response::Disconnected => StatusCode::Disconnected,
            Response::Error { status, .. } => *status,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status().is_error()
    }

    fn write_params(&self, w: &mut ParamWriter) -> Result<()> {
        match self {
            Response::FieldNodeRegistered { address }
            | Response::ControlPanelRegistered { address } => w.address(*address)?,
            Response::FieldNodePool { pool } => w.pool(pool)?,
            Response::Subscribed {
                field_node,
                fnst,
                fnsm,
                name,
            } => {
                w.address(*field_node)?;
                w.fnst(fnst)?;
                w.fnsm(fnsm)?;
                w.string(name);
            }
            Response::Unsubscribed { field_node } => w.address(*field_node)?,
            Response::ActuatorActivated { actuator, state } => {
                w.address(*actuator)?;
                w.int(*state);
            }
            Response::PublicKey { key } => w.push(Value::PublicKey(key.clone())),
            Response::Error { description, .. } => w.string(description),
            Response::Ok
            | Response::AdlUpdated
            | Response::Heartbeat
            | Response::SecretKeyAccepted
            | Response::Disconnected => {}
        }
        Ok(())
    }
}

/// A request with its correlation id
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMessage {
    pub id: MessageId,
    pub request: Request,
}

impl RequestMessage {
    pub fn new(id: MessageId, request: Request) -> Self {
        Self { id, request }
    }

    /// Build the response to this request, correlated by id
    pub fn reply(&self, response: Response) -> ResponseMessage {
        ResponseMessage::new(self.id, response)
    }
}

/// A response with the id of the request it answers
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage {
    pub id: MessageId,
    pub response: Response,
}

impl ResponseMessage {
    pub fn new(id: MessageId, response: Response) -> Self {
        Self { id, response }
    }
}

/// Any control message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(RequestMessage),
    Response(ResponseMessage),
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Message::Request(m) => m.id,
            Message::Response(m) => m.id,
        }
    }

    pub fn encode(&self) -> Result<Tlv> {
        match self {
            Message::Request(m) => encode_request(m),
            Message::Response(m) => encode_response(m),
        }
    }
}

impl From<RequestMessage> for Message {
    fn from(m: RequestMessage) -> Self {
        Message::Request(m)
    }
}

impl From<ResponseMessage> for Message {
    fn from(m: ResponseMessage) -> Self {
        Message::Response(m)
    }
}

// ============================================================================
// ENVELOPE ENCODING
// ============================================================================

/// Encode a request under the `REQUEST` tag
pub fn encode_request(msg: &RequestMessage) -> Result<Tlv> {
    let mut params = ParamWriter::new();
    msg.request.write_params(&mut params)?;
    encode_envelope(
        tag::REQUEST,
        msg.id,
        Value::String(msg.request.command().to_string()),
        params,
    )
}

/// Encode a response under the `RESPONSE` tag
pub fn encode_response(msg: &ResponseMessage) -> Result<Tlv> {
    let mut params = ParamWriter::new();
    msg.response.write_params(&mut params)?;
    encode_envelope(
        tag::RESPONSE,
        msg.id,
        Value::Integer(msg.response.status().code()),
        params,
    )
}

fn encode_envelope(tag: u16, id: MessageId, selector: Value, params: ParamWriter) -> Result<Tlv> {
    let mut children = vec![
        encode_value(&address_to_value(id)?)?,
        encode_value(&selector)?,
    ];
    if let Some(container) = params.into_container()? {
        children.push(container);
    }
    Tlv::from_children(tag, children.iter())
}

// ============================================================================
// ENVELOPE DECODING
// ============================================================================

/// What an envelope's selector names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Command(String),
    Status(i32),
}

/// An envelope whose header has been read but whose parameters have not
/// been interpreted yet
#[derive(Debug)]
pub struct Envelope {
    pub id: MessageId,
    pub selector: Selector,
    pub params: ParamReader,
}

/// Read the envelope header: outer tag, id, then command or status
pub fn open_envelope(tlv: &Tlv) -> Result<Envelope> {
    let is_request = match tlv.tag() {
        tag::REQUEST => true,
        tag::RESPONSE => false,
        other => return Err(Error::UnknownTag(other)),
    };

    let mut children = tlv.children();
    let mut next = |what: &str| -> Result<Tlv> {
        children
            .next()
            .unwrap_or_else(|| Err(Error::Decode(format!("envelope missing {}", what))))
    };

    let id = address_from_value(&decode_value(&next("id")?)?)?;
    let selector = match (is_request, decode_value(&next("selector")?)?) {
        (true, Value::String(command)) => Selector::Command(command),
        (false, Value::Integer(status)) => Selector::Status(status),
        (_, other) => {
            return Err(Error::Decode(format!(
                "unexpected {:?} selector in message {}",
                other.kind(),
                id
            )))
        }
    };

    let params = match children.next() {
        Some(container) => ParamReader::from_container(&container?)?,
        None => ParamReader::default(),
    };

    Ok(Envelope {
        id,
        selector,
        params,
    })
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// Builds a parameter container.
///
/// Empty collections are written as `Null` since the value decoder cannot
/// infer the element type of an empty collection.
#[derive(Debug, Default)]
pub struct ParamWriter {
    params: Vec<Value>,
}

impl ParamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.params.push(value.into());
    }

    pub fn int(&mut self, value: i32) {
        self.push(Value::Integer(value));
    }

    pub fn string(&mut self, value: &str) {
        self.push(Value::from(value));
    }

    pub fn address(&mut self, address: u32) -> Result<()> {
        self.params.push(address_to_value(address)?);
        Ok(())
    }

    pub fn string_set(&mut self, set: &BTreeSet<String>) {
        let set: BTreeSet<Value> = set.iter().map(|s| Value::from(s.as_str())).collect();
        self.collection(Value::Set(set));
    }

    pub fn address_set(&mut self, set: &BTreeSet<u32>) -> Result<()> {
        let set = set
            .iter()
            .map(|a| address_to_value(*a))
            .collect::<Result<BTreeSet<_>>>()?;
        self.collection(Value::Set(set));
        Ok(())
    }

    pub fn fnst(&mut self, fnst: &Fnst) -> Result<()> {
        let mut map = BTreeMap::new();
        for (address, class) in fnst {
            map.insert(address_to_value(*address)?, Value::from(class.as_str()));
        }
        self.collection(Value::Map(map));
        Ok(())
    }

    pub fn fnsm(&mut self, fnsm: &Fnsm) -> Result<()> {
        let mut map = BTreeMap::new();
        for (address, state) in fnsm {
            map.insert(address_to_value(*address)?, Value::Integer(*state));
        }
        self.collection(Value::Map(map));
        Ok(())
    }

    pub fn pool(&mut self, pool: &FieldNodePool) -> Result<()> {
        let mut map = BTreeMap::new();
        for (address, name) in pool {
            map.insert(address_to_value(*address)?, Value::from(name.as_str()));
        }
        self.collection(Value::Map(map));
        Ok(())
    }

    fn collection(&mut self, value: Value) {
        let empty = match &value {
            Value::List(items) => items.is_empty(),
            Value::Set(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            _ => false,
        };
        self.params.push(if empty { Value::Null } else { value });
    }

    /// Encode as a `PARAMETER_CONTAINER` frame, or `None` without parameters
    pub fn into_container(self) -> Result<Option<Tlv>> {
        if self.params.is_empty() {
            return Ok(None);
        }
        let children = self
            .params
            .iter()
            .map(encode_value)
            .collect::<Result<Vec<_>>>()?;
        Tlv::from_children(tag::PARAMETER_CONTAINER, children.iter()).map(Some)
    }
}

/// Reads positional parameters out of a decoded container
#[derive(Debug, Default)]
pub struct ParamReader {
    params: std::collections::VecDeque<Value>,
    position: usize,
}

impl ParamReader {
    pub fn new(params: Vec<Value>) -> Self {
        Self {
            params: params.into(),
            position: 0,
        }
    }

    /// Decode a `PARAMETER_CONTAINER` frame
    pub fn from_container(tlv: &Tlv) -> Result<Self> {
        if tlv.tag() != tag::PARAMETER_CONTAINER {
            return Err(Error::Decode(format!(
                "expected parameter container, got tag 0x{:04x}",
                tlv.tag()
            )));
        }
        let params = tlv
            .children()
            .map(|child| decode_value(&child?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(params))
    }

    pub fn remaining(&self) -> usize {
        self.params.len()
    }

    pub fn next_value(&mut self) -> Result<Value> {
        let position = self.position;
        self.position += 1;
        self.params
            .pop_front()
            .ok_or_else(|| Error::Decode(format!("missing parameter {}", position)))
    }

    pub fn int(&mut self) -> Result<i32> {
        match self.next_value()? {
            Value::Integer(i) => Ok(i),
            other => Err(self.mismatch("integer", &other)),
        }
    }

    pub fn address(&mut self) -> Result<u32> {
        address_from_value(&self.next_value()?)
    }

    pub fn string(&mut self) -> Result<String> {
        match self.next_value()? {
            Value::String(s) => Ok(s),
            other => Err(self.mismatch("string", &other)),
        }
    }

    pub fn string_set(&mut self) -> Result<BTreeSet<String>> {
        match self.next_value()? {
            Value::Null => Ok(BTreeSet::new()),
            Value::Set(set) => set
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    other => Err(self.mismatch("string", &other)),
                })
                .collect(),
            other => Err(self.mismatch("set", &other)),
        }
    }

    pub fn address_set(&mut self) -> Result<BTreeSet<u32>> {
        match self.next_value()? {
            Value::Null => Ok(BTreeSet::new()),
            Value::Set(set) => set.iter().map(address_from_value).collect(),
            other => Err(self.mismatch("set", &other)),
        }
    }

    pub fn fnst(&mut self) -> Result<Fnst> {
        self.address_map(|v| v.as_str().map(str::to_string))
    }

    pub fn fnsm(&mut self) -> Result<Fnsm> {
        self.address_map(Value::as_int)
    }

    pub fn pool(&mut self) -> Result<FieldNodePool> {
        self.address_map(|v| v.as_str().map(str::to_string))
    }

    pub fn public_key(&mut self) -> Result<Vec<u8>> {
        match self.next_value()? {
            Value::PublicKey(key) => Ok(key),
            other => Err(self.mismatch("public key", &other)),
        }
    }

    pub fn secret_key(&mut self) -> Result<Vec<u8>> {
        match self.next_value()? {
            Value::SecretKey(key) => Ok(key),
            other => Err(self.mismatch("secret key", &other)),
        }
    }

    fn address_map<T>(&mut self, convert: impl Fn(&Value) -> Option<T>) -> Result<BTreeMap<u32, T>> {
        let entries = match self.next_value()? {
            Value::Null => return Ok(BTreeMap::new()),
            Value::Map(entries) => entries,
            other => return Err(self.mismatch("map", &other)),
        };

        let mut map = BTreeMap::new();
        for (key, value) in &entries {
            let converted = convert(value).ok_or_else(|| self.mismatch("map value", value))?;
            map.insert(address_from_value(key)?, converted);
        }
        Ok(map)
    }

    fn mismatch(&self, expected: &str, got: &Value) -> Error {
        Error::Decode(format!(
            "parameter {}: expected {}, got {:?}",
            self.position.saturating_sub(1),
            expected,
            got.kind()
        ))
    }
}

// ============================================================================
// IDS
// ============================================================================

/// Hands out message ids for one connection.
///
/// Ids stay within the non-negative `i32` range and wrap back to 1.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU32,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    pub fn next_id(&self) -> MessageId {
        let max = i32::MAX as u32;
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let following = if current >= max { 1 } else { current + 1 };
            match self.next.compare_exchange_weak(
                current,
                following,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_layout() {
        let msg = RequestMessage::new(7, Request::Subscribe { field_node: 2 });
        let tlv = encode_request(&msg).unwrap();
        assert_eq!(tlv.tag(), tag::REQUEST);

        let envelope = open_envelope(&tlv).unwrap();
        assert_eq!(envelope.id, 7);
        assert_eq!(
            envelope.selector,
            Selector::Command(command::SUBSCRIBE.to_string())
        );
        assert_eq!(envelope.params.remaining(), 1);
    }

    #[test]
    fn test_parameterless_message_omits_container() {
        let msg = RequestMessage::new(1, Request::Heartbeat);
        let tlv = encode_request(&msg).unwrap();
        assert_eq!(tlv.children().count(), 2);
    }

    #[test]
    fn test_empty_collections_travel_as_null() {
        let mut writer = ParamWriter::new();
        writer.address_set(&BTreeSet::new()).unwrap();
        writer.fnsm(&Fnsm::new()).unwrap();
        let container = writer.into_container().unwrap().unwrap();

        let mut reader = ParamReader::from_container(&container).unwrap();
        assert!(reader.address_set().unwrap().is_empty());
        assert!(reader.fnsm().unwrap().is_empty());
    }

    #[test]
    fn test_missing_parameter() {
        let mut reader = ParamReader::default();
        assert!(matches!(reader.int(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_id_generator_wraps() {
        let ids = IdGenerator {
            next: AtomicU32::new(i32::MAX as u32),
        };
        assert_eq!(ids.next_id(), i32::MAX as u32);
        assert_eq!(ids.next_id(), 1);
    }
}
