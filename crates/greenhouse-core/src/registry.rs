//! Per-role dispatch tables
//!
//! Each role accepts a fixed vocabulary: the commands it can be asked to
//! execute and the status codes it expects in answer to its own requests.
//! Tables are built from static data when the registry is created.

use crate::error::StatusCode;
use crate::message::*;
use crate::tlv::Tlv;
use crate::{Error, Result};
use std::collections::HashMap;

/// Decodes request parameters into a request body
pub type RequestDecoder = fn(&mut ParamReader) -> Result<Request>;

/// Decodes response parameters into a response body
pub type ResponseDecoder = fn(StatusCode, &mut ParamReader) -> Result<Response>;

/// Protocol roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Server,
    FieldNode,
    ControlPanel,
}

const SERVER_REQUESTS: &[(&str, RequestDecoder)] = &[
    (command::REGISTER_FIELD_NODE, decode::register_field_node),
    (command::REGISTER_CONTROL_PANEL, decode::register_control_panel),
    (command::GET_FIELD_NODE_POOL, decode::get_field_node_pool),
    (command::SUBSCRIBE, decode::subscribe),
    (command::UNSUBSCRIBE, decode::unsubscribe),
    (command::ACTIVATE_ACTUATOR, decode::activate_actuator),
    (command::ACTUATOR_NOTIFICATION, decode::actuator_notification),
    (command::HEARTBEAT, decode::heartbeat),
    (command::REQUEST_PUBLIC_KEY, decode::request_public_key),
    (command::SHARE_SECRET_KEY, decode::share_secret_key),
    (command::DISCONNECT, decode::disconnect),
];

const SERVER_RESPONSES: &[(StatusCode, ResponseDecoder)] = &[
    (StatusCode::Ok, decode::ok),
    (StatusCode::AdlUpdated, decode::adl_updated),
    (StatusCode::ActuatorActivated, decode::actuator_activated),
    (StatusCode::Heartbeat, decode::heartbeat_reply),
];

const FIELD_NODE_REQUESTS: &[(&str, RequestDecoder)] = &[
    (command::ADL_UPDATE, decode::adl_update),
    (command::ACTIVATE_ACTUATOR, decode::apply_actuator_state),
    (command::HEARTBEAT, decode::heartbeat),
];

const FIELD_NODE_RESPONSES: &[(StatusCode, ResponseDecoder)] = &[
    (StatusCode::Ok, decode::ok),
    (StatusCode::FieldNodeRegistered, decode::field_node_registered),
    (StatusCode::Heartbeat, decode::heartbeat_reply),
    (StatusCode::PublicKey, decode::public_key),
    (StatusCode::SecretKeyAccepted, decode::secret_key_accepted),
    (StatusCode::Disconnected, decode::disconnected),
];

const CONTROL_PANEL_REQUESTS: &[(&str, RequestDecoder)] = &[
    (command::ACTUATOR_STATE, decode::actuator_state),
    (command::FIELD_NODE_UNAVAILABLE, decode::field_node_unavailable),
    (command::HEARTBEAT, decode::heartbeat),
];

const CONTROL_PANEL_RESPONSES: &[(StatusCode, ResponseDecoder)] = &[
    (StatusCode::Ok, decode::ok),
    (StatusCode::ControlPanelRegistered, decode::control_panel_registered),
    (StatusCode::FieldNodePool, decode::field_node_pool),
    (StatusCode::Subscribed, decode::subscribed),
    (StatusCode::Unsubscribed, decode::unsubscribed),
    (StatusCode::Heartbeat, decode::heartbeat_reply),
    (StatusCode::PublicKey, decode::public_key),
    (StatusCode::SecretKeyAccepted, decode::secret_key_accepted),
    (StatusCode::Disconnected, decode::disconnected),
];

/// Every role understands every error status
const ERROR_RESPONSES: &[(StatusCode, ResponseDecoder)] = &[
    (StatusCode::ProtocolError, decode::error),
    (StatusCode::AuthenticationError, decode::error),
    (StatusCode::RegistrationError, decode::error),
    (StatusCode::SubscriptionError, decode::error),
    (StatusCode::EncryptionError, decode::error),
    (StatusCode::ActuatorError, decode::error),
];

/// Lookup tables for one role
#[derive(Clone)]
pub struct Registry {
    role: Role,
    requests: HashMap<&'static str, RequestDecoder>,
    responses: HashMap<i32, ResponseDecoder>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("role", &self.role)
            .field("commands", &self.requests.len())
            .field("statuses", &self.responses.len())
            .finish()
    }
}

impl Registry {
    pub fn new(role: Role) -> Self {
        let (requests, responses) = match role {
            Role::Server => (SERVER_REQUESTS, SERVER_RESPONSES),
            Role::FieldNode => (FIELD_NODE_REQUESTS, FIELD_NODE_RESPONSES),
            Role::ControlPanel => (CONTROL_PANEL_REQUESTS, CONTROL_PANEL_RESPONSES),
        };

        Self {
            role,
            requests: requests.iter().copied().collect(),
            responses: responses
                .iter()
                .chain(ERROR_RESPONSES)
                .map(|(status, decoder)| (status.code(), *decoder))
                .collect(),
        }
    }

    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    pub fn field_node() -> Self {
        Self::new(Role::FieldNode)
    }

    pub fn control_panel() -> Self {
        Self::new(Role::ControlPanel)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn accepts_command(&self, command: &str) -> bool {
        self.requests.contains_key(command)
    }

    pub fn accepts_status(&self, status: StatusCode) -> bool {
        self.responses.contains_key(&status.code())
    }

    /// Decode a request or response frame.
    ///
    /// Fails with [`Error::UnknownCommand`] or [`Error::UnknownStatusCode`]
    /// when this role has no entry for the selector; those errors carry the
    /// message id so the caller can still answer.
    pub fn decode_message(&self, tlv: &Tlv) -> Result<Message> {
        let Envelope {
            id,
            selector,
            mut params,
        } = open_envelope(tlv)?;

        match selector {
            Selector::Command(command) => {
                let decoder = self
                    .requests
                    .get(command.as_str())
                    .ok_or_else(|| Error::UnknownCommand {
                        id,
                        command: command.clone(),
                    })?;
                let request = decoder(&mut params)?;
                Ok(Message::Request(RequestMessage::new(id, request)))
            }
            Selector::Status(code) => {
                let (status, decoder) = StatusCode::from_i32(code)
                    .and_then(|status| self.responses.get(&code).map(|d| (status, d)))
                    .ok_or(Error::UnknownStatusCode { id, code })?;
                let response = decoder(status, &mut params)?;
                Ok(Message::Response(ResponseMessage::new(id, response)))
            }
        }
    }
}

mod decode {
    use super::*;

    pub(super) fn get_field_node_pool(_: &mut ParamReader) -> Result<Request> {
        Ok(Request::GetFieldNodePool)
    }

    pub(super) fn heartbeat(_: &mut ParamReader) -> Result<Request> {
        Ok(Request::Heartbeat)
    }

    pub(super) fn request_public_key(_: &mut ParamReader) -> Result<Request> {
        Ok(Request::RequestPublicKey)
    }

    pub(super) fn disconnect(_: &mut ParamReader) -> Result<Request> {
        Ok(Request::Disconnect)
    }

    pub(super) fn ok(_: StatusCode, _: &mut ParamReader) -> Result<Response> {
        Ok(Response::Ok)
    }

    pub(super) fn adl_updated(_: StatusCode, _: &mut ParamReader) -> Result<Response> {
        Ok(Response::AdlUpdated)
    }

    pub(super) fn heartbeat_reply(_: StatusCode, _: &mut ParamReader) -> Result<Response> {
        Ok(Response::Heartbeat)
    }

    pub(super) fn secret_key_accepted(_: StatusCode, _: &mut ParamReader) -> Result<Response> {
        Ok(Response::SecretKeyAccepted)
    }

    pub(super) fn disconnected(_: StatusCode, _: &mut ParamReader) -> Result<Response> {
        Ok(Response::Disconnected)
    }

    pub(super) fn register_field_node(p: &mut ParamReader) -> Result<Request> {
        Ok(Request::RegisterFieldNode {
            fnst: p.fnst()?,
            fnsm: p.fnsm()?,
            name: p.string()?,
        })
    }

    pub(super) fn register_control_panel(p: &mut ParamReader) -> Result<Request> {
        let compatibility_list = p.string_set()?;
        let data_port = match p.int()? {
            port if port < 0 => None,
            port => Some(
                u16::try_from(port)
                    .map_err(|_| Error::Decode(format!("data port {} out of range", port)))?,
            ),
        };
        Ok(Request::RegisterControlPanel {
            compatibility_list,
            data_port,
        })
    }

    pub(super) fn subscribe(p: &mut ParamReader) -> Result<Request> {
        Ok(Request::Subscribe {
            field_node: p.address()?,
        })
    }

    pub(super) fn unsubscribe(p: &mut ParamReader) -> Result<Request> {
        Ok(Request::Unsubscribe {
            field_node: p.address()?,
        })
    }

    pub(super) fn activate_actuator(p: &mut ParamReader) -> Result<Request> {
        Ok(Request::ActivateActuator {
            field_node: p.address()?,
            actuator: p.address()?,
            state: p.int()?,
        })
    }

    pub(super) fn apply_actuator_state(p: &mut ParamReader) -> Result<Request> {
        Ok(Request::ApplyActuatorState {
            actuator: p.address()?,
            state: p.int()?,
        })
    }

    pub(super) fn actuator_notification(p: &mut ParamReader) -> Result<Request> {
        Ok(Request::ActuatorNotification {
            actuator: p.address()?,
            state: p.int()?,
        })
    }

    pub(super) fn actuator_state(p: &mut ParamReader) -> Result<Request> {
        Ok(Request::ActuatorState {
            field_node: p.address()?,
            actuator: p.address()?,
            state: p.int()?,
        })
    }

    pub(super) fn field_node_unavailable(p: &mut ParamReader) -> Result<Request> {
        Ok(Request::FieldNodeUnavailable {
            field_node: p.address()?,
        })
    }

    pub(super) fn adl_update(p: &mut ParamReader) -> Result<Request> {
        Ok(Request::AdlUpdate {
            adl: p.address_set()?,
        })
    }

    pub(super) fn share_secret_key(p: &mut ParamReader) -> Result<Request> {
        Ok(Request::ShareSecretKey {
            secret_key: p.secret_key()?,
        })
    }

    pub(super) fn field_node_registered(_: StatusCode, p: &mut ParamReader) -> Result<Response> {
        Ok(Response::FieldNodeRegistered {
            address: p.address()?,
        })
    }

    pub(super) fn control_panel_registered(_: StatusCode, p: &mut ParamReader) -> Result<Response> {
        Ok(Response::ControlPanelRegistered {
            address: p.address()?,
        })
    }

    pub(super) fn field_node_pool(_: StatusCode, p: &mut ParamReader) -> Result<Response> {
        Ok(Response::FieldNodePool { pool: p.pool()? })
    }

    pub(super) fn subscribed(_: StatusCode, p: &mut ParamReader) -> Result<Response> {
        Ok(Response::Subscribed {
            field_node: p.address()?,
            fnst: p.fnst()?,
            fnsm: p.fnsm()?,
            name: p.string()?,
        })
    }

    pub(super) fn unsubscribed(_: StatusCode, p: &mut ParamReader) -> Result<Response> {
        Ok(Response::Unsubscribed {
            field_node: p.address()?,
        })
    }

    pub(super) fn actuator_activated(_: StatusCode, p: &mut ParamReader) -> Result<Response> {
        Ok(Response::ActuatorActivated {
            actuator: p.address()?,
            state: p.int()?,
        })
    }

    pub(super) fn public_key(_: StatusCode, p: &mut ParamReader) -> Result<Response> {
        Ok(Response::PublicKey {
            key: p.public_key()?,
        })
    }

    pub(super) fn error(status: StatusCode, p: &mut ParamReader) -> Result<Response> {
        let description = if p.remaining() > 0 {
            p.string()?
        } else {
            String::new()
        };
        Ok(Response::Error {
            status,
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fnst;

    #[test]
    fn test_server_decodes_registration() {
        let mut fnst = Fnst::new();
        fnst.insert(0, "A1".to_string());
        let msg = RequestMessage::new(
            4,
            Request::RegisterFieldNode {
                fnst,
                fnsm: Default::default(),
                name: "north bed".to_string(),
            },
        );

        let tlv = encode_request(&msg).unwrap();
        let decoded = Registry::server().decode_message(&tlv).unwrap();
        assert_eq!(decoded, Message::Request(msg));
    }

    #[test]
    fn test_same_command_decodes_per_role() {
        let to_hub = RequestMessage::new(
            1,
            Request::ActivateActuator {
                field_node: 2,
                actuator: 5,
                state: 1,
            },
        );
        let to_node = RequestMessage::new(1, Request::ApplyActuatorState { actuator: 5, state: 1 });

        let decoded = Registry::server()
            .decode_message(&encode_request(&to_hub).unwrap())
            .unwrap();
        assert_eq!(decoded, Message::Request(to_hub));

        let decoded = Registry::field_node()
            .decode_message(&encode_request(&to_node).unwrap())
            .unwrap();
        assert_eq!(decoded, Message::Request(to_node));
    }

    #[test]
    fn test_unknown_command_keeps_id() {
        let msg = RequestMessage::new(9, Request::AdlUpdate { adl: Default::default() });
        let tlv = encode_request(&msg).unwrap();

        match Registry::control_panel().decode_message(&tlv) {
            Err(Error::UnknownCommand { id, command: name }) => {
                assert_eq!(id, 9);
                assert_eq!(name, command::ADL_UPDATE);
            }
            other => panic!("expected UnknownCommand, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_status_code() {
        let msg = ResponseMessage::new(3, Response::AdlUpdated);
        let tlv = encode_response(&msg).unwrap();
        assert!(matches!(
            Registry::control_panel().decode_message(&tlv),
            Err(Error::UnknownStatusCode { id: 3, code: 6 })
        ));
    }

    #[test]
    fn test_error_response_understood_by_every_role() {
        let msg = ResponseMessage::new(
            11,
            Response::error(StatusCode::AuthenticationError, "register first"),
        );
        let tlv = encode_response(&msg).unwrap();
        for role in [Role::Server, Role::FieldNode, Role::ControlPanel] {
            let decoded = Registry::new(role).decode_message(&tlv).unwrap();
            assert_eq!(decoded, Message::Response(msg.clone()));
        }
    }
}
