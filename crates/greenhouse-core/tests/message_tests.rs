//! Envelope and dispatch tests

use greenhouse_core::message::{encode_request, encode_response, open_envelope, Selector};
use greenhouse_core::{
    command, Error, Fnsm, Fnst, Message, Registry, Request, RequestMessage, Response,
    ResponseMessage, StatusCode,
};
use std::collections::{BTreeMap, BTreeSet};

fn sample_fnst() -> Fnst {
    let mut fnst = Fnst::new();
    fnst.insert(0, "A1".to_string());
    fnst.insert(1, "B2".to_string());
    fnst.insert(2, "S1".to_string());
    fnst
}

fn sample_fnsm() -> Fnsm {
    let mut fnsm = Fnsm::new();
    fnsm.insert(2, 0);
    fnsm
}

fn assert_request_roundtrip(registry: &Registry, request: Request) {
    let msg = RequestMessage::new(17, request);
    let tlv = encode_request(&msg).expect("encode failed");
    let decoded = registry.decode_message(&tlv).expect("decode failed");
    assert_eq!(decoded, Message::Request(msg));
}

fn assert_response_roundtrip(registry: &Registry, response: Response) {
    let msg = ResponseMessage::new(23, response);
    let tlv = encode_response(&msg).expect("encode failed");
    let decoded = registry.decode_message(&tlv).expect("decode failed");
    assert_eq!(decoded, Message::Response(msg));
}

#[test]
fn test_server_requests() {
    let server = Registry::server();
    let classes: BTreeSet<String> = ["A1".to_string()].into_iter().collect();

    assert_request_roundtrip(
        &server,
        Request::RegisterFieldNode {
            fnst: sample_fnst(),
            fnsm: sample_fnsm(),
            name: "east wing".to_string(),
        },
    );
    assert_request_roundtrip(
        &server,
        Request::RegisterControlPanel {
            compatibility_list: classes.clone(),
            data_port: Some(40123),
        },
    );
    assert_request_roundtrip(
        &server,
        Request::RegisterControlPanel {
            compatibility_list: classes,
            data_port: None,
        },
    );
    assert_request_roundtrip(&server, Request::GetFieldNodePool);
    assert_request_roundtrip(&server, Request::Subscribe { field_node: 3 });
    assert_request_roundtrip(&server, Request::Unsubscribe { field_node: 3 });
    assert_request_roundtrip(
        &server,
        Request::ActivateActuator {
            field_node: 0,
            actuator: 2,
            state: 1,
        },
    );
    assert_request_roundtrip(&server, Request::ActuatorNotification { actuator: 2, state: -1 });
    assert_request_roundtrip(&server, Request::Heartbeat);
    assert_request_roundtrip(&server, Request::RequestPublicKey);
    assert_request_roundtrip(
        &server,
        Request::ShareSecretKey {
            secret_key: vec![9; 32],
        },
    );
    assert_request_roundtrip(&server, Request::Disconnect);
}

#[test]
fn test_client_requests() {
    let field_node = Registry::field_node();
    let control_panel = Registry::control_panel();

    assert_request_roundtrip(
        &field_node,
        Request::AdlUpdate {
            adl: [0, 2].into_iter().collect(),
        },
    );
    assert_request_roundtrip(
        &field_node,
        Request::AdlUpdate {
            adl: BTreeSet::new(),
        },
    );
    assert_request_roundtrip(&field_node, Request::ApplyActuatorState { actuator: 2, state: 1 });
    assert_request_roundtrip(
        &control_panel,
        Request::ActuatorState {
            field_node: 0,
            actuator: 2,
            state: 1,
        },
    );
    assert_request_roundtrip(&control_panel, Request::FieldNodeUnavailable { field_node: 5 });
}

#[test]
fn test_responses() {
    let server = Registry::server();
    let field_node = Registry::field_node();
    let control_panel = Registry::control_panel();

    assert_response_roundtrip(&server, Response::AdlUpdated);
    assert_response_roundtrip(&server, Response::ActuatorActivated { actuator: 2, state: 1 });
    assert_response_roundtrip(&field_node, Response::FieldNodeRegistered { address: 0 });
    assert_response_roundtrip(&field_node, Response::PublicKey { key: vec![1, 2, 3] });
    assert_response_roundtrip(&control_panel, Response::ControlPanelRegistered { address: 1 });

    let mut pool = BTreeMap::new();
    pool.insert(0, "east wing".to_string());
    assert_response_roundtrip(&control_panel, Response::FieldNodePool { pool });
    assert_response_roundtrip(
        &control_panel,
        Response::FieldNodePool {
            pool: BTreeMap::new(),
        },
    );
    assert_response_roundtrip(
        &control_panel,
        Response::Subscribed {
            field_node: 0,
            fnst: sample_fnst(),
            fnsm: Fnsm::new(),
            name: "east wing".to_string(),
        },
    );
    assert_response_roundtrip(&control_panel, Response::Unsubscribed { field_node: 0 });
    assert_response_roundtrip(&control_panel, Response::SecretKeyAccepted);
    assert_response_roundtrip(
        &control_panel,
        Response::error(StatusCode::SubscriptionError, "already subscribed"),
    );
}

#[test]
fn test_response_envelope_selector() {
    let msg = ResponseMessage::new(5, Response::Heartbeat);
    let envelope = open_envelope(&encode_response(&msg).unwrap()).unwrap();
    assert_eq!(envelope.id, 5);
    assert_eq!(envelope.selector, Selector::Status(StatusCode::Heartbeat.code()));
    assert_eq!(envelope.params.remaining(), 0);
}

#[test]
fn test_field_node_rejects_hub_commands() {
    let msg = RequestMessage::new(2, Request::GetFieldNodePool);
    let tlv = encode_request(&msg).unwrap();

    match Registry::field_node().decode_message(&tlv) {
        Err(Error::UnknownCommand { id, command: name }) => {
            assert_eq!(id, 2);
            assert_eq!(name, command::GET_FIELD_NODE_POOL);
        }
        other => panic!("Expected UnknownCommand, got {:?}", other),
    }
}

#[test]
fn test_unknown_errors_are_not_fatal() {
    let err = Error::UnknownCommand {
        id: 1,
        command: "water plants".to_string(),
    };
    assert!(!err.is_fatal());
    assert!(Error::Decode("bad".into()).is_fatal());
}

#[test]
fn test_reply_keeps_id() {
    let msg = RequestMessage::new(99, Request::Heartbeat);
    let reply = msg.reply(Response::Heartbeat);
    assert_eq!(reply.id, 99);
}
