//! Key exchange tests

use greenhouse_core::crypto::{CryptoChannel, KeyPair};
use greenhouse_core::message::encode_request;
use greenhouse_core::{tag, Error, Request, RequestMessage, SecurityState, Tlv};

const TEST_BITS: usize = 1024;

fn heartbeat(id: u32) -> Tlv {
    encode_request(&RequestMessage::new(id, Request::Heartbeat)).unwrap()
}

#[test]
fn test_full_handshake() {
    let mut hub = CryptoChannel::with_rsa_bits(TEST_BITS);
    let mut client = CryptoChannel::with_rsa_bits(TEST_BITS);

    // request public key travels in plain
    let frame = client.seal(heartbeat(1)).unwrap();
    assert_eq!(frame.tag(), tag::REQUEST);
    hub.open(frame).unwrap();

    let der = hub.offer_public_key().unwrap();
    assert_eq!(hub.state(), SecurityState::AsymmetricPending);

    let secret = client.adopt_public_key(&der).unwrap();
    assert_eq!(client.state(), SecurityState::SymmetricPending);

    // share secret key travels sealed with the public key
    let frame = client.seal(heartbeat(2)).unwrap();
    assert_eq!(frame.tag(), tag::ASYMMETRIC_CIPHER);
    assert_eq!(hub.open(frame).unwrap(), heartbeat(2));
    assert!(hub.received_secure());

    hub.accept_secret_key(&secret).unwrap();
    assert_eq!(hub.state(), SecurityState::Symmetric);

    // acceptance travels sealed with the secret key
    let frame = hub.seal(heartbeat(3)).unwrap();
    assert_eq!(frame.tag(), tag::SYMMETRIC_CIPHER);
    assert_eq!(client.open(frame).unwrap(), heartbeat(3));

    client.confirm_secret_key().unwrap();
    assert_eq!(client.state(), SecurityState::Symmetric);

    let frame = client.seal(heartbeat(4)).unwrap();
    assert_eq!(frame.tag(), tag::SYMMETRIC_CIPHER);
    assert_eq!(hub.open(frame).unwrap(), heartbeat(4));
}

#[test]
fn test_unsecure_secret_key_leaves_strategy_unchanged() {
    let mut hub = CryptoChannel::with_rsa_bits(TEST_BITS);
    let mut client = CryptoChannel::with_rsa_bits(TEST_BITS);

    let der = hub.offer_public_key().unwrap();
    let secret = client.adopt_public_key(&der).unwrap();

    // secret key arrives in plain
    hub.open(heartbeat(1)).unwrap();
    assert!(!hub.received_secure());

    match hub.accept_secret_key(&secret) {
        Err(Error::Encryption(reason)) => assert_eq!(reason, "unsecure request"),
        other => panic!("Expected encryption error, got {:?}", other),
    }
    assert_eq!(hub.state(), SecurityState::AsymmetricPending);
    assert_eq!(hub.seal(heartbeat(2)).unwrap().tag(), tag::REQUEST);
}

#[test]
fn test_plain_frame_after_symmetric_is_rejected() {
    let mut hub = CryptoChannel::with_rsa_bits(TEST_BITS);
    let mut client = CryptoChannel::with_rsa_bits(TEST_BITS);

    let der = hub.offer_public_key().unwrap();
    let secret = client.adopt_public_key(&der).unwrap();
    hub.open(client.seal(heartbeat(1)).unwrap()).unwrap();
    hub.accept_secret_key(&secret).unwrap();

    assert!(matches!(hub.open(heartbeat(2)), Err(Error::Encryption(_))));
}

#[test]
fn test_confirm_without_shared_key() {
    let mut client = CryptoChannel::with_rsa_bits(TEST_BITS);
    assert!(client.confirm_secret_key().is_err());
    assert_eq!(client.state(), SecurityState::PlainText);
}

fn negotiated() -> (CryptoChannel, CryptoChannel) {
    let mut hub = CryptoChannel::with_rsa_bits(TEST_BITS);
    let mut client = CryptoChannel::with_rsa_bits(TEST_BITS);

    let der = hub.offer_public_key().unwrap();
    let secret = client.adopt_public_key(&der).unwrap();
    hub.open(client.seal(heartbeat(1)).unwrap()).unwrap();
    hub.accept_secret_key(&secret).unwrap();
    client.open(hub.seal(heartbeat(2)).unwrap()).unwrap();
    client.confirm_secret_key().unwrap();
    (hub, client)
}

#[test]
fn test_public_key_not_reoffered_after_handshake() {
    let (mut hub, mut client) = negotiated();

    // the repeated request arrives sealed, so it passes `open`
    hub.open(client.seal(heartbeat(3)).unwrap()).unwrap();
    match hub.offer_public_key() {
        Err(Error::Encryption(reason)) => assert_eq!(reason, "already negotiated"),
        other => panic!("Expected encryption error, got {:?}", other),
    }
    assert_eq!(hub.state(), SecurityState::Symmetric);

    // plain frames stay refused
    assert!(matches!(hub.open(heartbeat(4)), Err(Error::Encryption(_))));

    let pair = KeyPair::generate(TEST_BITS).unwrap();
    assert!(hub.install_key_pair(pair).is_err());
    assert_eq!(hub.state(), SecurityState::Symmetric);
    assert!(client.adopt_public_key(&[0u8; 4]).is_err());
    assert_eq!(client.state(), SecurityState::Symmetric);
}

#[test]
fn test_second_offer_while_pending_is_refused() {
    let mut hub = CryptoChannel::with_rsa_bits(TEST_BITS);
    hub.offer_public_key().unwrap();
    assert!(hub.offer_public_key().is_err());
    assert_eq!(hub.state(), SecurityState::AsymmetricPending);
}

#[test]
fn test_installed_key_pair_drives_handshake() {
    let mut hub = CryptoChannel::with_rsa_bits(TEST_BITS);
    let mut client = CryptoChannel::with_rsa_bits(TEST_BITS);

    let pair = KeyPair::generate(hub.rsa_bits()).unwrap();
    let der = hub.install_key_pair(pair).unwrap();
    assert_eq!(hub.state(), SecurityState::AsymmetricPending);

    let secret = client.adopt_public_key(&der).unwrap();
    assert_eq!(hub.open(client.seal(heartbeat(1)).unwrap()).unwrap(), heartbeat(1));
    hub.accept_secret_key(&secret).unwrap();
    assert_eq!(hub.state(), SecurityState::Symmetric);
}
