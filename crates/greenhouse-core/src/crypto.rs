//! Frame encryption and the key-exchange state machine
//!
//! A connection starts in plain text. The hub hands out an RSA public key,
//! the client answers with a fresh AES-256 key sealed under it, and from
//! then on both directions use AES-256-GCM.
//!
//! ```text
//! PlainText → AsymmetricPending → SymmetricPending → Symmetric
//! ```
//! Each side tracks its own [`CryptoChannel`] and switches strategies as
//! handshake messages arrive. Sealed frames wrap the complete encoded inner
//! frame:
//! ```text
//! ASYMMETRIC_CIPHER  [k-byte OAEP block]...
//! SYMMETRIC_CIPHER   [12-byte nonce][ciphertext + 16-byte tag]
//! ```

use crate::tlv::{tag, Tlv};
use crate::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fmt;
use tracing::debug;

/// RSA modulus size used for the handshake
pub const DEFAULT_RSA_BITS: usize = 2048;

/// AES-256 key length
pub const SECRET_KEY_LEN: usize = 32;

/// AES-GCM nonce length
pub const NONCE_LEN: usize = 12;

/// OAEP-SHA256 overhead per block: two hash lengths plus two bytes
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

fn crypto_err(e: impl fmt::Display) -> Error {
    Error::Encryption(e.to_string())
}

// ============================================================================
// KEYS
// ============================================================================

/// RSA key pair generated by the hub for one connection
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    pub fn generate(bits: usize) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits).map_err(crypto_err)?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Public key as SubjectPublicKeyInfo DER
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        encode_public_key(&self.public)
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({} bits)", self.public.size() * 8)
    }
}

pub fn encode_public_key(key: &RsaPublicKey) -> Result<Vec<u8>> {
    Ok(key.to_public_key_der().map_err(crypto_err)?.as_bytes().to_vec())
}

pub fn decode_public_key(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der).map_err(crypto_err)
}

/// Symmetric session key
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; SECRET_KEY_LEN]);

impl SecretKey {
    pub fn generate() -> Self {
        let mut key = [0u8; SECRET_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; SECRET_KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::Encryption(format!(
                "secret key must be {} bytes, got {}",
                SECRET_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

// ============================================================================
// SEALING
// ============================================================================

fn seal_asymmetric(key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let block = key.size();
    let capacity = block
        .checked_sub(OAEP_OVERHEAD)
        .filter(|c| *c > 0)
        .ok_or_else(|| Error::Encryption(format!("RSA modulus of {} bytes too small", block)))?;

    let mut out = Vec::with_capacity(plaintext.len().div_ceil(capacity).max(1) * block);
    for chunk in plaintext.chunks(capacity) {
        let sealed = key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), chunk)
            .map_err(crypto_err)?;
        out.extend_from_slice(&sealed);
    }
    Ok(out)
}

fn open_asymmetric(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let block = key.size();
    if ciphertext.is_empty() || ciphertext.len() % block != 0 {
        return Err(Error::Encryption(format!(
            "ciphertext of {} bytes is not a whole number of {}-byte blocks",
            ciphertext.len(),
            block
        )));
    }

    let mut out = Vec::with_capacity(ciphertext.len());
    for chunk in ciphertext.chunks(block) {
        let opened = key
            .decrypt(Oaep::new::<Sha256>(), chunk)
            .map_err(crypto_err)?;
        out.extend_from_slice(&opened);
    }
    Ok(out)
}

fn seal_symmetric(key: &SecretKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(crypto_err)?;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(crypto_err)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn open_symmetric(key: &SecretKey, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(Error::Encryption("symmetric frame shorter than nonce".into()));
    }
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(crypto_err)?;
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(crypto_err)
}

/// How outbound frames are protected
#[derive(Clone)]
pub enum EncryptStrategy {
    PlainText,
    Asymmetric(RsaPublicKey),
    Symmetric(SecretKey),
}

impl EncryptStrategy {
    pub fn seal(&self, frame: Tlv) -> Result<Tlv> {
        match self {
            EncryptStrategy::PlainText => Ok(frame),
            EncryptStrategy::Asymmetric(key) => {
                Tlv::new(tag::ASYMMETRIC_CIPHER, seal_asymmetric(key, &frame.encode())?)
            }
            EncryptStrategy::Symmetric(key) => {
                Tlv::new(tag::SYMMETRIC_CIPHER, seal_symmetric(key, &frame.encode())?)
            }
        }
    }
}

impl fmt::Debug for EncryptStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptStrategy::PlainText => f.write_str("PlainText"),
            EncryptStrategy::Asymmetric(_) => f.write_str("Asymmetric"),
            EncryptStrategy::Symmetric(_) => f.write_str("Symmetric"),
        }
    }
}

/// Keys available for opening inbound frames
#[derive(Clone, Default)]
pub struct Keyring {
    pub private_key: Option<RsaPrivateKey>,
    pub secret_key: Option<SecretKey>,
}

impl Keyring {
    /// Open a frame. Plain frames pass through with `secure == false`.
    pub fn open(&self, frame: Tlv) -> Result<(Tlv, bool)> {
        let plaintext = match frame.tag() {
            tag::ASYMMETRIC_CIPHER => {
                let key = self
                    .private_key
                    .as_ref()
                    .ok_or_else(|| Error::Encryption("no private key for asymmetric frame".into()))?;
                open_asymmetric(key, frame.value())?
            }
            tag::SYMMETRIC_CIPHER => {
                let key = self
                    .secret_key
                    .as_ref()
                    .ok_or_else(|| Error::Encryption("no secret key for symmetric frame".into()))?;
                open_symmetric(key, frame.value())?
            }
            _ => return Ok((frame, false)),
        };
        Ok((Tlv::decode(&plaintext[..])?, true))
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Handshake progress of one side of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityState {
    PlainText,
    /// Hub has published its public key
    AsymmetricPending,
    /// Client has sent its secret key and awaits acceptance
    SymmetricPending,
    Symmetric,
}

/// Per-connection encryption state
#[derive(Debug)]
pub struct CryptoChannel {
    state: SecurityState,
    encrypt: EncryptStrategy,
    keyring: Keyring,
    received_secure: bool,
    rsa_bits: usize,
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyring")
            .field("private_key", &self.private_key.is_some())
            .field("secret_key", &self.secret_key.is_some())
            .finish()
    }
}

impl CryptoChannel {
    pub fn new() -> Self {
        Self::with_rsa_bits(DEFAULT_RSA_BITS)
    }

    pub fn with_rsa_bits(rsa_bits: usize) -> Self {
        Self {
            state: SecurityState::PlainText,
            encrypt: EncryptStrategy::PlainText,
            keyring: Keyring::default(),
            received_secure: false,
            rsa_bits,
        }
    }

    pub fn state(&self) -> SecurityState {
        self.state
    }

    /// Whether the most recently opened frame arrived encrypted
    pub fn received_secure(&self) -> bool {
        self.received_secure
    }

    pub fn seal(&self, frame: Tlv) -> Result<Tlv> {
        self.encrypt.seal(frame)
    }

    /// Open an inbound frame.
    ///
    /// Plain frames are tolerated until this side reaches `Symmetric`, since
    /// the peer may switch strategies slightly earlier or later than we do.
    pub fn open(&mut self, frame: Tlv) -> Result<Tlv> {
        let (inner, secure) = self.keyring.open(frame)?;
        if !secure && self.state == SecurityState::Symmetric {
            return Err(Error::Encryption(format!(
                "plain frame 0x{:04x} on encrypted connection",
                inner.tag()
            )));
        }
        self.received_secure = secure;
        Ok(inner)
    }

    /// Modulus size for key pairs of this connection
    pub fn rsa_bits(&self) -> usize {
        self.rsa_bits
    }

    /// Fails once a handshake has started on this connection
    pub fn ensure_plain(&self) -> Result<()> {
        if self.state != SecurityState::PlainText {
            return Err(Error::Encryption("already negotiated".into()));
        }
        Ok(())
    }

    /// Hub side: generate a key pair and return the public key to publish
    pub fn offer_public_key(&mut self) -> Result<Vec<u8>> {
        self.ensure_plain()?;
        let pair = KeyPair::generate(self.rsa_bits)?;
        self.install_key_pair(pair)
    }

    /// Hub side: keep a pre-generated key pair and return the public key to
    /// publish
    pub fn install_key_pair(&mut self, pair: KeyPair) -> Result<Vec<u8>> {
        self.ensure_plain()?;
        let der = pair.public_key_der()?;
        self.keyring.private_key = Some(pair.private);
        self.state = SecurityState::AsymmetricPending;
        debug!("Offered {}-bit public key", pair.public.size() * 8);
        Ok(der)
    }

    /// Hub side: install the client's secret key.
    ///
    /// Only accepted when the carrying frame arrived encrypted.
    pub fn accept_secret_key(&mut self, key: &[u8]) -> Result<()> {
        if !self.received_secure {
            return Err(Error::Encryption("unsecure request".into()));
        }
        if self.state != SecurityState::AsymmetricPending {
            return Err(Error::Encryption("no public key offered".into()));
        }
        let key = SecretKey::from_bytes(key)?;
        self.encrypt = EncryptStrategy::Symmetric(key.clone());
        self.keyring.secret_key = Some(key);
        self.state = SecurityState::Symmetric;
        Ok(())
    }

    /// Client side: adopt the hub's public key and produce a secret key to share
    pub fn adopt_public_key(&mut self, der: &[u8]) -> Result<Vec<u8>> {
        self.ensure_plain()?;
        let public = decode_public_key(der)?;
        let secret = SecretKey::generate();
        let shared = secret.as_bytes().to_vec();
        self.encrypt = EncryptStrategy::Asymmetric(public);
        self.keyring.secret_key = Some(secret);
        self.state = SecurityState::SymmetricPending;
        Ok(shared)
    }

    /// Client side: the hub accepted our secret key
    pub fn confirm_secret_key(&mut self) -> Result<()> {
        let key = self
            .keyring
            .secret_key
            .clone()
            .ok_or_else(|| Error::Encryption("no secret key was shared".into()))?;
        self.encrypt = EncryptStrategy::Symmetric(key);
        self.state = SecurityState::Symmetric;
        Ok(())
    }
}

impl Default for CryptoChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BITS: usize = 1024;

    fn frame(len: usize) -> Tlv {
        Tlv::new(tag::STRING, vec![b'x'; len]).unwrap()
    }

    #[test]
    fn test_symmetric_roundtrip() {
        let key = SecretKey::generate();
        let sealed = EncryptStrategy::Symmetric(key.clone()).seal(frame(40)).unwrap();
        assert_eq!(sealed.tag(), tag::SYMMETRIC_CIPHER);

        let keyring = Keyring {
            private_key: None,
            secret_key: Some(key),
        };
        let (opened, secure) = keyring.open(sealed).unwrap();
        assert!(secure);
        assert_eq!(opened, frame(40));
    }

    #[test]
    fn test_asymmetric_chunks_large_frames() {
        let pair = KeyPair::generate(TEST_BITS).unwrap();
        let block = pair.public.size();
        let sealed = EncryptStrategy::Asymmetric(pair.public.clone())
            .seal(frame(500))
            .unwrap();
        assert_eq!(sealed.len() % block, 0);
        assert!(sealed.len() / block > 1);

        let keyring = Keyring {
            private_key: Some(pair.private.clone()),
            secret_key: None,
        };
        let (opened, _) = keyring.open(sealed).unwrap();
        assert_eq!(opened, frame(500));
    }

    #[test]
    fn test_cipher_frame_without_key() {
        let sealed = EncryptStrategy::Symmetric(SecretKey::generate())
            .seal(frame(4))
            .unwrap();
        assert!(matches!(
            Keyring::default().open(sealed),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn test_unsecure_secret_key_rejected() {
        let mut hub = CryptoChannel::with_rsa_bits(TEST_BITS);
        hub.offer_public_key().unwrap();
        hub.open(frame(1)).unwrap();

        let key = SecretKey::generate();
        assert!(hub.accept_secret_key(key.as_bytes()).is_err());
        assert_eq!(hub.state(), SecurityState::AsymmetricPending);
    }

    #[test]
    fn test_secret_key_length_checked() {
        assert!(SecretKey::from_bytes(&[0u8; 16]).is_err());
        assert!(SecretKey::from_bytes(&[0u8; SECRET_KEY_LEN]).is_ok());
    }
}
