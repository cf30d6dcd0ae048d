//! Public-key encryption of short string payloads between two key holders.
//!
//! Each call generates an ephemeral X25519 key, agrees a shared secret with the
//! recipient's public key, stretches it through HKDF-SHA256 and seals the payload with
//! XChaCha20-Poly1305 under a random 24-byte nonce. Not used for master-secret storage.

use crate::errors::{CofferError, Result};
use base64::Engine as _;
use chacha20poly1305::{
    aead::{Aead as _, KeyInit as _},
    Key, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

pub const VERSION_X25519_XCHACHA20: &str = "x25519-xchacha20-poly1305";

const HKDF_INFO: &[u8] = b"coffer-message-box:v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub version: String,
    pub nonce: String,
    pub ephem_public_key: String,
    pub ciphertext: String,
}

#[derive(Debug, Clone)]
pub struct MessageBoxRequest<'a> {
    /// Recipient X25519 public key, base64.
    pub public_key: &'a str,
    pub data: &'a str,
    pub version: &'a str,
}

/// A long-lived X25519 key pair for receiving boxes.
pub struct MessageBoxKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for MessageBoxKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBoxKeyPair")
            .field("public", &self.public_key_b64())
            .finish_non_exhaustive()
    }
}

impl MessageBoxKeyPair {
    pub fn generate() -> Self {
        let bytes = Zeroizing::new(super::random_array::<32>());
        Self::from_secret_bytes(*bytes)
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_b64(s: &str) -> Result<Self> {
        let raw = Zeroizing::new(decode_key(s, "private key")?);
        Ok(Self::from_secret_bytes(*raw))
    }

    pub fn public_key_b64(&self) -> String {
        b64().encode(self.public.as_bytes())
    }

    pub fn secret_key_b64(&self) -> Zeroizing<String> {
        Zeroizing::new(b64().encode(self.secret.as_bytes()))
    }
}

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

fn decode_key(s: &str, what: &'static str) -> Result<[u8; 32]> {
    let raw = Zeroizing::new(
        b64()
            .decode(s.trim())
            .map_err(|_b64| CofferError::InvalidKey(format!("{what} is not base64")))?,
    );
    <[u8; 32]>::try_from(raw.as_slice())
        .map_err(|_len| CofferError::InvalidKey(format!("{what} must be 32 bytes")))
}

fn box_key(shared: &[u8; 32], ephemeral: &PublicKey, recipient: &PublicKey) -> Result<Zeroizing<[u8; 32]>> {
    let mut salt = [0_u8; 64];
    let (left, right) = salt.split_at_mut(32);
    left.copy_from_slice(ephemeral.as_bytes());
    right.copy_from_slice(recipient.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut out = Zeroizing::new([0_u8; 32]);
    hk.expand(HKDF_INFO, out.as_mut_slice())
        .map_err(|_hkdf| CofferError::Crypto("hkdf expand"))?;
    Ok(out)
}

fn check_version(version: &str) -> Result<()> {
    if version == VERSION_X25519_XCHACHA20 {
        Ok(())
    } else {
        Err(CofferError::UnsupportedVersion(version.to_owned()))
    }
}

pub fn encrypt(req: &MessageBoxRequest<'_>) -> Result<MessageEnvelope> {
    check_version(req.version)?;
    let recipient = PublicKey::from(decode_key(req.public_key, "public key")?);

    let ephemeral = StaticSecret::from(*Zeroizing::new(super::random_array::<32>()));
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient);
    if !shared.was_contributory() {
        return Err(CofferError::InvalidKey("low-order public key".to_owned()));
    }
    let key = box_key(shared.as_bytes(), &ephemeral_public, &recipient)?;

    let nonce = super::random_array::<24>();
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), req.data.as_bytes())
        .map_err(|_aead| CofferError::Crypto("xchacha20 encrypt"))?;

    Ok(MessageEnvelope {
        version: VERSION_X25519_XCHACHA20.to_owned(),
        nonce: b64().encode(nonce),
        ephem_public_key: b64().encode(ephemeral_public.as_bytes()),
        ciphertext: b64().encode(ciphertext),
    })
}

pub fn decrypt(envelope: &MessageEnvelope, recipient: &MessageBoxKeyPair) -> Result<String> {
    check_version(&envelope.version)?;
    let ephemeral_public = PublicKey::from(decode_key(&envelope.ephem_public_key, "ephemeral key")?);
    let nonce = b64()
        .decode(&envelope.nonce)
        .map_err(|_b64| CofferError::DecryptionFailed)?;
    if nonce.len() != 24 {
        return Err(CofferError::DecryptionFailed);
    }
    let ciphertext = b64()
        .decode(&envelope.ciphertext)
        .map_err(|_b64| CofferError::DecryptionFailed)?;

    let shared = recipient.secret.diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(CofferError::DecryptionFailed);
    }
    let key = box_key(shared.as_bytes(), &ephemeral_public, &recipient.public)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let plain = Zeroizing::new(
        cipher
            .decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_aead| CofferError::DecryptionFailed)?,
    );
    String::from_utf8(plain.to_vec()).map_err(|_utf8| CofferError::DecryptionFailed)
}
