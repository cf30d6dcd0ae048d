//! Symmetric and asymmetric primitives used by the keyring, plus a few helpers
//! (randomness, content hashing, password scoring) shared across the crate.

pub mod envelope;
pub mod message_box;
pub mod password;

pub use envelope::{decrypt, encrypt, EncryptedVault, EnvelopeOptions, KdfAlgorithm, KdfParams};
pub use message_box::{MessageBoxKeyPair, MessageBoxRequest, MessageEnvelope};
pub use password::password_strength;

use rand::Rng as _;
use sha2::{Digest as _, Sha256};

/// Fill `buf` from the thread-local CSPRNG (OS-seeded).
pub fn fill_random(buf: &mut [u8]) {
    let mut rng = rand::rng();
    rng.fill_bytes(buf);
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut out = vec![0_u8; len];
    fill_random(&mut out);
    out
}

pub fn random_array<const N: usize>() -> [u8; N] {
    let mut out = [0_u8; N];
    fill_random(&mut out);
    out
}

/// SHA-256 digest of `data`.
pub fn content_hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn content_hash_hex(data: &[u8]) -> String {
    hex::encode(content_hash(data))
}
