//! Per-chain digest rules for message and transaction signing.

use crate::{
    derive::{secp256k1::keccak256, KeyPair, SignatureScheme},
    errors::Result,
};
use sha2::{Digest as _, Sha256};

const EIP191_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n";
const BITCOIN_MESSAGE_MAGIC: &[u8] = b"Bitcoin Signed Message:\n";

/// Offset added to the recovery id of EIP-191 personal-message signatures.
const EIP191_V_OFFSET: u8 = 27;

/// `keccak256("\x19Ethereum Signed Message:\n" + len(message) + message)`.
pub fn eip191_hash(message: &[u8]) -> [u8; 32] {
    let len = message.len().to_string();
    let mut buf = Vec::with_capacity(EIP191_PREFIX.len() + len.len() + message.len());
    buf.extend_from_slice(EIP191_PREFIX);
    buf.extend_from_slice(len.as_bytes());
    buf.extend_from_slice(message);
    keccak256(&buf)
}

pub fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// Bitcoin `CompactSize` length prefix.
fn push_varint(buf: &mut Vec<u8>, n: u64) {
    if let Some(b) = u8::try_from(n).ok().filter(|b| *b < 0xfd) {
        buf.push(b);
    } else if let Ok(v) = u16::try_from(n) {
        buf.push(0xfd);
        buf.extend_from_slice(&v.to_le_bytes());
    } else if let Ok(v) = u32::try_from(n) {
        buf.push(0xfe);
        buf.extend_from_slice(&v.to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

pub fn bitcoin_message_hash(message: &[u8]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(BITCOIN_MESSAGE_MAGIC.len() + message.len() + 10);
    push_varint(&mut buf, BITCOIN_MESSAGE_MAGIC.len() as u64);
    buf.extend_from_slice(BITCOIN_MESSAGE_MAGIC);
    push_varint(&mut buf, message.len() as u64);
    buf.extend_from_slice(message);
    sha256d(&buf)
}

pub fn sign_message(key: &KeyPair, payload: &[u8]) -> Result<Vec<u8>> {
    match key.chain_type.scheme() {
        SignatureScheme::Ed25519 => key.sign_raw(payload),
        SignatureScheme::Secp256k1 if key.chain_type.is_evm() => {
            key.sign_prehash(&eip191_hash(payload), EIP191_V_OFFSET)
        }
        SignatureScheme::Secp256k1 => key.sign_prehash(&bitcoin_message_hash(payload), 0),
    }
}

/// Signs already-serialized transaction bytes. Construction and broadcast are the caller's job.
pub fn sign_transaction(key: &KeyPair, payload: &[u8]) -> Result<Vec<u8>> {
    match key.chain_type.scheme() {
        SignatureScheme::Ed25519 => key.sign_raw(payload),
        SignatureScheme::Secp256k1 if key.chain_type.is_evm() => {
            key.sign_prehash(&keccak256(payload), 0)
        }
        SignatureScheme::Secp256k1 => key.sign_prehash(&sha256d(payload), 0),
    }
}
