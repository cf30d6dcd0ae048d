//! SLIP-0010 derivation for ed25519 chains.
//!
//! Ed25519 has no public-key child derivation, so every path segment must be hardened.
//! Reference: <https://github.com/satoshilabs/slips/blob/master/slip-0010.md>

use super::path::DerivationPath;
use crate::errors::{CofferError, Result};
use ed25519_dalek::SigningKey;
use hmac::{Hmac, Mac as _};
use sha2::Sha512;
use sha3::{Digest as _, Sha3_256};
use zeroize::{Zeroize as _, Zeroizing};

type HmacSha512 = Hmac<Sha512>;

const MASTER_HMAC_KEY: &[u8] = b"ed25519 seed";

/// (key, chain code) pair for one node of the tree.
struct Node {
    key: Zeroizing<[u8; 32]>,
    chain_code: Zeroizing<[u8; 32]>,
}

fn hmac_sha512(key: &[u8], parts: &[&[u8]]) -> Result<Node> {
    let mut mac =
        HmacSha512::new_from_slice(key).map_err(|_len| CofferError::Crypto("hmac-sha512 key"))?;
    for p in parts {
        mac.update(p);
    }
    let mut out = mac.finalize().into_bytes();
    let (left, right) = out.split_at(32);
    let mut node = Node {
        key: Zeroizing::new([0_u8; 32]),
        chain_code: Zeroizing::new([0_u8; 32]),
    };
    node.key.copy_from_slice(left);
    node.chain_code.copy_from_slice(right);
    out.as_mut_slice().zeroize();
    Ok(node)
}

fn master(seed: &[u8]) -> Result<Node> {
    hmac_sha512(MASTER_HMAC_KEY, &[seed])
}

fn hardened_child(parent: &Node, raw_index: u32) -> Result<Node> {
    hmac_sha512(
        parent.chain_code.as_slice(),
        &[&[0_u8], parent.key.as_slice(), &raw_index.to_be_bytes()],
    )
}

/// 32-byte ed25519 secret (the RFC 8032 seed) at `path`.
pub fn derive_secret(seed: &[u8], path: &DerivationPath) -> Result<Zeroizing<[u8; 32]>> {
    if !path.is_fully_hardened() {
        return Err(CofferError::InvalidDerivationPath(format!(
            "{path} (ed25519 requires hardened segments)"
        )));
    }
    let mut node = master(seed)?;
    for child in path.children() {
        node = hardened_child(&node, child.raw())?;
    }
    Ok(node.key)
}

pub fn signing_key(secret: &[u8; 32]) -> SigningKey {
    SigningKey::from_bytes(secret)
}

pub fn solana_address(key: &SigningKey) -> String {
    bs58::encode(key.verifying_key().as_bytes()).into_string()
}

/// Single-signer Aptos authentication key: `sha3-256(pubkey || 0x00)`.
pub fn aptos_address(key: &SigningKey) -> String {
    let mut h = Sha3_256::new();
    h.update(key.verifying_key().as_bytes());
    h.update([0_u8]);
    format!("0x{}", hex::encode(h.finalize()))
}
