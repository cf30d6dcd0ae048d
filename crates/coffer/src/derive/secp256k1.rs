//! BIP-32 derivation and address encodings for secp256k1 chains.

use super::path::{ChildIndex, DerivationPath};
use crate::errors::{CofferError, Result};
use bitcoin::bip32::{ChildNumber, DerivationPath as BtcDerivationPath, Xpriv};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{address::KnownHrp, Address, CompressedPublicKey, Network};
use k256::ecdsa::{RecoveryId, SigningKey};
use sha3::{Digest as _, Keccak256};
use zeroize::Zeroizing;

fn to_child_number(c: ChildIndex) -> Result<ChildNumber> {
    let n = match c {
        ChildIndex::Normal(i) => ChildNumber::from_normal_idx(i),
        ChildIndex::Hardened(i) => ChildNumber::from_hardened_idx(i),
    };
    n.map_err(|_bip32| CofferError::DerivationOverflow(u64::from(c.index())))
}

/// Private key at `path` below the BIP-32 master of `seed`.
pub fn derive_secret(seed: &[u8], path: &DerivationPath) -> Result<Zeroizing<[u8; 32]>> {
    let secp = Secp256k1::new();
    let master =
        Xpriv::new_master(Network::Bitcoin, seed).map_err(|_bip32| CofferError::Crypto("bip32 master key"))?;
    let children = path
        .children()
        .iter()
        .map(|c| to_child_number(*c))
        .collect::<Result<Vec<_>>>()?;
    let child = master
        .derive_priv(&secp, &BtcDerivationPath::from(children))
        .map_err(|_bip32| CofferError::Crypto("bip32 child derivation"))?;
    Ok(Zeroizing::new(child.private_key.secret_bytes()))
}

pub fn signing_key(secret: &[u8]) -> Result<SigningKey> {
    SigningKey::from_slice(secret).map_err(|_ecdsa| CofferError::InvalidKey("secp256k1 secret".to_owned()))
}

/// 33-byte SEC1 compressed public key.
pub fn compressed_public_key(key: &SigningKey) -> Vec<u8> {
    key.verifying_key().to_encoded_point(true).as_bytes().to_vec()
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// EIP-55 mixed-case checksummed address.
pub fn ethereum_address(key: &SigningKey) -> String {
    let point = key.verifying_key().to_encoded_point(false);
    let uncompressed = point.as_bytes();
    let hash = keccak256(uncompressed.get(1..).unwrap_or_default());
    let lower = hex::encode(hash.get(12..).unwrap_or_default());
    to_checksum_address(&lower)
}

fn to_checksum_address(lower_hex: &str) -> String {
    let digest = hex::encode(keccak256(lower_hex.as_bytes()));
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (c, h) in lower_hex.chars().zip(digest.chars()) {
        if c.is_ascii_alphabetic() && h.to_digit(16).unwrap_or(0) >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Native segwit (P2WPKH, bech32) mainnet address.
pub fn bitcoin_p2wpkh_address(key: &SigningKey) -> Result<String> {
    let cpk = CompressedPublicKey::from_slice(&compressed_public_key(key))
        .map_err(|_key| CofferError::InvalidKey("compressed public key".to_owned()))?;
    Ok(Address::p2wpkh(&cpk, KnownHrp::Mainnet).to_string())
}

/// Recoverable ECDSA over a 32-byte prehash: `r || s || v` where `v = recid + v_offset`.
pub fn sign_prehash_recoverable(key: &SigningKey, prehash: &[u8; 32], v_offset: u8) -> Result<Vec<u8>> {
    let (sig, recid): (k256::ecdsa::Signature, RecoveryId) = key
        .sign_prehash_recoverable(prehash)
        .map_err(|_ecdsa| CofferError::Crypto("ecdsa sign"))?;
    let mut out = Vec::with_capacity(65);
    out.extend_from_slice(&sig.to_bytes());
    out.push(recid.to_byte().saturating_add(v_offset));
    Ok(out)
}
