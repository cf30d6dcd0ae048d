//! Hierarchical key derivation.
//!
//! A single BIP-39 seed fans out into per-chain key pairs. Secp256k1 chains use BIP-32,
//! ed25519 chains use SLIP-0010; both are pure functions of `(seed, path)`.

pub mod ed25519;
pub mod mnemonic;
pub mod path;
pub mod secp256k1;

pub use mnemonic::{mnemonic_to_seed, validate_mnemonic, MasterSecret, DEFAULT_STRENGTH};
pub use path::{ChildIndex, DerivationPath, HARDENED_OFFSET};

use crate::errors::{CofferError, Result};
use ed25519_dalek::Signer as _;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Ethereum,
    Polygon,
    Bitcoin,
    Solana,
    Aptos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    Secp256k1,
    Ed25519,
}

impl ChainType {
    pub const ALL: [Self; 5] = [
        Self::Ethereum,
        Self::Polygon,
        Self::Bitcoin,
        Self::Solana,
        Self::Aptos,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Polygon => "polygon",
            Self::Bitcoin => "bitcoin",
            Self::Solana => "solana",
            Self::Aptos => "aptos",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Ethereum => "Ethereum",
            Self::Polygon => "Polygon",
            Self::Bitcoin => "Bitcoin",
            Self::Solana => "Solana",
            Self::Aptos => "Aptos",
        }
    }

    /// SLIP-0044 coin type. Polygon shares Ethereum's key tree.
    pub const fn coin_type(self) -> u32 {
        match self {
            Self::Ethereum | Self::Polygon => 60,
            Self::Bitcoin => 0,
            Self::Solana => 501,
            Self::Aptos => 637,
        }
    }

    pub const fn scheme(self) -> SignatureScheme {
        match self {
            Self::Ethereum | Self::Polygon | Self::Bitcoin => SignatureScheme::Secp256k1,
            Self::Solana | Self::Aptos => SignatureScheme::Ed25519,
        }
    }

    pub const fn is_evm(self) -> bool {
        matches!(self, Self::Ethereum | Self::Polygon)
    }

    /// Standard account path for `index` on this chain.
    pub fn default_path(self, index: u32) -> Result<DerivationPath> {
        let h = ChildIndex::hardened;
        let n = ChildIndex::normal;
        let coin = self.coin_type();
        let children = match self {
            Self::Ethereum | Self::Polygon => vec![h(44)?, h(coin)?, h(0)?, n(0)?, n(index)?],
            Self::Bitcoin => vec![h(84)?, h(coin)?, h(0)?, n(0)?, n(index)?],
            Self::Solana => vec![h(44)?, h(coin)?, h(index)?, h(0)?],
            Self::Aptos => vec![h(44)?, h(coin)?, h(index)?, h(0)?, h(0)?],
        };
        Ok(DerivationPath::new(children))
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainType {
    type Err = CofferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Self::Ethereum),
            "polygon" | "matic" => Ok(Self::Polygon),
            "bitcoin" | "btc" => Ok(Self::Bitcoin),
            "solana" | "sol" => Ok(Self::Solana),
            "aptos" | "apt" => Ok(Self::Aptos),
            _ => Err(CofferError::UnknownChain(s.to_owned())),
        }
    }
}

/// Derived key material for one account.
///
/// The private key is zeroized on drop and never shown by `Debug`.
pub struct KeyPair {
    private_key: Zeroizing<Vec<u8>>,
    pub public_key: Vec<u8>,
    pub address: String,
    pub derivation_path: DerivationPath,
    pub chain_type: ChainType,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &hex::encode(&self.public_key))
            .field("address", &self.address)
            .field("derivation_path", &self.derivation_path.to_string())
            .field("chain_type", &self.chain_type)
            .finish()
    }
}

impl KeyPair {
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key)
    }

    /// Recoverable secp256k1 signature (`r || s || v`) over a 32-byte digest.
    pub fn sign_prehash(&self, digest: &[u8; 32], v_offset: u8) -> Result<Vec<u8>> {
        if self.chain_type.scheme() != SignatureScheme::Secp256k1 {
            return Err(CofferError::InvalidKey(format!(
                "{} keys do not sign digests",
                self.chain_type
            )));
        }
        let key = secp256k1::signing_key(&self.private_key)?;
        secp256k1::sign_prehash_recoverable(&key, digest, v_offset)
    }

    /// Ed25519 signature over the raw message bytes.
    pub fn sign_raw(&self, message: &[u8]) -> Result<Vec<u8>> {
        if self.chain_type.scheme() != SignatureScheme::Ed25519 {
            return Err(CofferError::InvalidKey(format!(
                "{} keys do not sign raw messages",
                self.chain_type
            )));
        }
        let secret = Zeroizing::new(
            <[u8; 32]>::try_from(self.private_key.as_slice())
                .map_err(|_len| CofferError::InvalidKey("ed25519 secret".to_owned()))?,
        );
        let key = ed25519::signing_key(&secret);
        Ok(key.sign(message).to_bytes().to_vec())
    }
}

fn check_seed(seed: &[u8]) -> Result<()> {
    if !(16..=64).contains(&seed.len()) {
        return Err(CofferError::InvalidSeedLength(seed.len()));
    }
    Ok(())
}

/// Derive the key pair for account `index` on `chain` along the chain's standard path.
pub fn derive_key_pair(seed: &[u8], chain: ChainType, index: u32) -> Result<KeyPair> {
    let path = chain.default_path(index)?;
    derive_at_path(seed, &path, chain)
}

pub fn derive_at_path(seed: &[u8], path: &DerivationPath, chain: ChainType) -> Result<KeyPair> {
    check_seed(seed)?;
    let pair = match chain.scheme() {
        SignatureScheme::Secp256k1 => {
            let secret = secp256k1::derive_secret(seed, path)?;
            let key = secp256k1::signing_key(secret.as_slice())?;
            let address = if chain == ChainType::Bitcoin {
                secp256k1::bitcoin_p2wpkh_address(&key)?
            } else {
                secp256k1::ethereum_address(&key)
            };
            KeyPair {
                private_key: Zeroizing::new(secret.to_vec()),
                public_key: secp256k1::compressed_public_key(&key),
                address,
                derivation_path: path.clone(),
                chain_type: chain,
            }
        }
        SignatureScheme::Ed25519 => {
            let secret = ed25519::derive_secret(seed, path)?;
            let key = ed25519::signing_key(&secret);
            let address = if chain == ChainType::Aptos {
                ed25519::aptos_address(&key)
            } else {
                ed25519::solana_address(&key)
            };
            KeyPair {
                private_key: Zeroizing::new(secret.to_vec()),
                public_key: key.verifying_key().as_bytes().to_vec(),
                address,
                derivation_path: path.clone(),
                chain_type: chain,
            }
        }
    };
    tracing::debug!(chain = %chain, path = %path, address = %pair.address, "derived key pair");
    Ok(pair)
}

/// Fresh mnemonic at `strength_bits` of entropy.
pub fn generate_mnemonic(strength_bits: u32) -> Result<MasterSecret> {
    MasterSecret::generate(strength_bits)
}
