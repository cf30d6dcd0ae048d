//! Multi-chain wallet core: a password-sealed master secret, per-chain HD key derivation
//! and signing, and resilient execution of chain RPC calls across redundant providers.

pub mod config;
pub mod crypto;
pub mod derive;
pub mod errors;
pub mod fsutil;
pub mod keyring;
pub mod network;
pub mod paths;
pub mod store;

pub use derive::{ChainType, KeyPair, SignatureScheme};
pub use errors::{CofferError, ErrorCategory, ErrorReport, Result};
pub use keyring::{Account, Keyring, KeyringConfig, KeyringState};
