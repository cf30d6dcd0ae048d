use crate::derive::ChainType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Broad grouping used by callers to decide how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad input. Never retried.
    Validation,
    /// Password or ciphertext did not verify. Never retried.
    Authentication,
    /// Recoverable by the caller (unlock, create an account, ...).
    State,
    Network,
    Internal,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CofferError {
    #[error("invalid mnemonic")]
    InvalidMnemonic,

    #[error("unsupported mnemonic strength: {0} bits")]
    InvalidMnemonicStrength(u32),

    #[error("password too weak (score {score}, need {required})")]
    WeakPassword { score: u8, required: u8 },

    #[error("unsupported seed length: {0} bytes")]
    InvalidSeedLength(usize),

    #[error("derivation index out of range: {0}")]
    DerivationOverflow(u64),

    #[error("invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("invalid password")]
    InvalidPassword,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("authentication tag required")]
    AuthTagRequired,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("keyring locked")]
    KeyringLocked,

    #[error("keyring not initialized")]
    NotInitialized,

    #[error("keyring already initialized")]
    AlreadyInitialized,

    #[error("no account for chain: {0}")]
    NoAccountForChain(ChainType),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("backup does not match derived account {account}")]
    BackupMismatch { account: String },

    #[error("invalid backup")]
    InvalidBackup,

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("crypto failure: {0}")]
    Crypto(&'static str),
}

pub type Result<T, E = CofferError> = std::result::Result<T, E>;

impl CofferError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidMnemonic => "invalid_mnemonic",
            Self::InvalidMnemonicStrength(_) => "invalid_mnemonic_strength",
            Self::WeakPassword { .. } => "weak_password",
            Self::InvalidSeedLength(_) => "invalid_seed_length",
            Self::DerivationOverflow(_) => "derivation_overflow",
            Self::InvalidDerivationPath(_) => "invalid_derivation_path",
            Self::UnknownChain(_) => "unknown_chain",
            Self::InvalidPassword => "invalid_password",
            Self::DecryptionFailed => "decryption_failed",
            Self::AuthTagRequired => "auth_tag_required",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::UnsupportedVersion(_) => "unsupported_version",
            Self::InvalidKey(_) => "invalid_key",
            Self::KeyringLocked => "keyring_locked",
            Self::NotInitialized => "not_initialized",
            Self::AlreadyInitialized => "already_initialized",
            Self::NoAccountForChain(_) => "no_account_for_chain",
            Self::AccountNotFound(_) => "account_not_found",
            Self::BackupMismatch { .. } => "backup_mismatch",
            Self::InvalidBackup => "invalid_backup",
            Self::NetworkUnavailable(_) => "network_unavailable",
            Self::UnknownNetwork(_) => "unknown_network",
            Self::Crypto(_) => "crypto_failure",
        }
    }

    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidMnemonic
            | Self::InvalidMnemonicStrength(_)
            | Self::WeakPassword { .. }
            | Self::InvalidSeedLength(_)
            | Self::DerivationOverflow(_)
            | Self::InvalidDerivationPath(_)
            | Self::UnknownChain(_) => ErrorCategory::Validation,
            Self::InvalidPassword
            | Self::DecryptionFailed
            | Self::AuthTagRequired
            | Self::UnsupportedAlgorithm(_)
            | Self::UnsupportedVersion(_)
            | Self::InvalidKey(_) => ErrorCategory::Authentication,
            Self::KeyringLocked
            | Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::NoAccountForChain(_)
            | Self::AccountNotFound(_)
            | Self::BackupMismatch { .. }
            | Self::InvalidBackup => ErrorCategory::State,
            Self::NetworkUnavailable(_) | Self::UnknownNetwork(_) => ErrorCategory::Network,
            Self::Crypto(_) => ErrorCategory::Internal,
        }
    }
}

/// A structured error suitable for printing as CLI output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub data: Value,
}

impl From<&CofferError> for ErrorReport {
    fn from(e: &CofferError) -> Self {
        let data = match e {
            CofferError::WeakPassword { score, required } => {
                serde_json::json!({ "score": score, "required": required })
            }
            CofferError::NoAccountForChain(chain) => serde_json::json!({ "chain": chain }),
            CofferError::BackupMismatch { account } => serde_json::json!({ "account": account }),
            _ => Value::Null,
        };
        Self {
            code: e.code().to_owned(),
            category: e.category(),
            message: e.to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_share_a_category() {
        for e in [
            CofferError::InvalidPassword,
            CofferError::DecryptionFailed,
            CofferError::AuthTagRequired,
        ] {
            assert_eq!(e.category(), ErrorCategory::Authentication, "{e}");
        }
    }

    #[test]
    fn report_carries_code_and_data() {
        let r = ErrorReport::from(&CofferError::WeakPassword {
            score: 12,
            required: 50,
        });
        assert_eq!(r.code, "weak_password");
        assert_eq!(r.category, ErrorCategory::Validation);
        assert_eq!(
            r.data.get("required").and_then(Value::as_u64),
            Some(50),
            "required score travels with the report"
        );
    }

    #[test]
    fn locked_is_a_state_error() {
        assert_eq!(CofferError::KeyringLocked.category(), ErrorCategory::State);
        assert_eq!(CofferError::KeyringLocked.code(), "keyring_locked");
    }
}
