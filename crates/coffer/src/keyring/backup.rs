use super::account::Account;
use crate::{
    crypto::{self, EncryptedVault, EnvelopeOptions},
    errors::{CofferError, Result},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize as _, Zeroizing};

pub const BACKUP_FORMAT: &str = "coffer-backup";
pub const BACKUP_VERSION: u8 = 1;

/// Portable, password-sealed copy of a keyring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    pub format: String,
    pub version: u8,
    pub vault: EncryptedVault,
}

/// Plaintext sealed inside a [`BackupFile`]. The phrase is wiped on drop.
#[derive(Serialize, Deserialize)]
pub(crate) struct BackupPayload {
    pub mnemonic: String,
    pub accounts: Vec<Account>,
}

impl Drop for BackupPayload {
    fn drop(&mut self) {
        self.mnemonic.zeroize();
    }
}

impl BackupFile {
    pub(crate) fn seal(
        payload: &BackupPayload,
        password: &SecretString,
        options: &EnvelopeOptions,
    ) -> Result<Self> {
        let plain = Zeroizing::new(
            serde_json::to_vec(payload).map_err(|_json| CofferError::Crypto("encode backup"))?,
        );
        Ok(Self {
            format: BACKUP_FORMAT.to_owned(),
            version: BACKUP_VERSION,
            vault: crypto::encrypt(&plain, password, Some(options))?,
        })
    }

    pub fn parse(s: &str) -> Result<Self> {
        let file: Self = serde_json::from_str(s).map_err(|_json| CofferError::InvalidBackup)?;
        if file.format != BACKUP_FORMAT {
            return Err(CofferError::InvalidBackup);
        }
        if file.version != BACKUP_VERSION {
            return Err(CofferError::UnsupportedVersion(format!(
                "backup v{}",
                file.version
            )));
        }
        Ok(file)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|_json| CofferError::Crypto("encode backup"))
    }

    /// Open with the backup password. Authentication failures surface as `InvalidPassword`.
    pub(crate) fn open(&self, password: &SecretString) -> Result<BackupPayload> {
        let plain = crypto::decrypt(&self.vault, password).map_err(super::auth_failure)?;
        serde_json::from_slice(&plain).map_err(|_json| CofferError::InvalidBackup)
    }
}
