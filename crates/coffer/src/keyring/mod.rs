//! The keyring: sealed master secret, lock lifecycle, accounts and signing.
//!
//! A `Keyring` is shared as `Arc<Keyring>`. Lifecycle transitions serialize on a dedicated
//! mutex so key stretching never runs under the state lock; reads and signing hold the
//! state read lock only long enough to clone an `Arc<KeyPair>`.

pub mod account;
pub mod backup;
pub mod sign;

pub use account::{parse_account_id, Account, AccountTable};
pub use backup::{BackupFile, BACKUP_FORMAT, BACKUP_VERSION};

use crate::{
    crypto::{self, password_strength, EncryptedVault, EnvelopeOptions},
    derive::{self, ChainType, KeyPair, MasterSecret, DEFAULT_STRENGTH},
    errors::{CofferError, Result},
};
use backup::BackupPayload;
use chrono::Utc;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SNAPSHOT_VERSION: u8 = 1;
pub const DEFAULT_MIN_PASSWORD_SCORE: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyringConfig {
    pub envelope: EnvelopeOptions,
    pub mnemonic_strength: u32,
    pub min_password_score: u8,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            envelope: EnvelopeOptions::default(),
            mnemonic_strength: DEFAULT_STRENGTH,
            min_password_score: DEFAULT_MIN_PASSWORD_SCORE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyringState {
    pub is_initialized: bool,
    pub is_locked: bool,
}

/// Persisted form of a keyring. Accounts carry public data only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyringSnapshot {
    pub version: u8,
    pub vault: EncryptedVault,
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub active_accounts: BTreeMap<ChainType, Uuid>,
}

/// Unlocked material. Dropping it wipes the seed and every cached private key.
struct Session {
    master: MasterSecret,
    keys: HashMap<(ChainType, u32), Arc<KeyPair>>,
}

impl Session {
    fn new(master: MasterSecret) -> Self {
        Self {
            master,
            keys: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct Inner {
    vault: Option<EncryptedVault>,
    accounts: AccountTable,
    session: Option<Session>,
}

impl Inner {
    fn session(&self) -> Result<&Session> {
        if self.vault.is_none() {
            return Err(CofferError::NotInitialized);
        }
        self.session.as_ref().ok_or(CofferError::KeyringLocked)
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        if self.vault.is_none() {
            return Err(CofferError::NotInitialized);
        }
        self.session.as_mut().ok_or(CofferError::KeyringLocked)
    }
}

pub struct Keyring {
    cfg: KeyringConfig,
    transition: Mutex<()>,
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Wrong password and a corrupted vault look the same from outside the keyring.
pub(crate) fn auth_failure(e: CofferError) -> CofferError {
    match e {
        CofferError::DecryptionFailed | CofferError::AuthTagRequired => {
            CofferError::InvalidPassword
        }
        other => other,
    }
}

impl Keyring {
    pub fn new(cfg: KeyringConfig) -> Self {
        Self {
            cfg,
            transition: Mutex::new(()),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Load a persisted keyring. It starts locked.
    pub fn from_snapshot(cfg: KeyringConfig, snapshot: KeyringSnapshot) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CofferError::UnsupportedVersion(format!(
                "keyring v{}",
                snapshot.version
            )));
        }
        let accounts = AccountTable::from_parts(snapshot.accounts, snapshot.active_accounts);
        Ok(Self {
            cfg,
            transition: Mutex::new(()),
            inner: RwLock::new(Inner {
                vault: Some(snapshot.vault),
                accounts,
                session: None,
            }),
        })
    }

    pub fn snapshot(&self) -> Result<KeyringSnapshot> {
        let inner = self.read();
        let vault = inner.vault.clone().ok_or(CofferError::NotInitialized)?;
        let (accounts, active_accounts) = inner.accounts.clone().into_parts();
        Ok(KeyringSnapshot {
            version: SNAPSHOT_VERSION,
            vault,
            accounts,
            active_accounts,
        })
    }

    pub const fn config(&self) -> &KeyringConfig {
        &self.cfg
    }

    pub fn state(&self) -> KeyringState {
        let inner = self.read();
        KeyringState {
            is_initialized: inner.vault.is_some(),
            is_locked: inner.session.is_none(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_password(&self, password: &SecretString) -> Result<()> {
        let score = password_strength(password.expose_secret());
        if score < self.cfg.min_password_score {
            return Err(CofferError::WeakPassword {
                score,
                required: self.cfg.min_password_score,
            });
        }
        Ok(())
    }

    fn seal(&self, master: &MasterSecret, password: &SecretString) -> Result<EncryptedVault> {
        crypto::encrypt(master.phrase().as_bytes(), password, Some(&self.cfg.envelope))
    }

    fn open(vault: &EncryptedVault, password: &SecretString) -> Result<MasterSecret> {
        let plain = crypto::decrypt(vault, password).map_err(auth_failure)?;
        let phrase = std::str::from_utf8(&plain).map_err(|_utf8| CofferError::InvalidPassword)?;
        MasterSecret::from_phrase(phrase).map_err(|_mnemonic| CofferError::InvalidPassword)
    }

    fn current_vault(&self) -> Result<EncryptedVault> {
        self.read().vault.clone().ok_or(CofferError::NotInitialized)
    }

    /// Create the keyring from an imported phrase, or a fresh one when `mnemonic` is `None`.
    /// Returns the phrase so the caller can show it once.
    pub fn initialize(
        &self,
        mnemonic: Option<&SecretString>,
        password: &SecretString,
    ) -> Result<SecretString> {
        let _transition = self.begin_transition();
        if self.read().vault.is_some() {
            return Err(CofferError::AlreadyInitialized);
        }
        self.check_password(password)?;
        let master = match mnemonic {
            Some(phrase) => MasterSecret::from_phrase(phrase.expose_secret())?,
            None => derive::generate_mnemonic(self.cfg.mnemonic_strength)?,
        };
        let vault = self.seal(&master, password)?;
        let phrase = SecretString::new(master.phrase().to_owned().into());
        let words = master.word_count();

        let mut inner = self.write();
        *inner = Inner {
            vault: Some(vault),
            accounts: AccountTable::default(),
            session: Some(Session::new(master)),
        };
        info!(words, imported = mnemonic.is_some(), "keyring initialized");
        Ok(phrase)
    }

    pub fn unlock(&self, password: &SecretString) -> Result<()> {
        let _transition = self.begin_transition();
        let vault = self.current_vault()?;
        let master = match Self::open(&vault, password) {
            Ok(m) => m,
            Err(e) => {
                warn!(code = e.code(), "unlock rejected");
                return Err(e);
            }
        };
        let mut inner = self.write();
        if inner.session.is_none() {
            inner.session = Some(Session::new(master));
            info!(accounts = inner.accounts.len(), "keyring unlocked");
        }
        Ok(())
    }

    pub fn lock(&self) {
        let _transition = self.begin_transition();
        let mut inner = self.write();
        if inner.session.take().is_some() {
            info!("keyring locked");
        }
    }

    /// Forget everything, including the sealed vault.
    pub fn wipe(&self) {
        let _transition = self.begin_transition();
        *self.write() = Inner::default();
        info!("keyring wiped");
    }

    pub fn create_account(&self, chain: ChainType, name: Option<&str>) -> Result<Account> {
        let mut inner = self.write();
        inner.session()?;
        let index = inner.accounts.next_index(chain)?;
        let session = inner.session_mut()?;
        let pair = derive::derive_key_pair(session.master.seed(), chain, index)?;
        let account = Account {
            id: Uuid::new_v4(),
            name: name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map_or_else(
                    || Account::default_name(chain, index as usize + 1),
                    ToOwned::to_owned,
                ),
            chain_type: chain,
            address: pair.address.clone(),
            derivation_path: pair.derivation_path.clone(),
            index,
            created_at: Utc::now(),
        };
        session.keys.insert((chain, index), Arc::new(pair));
        inner.accounts.push(account.clone());
        info!(chain = %chain, index, address = %account.address, "account created");
        Ok(account)
    }

    pub fn get_accounts(&self, chain: Option<ChainType>) -> Result<Vec<Account>> {
        let inner = self.read();
        inner.session()?;
        Ok(inner.accounts.list(chain))
    }

    pub fn set_active_account(&self, id: &str) -> Result<Account> {
        let id = parse_account_id(id)?;
        let mut inner = self.write();
        inner.session()?;
        let account = inner.accounts.set_active(&id)?;
        info!(chain = %account.chain_type, index = account.index, "active account changed");
        Ok(account)
    }

    pub fn rename_account(&self, id: &str, name: &str) -> Result<Account> {
        let id = parse_account_id(id)?;
        let mut inner = self.write();
        inner.session()?;
        inner.accounts.rename(&id, name)
    }

    /// Key pair of the chain's active account, from the session cache when possible.
    fn active_key(&self, chain: ChainType) -> Result<Arc<KeyPair>> {
        let index = {
            let inner = self.read();
            let session = inner.session()?;
            let account = inner
                .accounts
                .active_for(chain)
                .ok_or(CofferError::NoAccountForChain(chain))?;
            if let Some(pair) = session.keys.get(&(chain, account.index)) {
                debug!(chain = %chain, index = account.index, "key cache hit");
                return Ok(Arc::clone(pair));
            }
            account.index
        };

        let mut inner = self.write();
        let session = inner.session_mut()?;
        if let Some(pair) = session.keys.get(&(chain, index)) {
            return Ok(Arc::clone(pair));
        }
        let pair = Arc::new(derive::derive_key_pair(session.master.seed(), chain, index)?);
        session.keys.insert((chain, index), Arc::clone(&pair));
        Ok(pair)
    }

    pub fn sign_message(&self, payload: &[u8], chain: ChainType) -> Result<Vec<u8>> {
        let pair = self.active_key(chain)?;
        let sig = sign::sign_message(&pair, payload)?;
        debug!(chain = %chain, len = payload.len(), "message signed");
        Ok(sig)
    }

    pub fn sign_transaction(&self, payload: &[u8], chain: ChainType) -> Result<Vec<u8>> {
        let pair = self.active_key(chain)?;
        let sig = sign::sign_transaction(&pair, payload)?;
        info!(chain = %chain, address = %pair.address, "transaction signed");
        Ok(sig)
    }

    /// Hex public key of the chain's active account.
    pub fn public_key(&self, chain: ChainType) -> Result<String> {
        Ok(self.active_key(chain)?.public_key_hex())
    }

    /// The only way the phrase leaves the keyring. Re-checks `password` on every call.
    pub fn export_mnemonic(&self, password: &SecretString) -> Result<SecretString> {
        let vault = {
            let inner = self.read();
            inner.session()?;
            inner.vault.clone().ok_or(CofferError::NotInitialized)?
        };
        let master = Self::open(&vault, password)?;
        warn!("mnemonic exported");
        Ok(SecretString::new(master.phrase().to_owned().into()))
    }

    /// Seal the phrase and the account list under `password` (which may differ from
    /// the keyring password).
    pub fn backup(&self, password: &SecretString) -> Result<String> {
        let payload = {
            let inner = self.read();
            let session = inner.session()?;
            BackupPayload {
                mnemonic: session.master.phrase().to_owned(),
                accounts: inner.accounts.list(None),
            }
        };
        let file = BackupFile::seal(&payload, password, &self.cfg.envelope)?;
        info!(accounts = payload.accounts.len(), "backup created");
        file.to_json()
    }

    /// Replace the keyring with the contents of a backup. Every recorded account is
    /// re-derived and must match its recorded address.
    pub fn restore(&self, serialized: &str, password: &SecretString) -> Result<()> {
        let _transition = self.begin_transition();
        let file = BackupFile::parse(serialized)?;
        let payload = file.open(password)?;
        let master =
            MasterSecret::from_phrase(&payload.mnemonic).map_err(|_mnemonic| CofferError::InvalidBackup)?;

        let mut session = Session::new(master);
        let mut accounts = AccountTable::default();
        for account in &payload.accounts {
            let expected = account.chain_type.default_path(account.index).ok();
            if expected.as_ref() != Some(&account.derivation_path) {
                warn!(
                    chain = %account.chain_type,
                    index = account.index,
                    "backup path does not match index"
                );
                return Err(CofferError::BackupMismatch {
                    account: account.id.to_string(),
                });
            }
            let pair = derive::derive_at_path(
                session.master.seed(),
                &account.derivation_path,
                account.chain_type,
            )?;
            if pair.address != account.address {
                warn!(chain = %account.chain_type, index = account.index, "backup address mismatch");
                return Err(CofferError::BackupMismatch {
                    account: account.id.to_string(),
                });
            }
            session
                .keys
                .insert((account.chain_type, account.index), Arc::new(pair));
            accounts.push(account.clone());
        }
        let vault = self.seal(&session.master, password)?;

        let mut inner = self.write();
        *inner = Inner {
            vault: Some(vault),
            accounts,
            session: Some(session),
        };
        info!(accounts = inner.accounts.len(), "keyring restored");
        Ok(())
    }

    pub fn change_password(&self, old: &SecretString, new: &SecretString) -> Result<()> {
        let _transition = self.begin_transition();
        let vault = {
            let inner = self.read();
            inner.session()?;
            inner.vault.clone().ok_or(CofferError::NotInitialized)?
        };
        let master = Self::open(&vault, old)?;
        self.check_password(new)?;
        let sealed = self.seal(&master, new)?;
        self.write().vault = Some(sealed);
        info!("keyring password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::ContextCompat as _;

    const ABANDON_ABOUT: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const GOOD_PW: &str = "Sup3r$ecret!";

    fn pw(s: &str) -> SecretString {
        SecretString::new(s.to_owned().into())
    }

    fn fast() -> KeyringConfig {
        KeyringConfig {
            envelope: EnvelopeOptions {
                iterations: 1_000,
                ..EnvelopeOptions::default()
            },
            ..KeyringConfig::default()
        }
    }

    fn imported() -> eyre::Result<Keyring> {
        let k = Keyring::new(fast());
        k.initialize(Some(&pw(ABANDON_ABOUT)), &pw(GOOD_PW))?;
        Ok(k)
    }

    #[test]
    fn keyring_is_send_and_sync() {
        fn check<T: Send + Sync>() {}
        check::<Keyring>();
        check::<Arc<Keyring>>();
    }

    #[test]
    fn generated_wallet_survives_lock_cycle() -> eyre::Result<()> {
        let k = Keyring::new(fast());
        assert_eq!(
            k.state(),
            KeyringState {
                is_initialized: false,
                is_locked: true
            }
        );
        let phrase = k.initialize(None, &pw(GOOD_PW))?;
        assert_eq!(phrase.expose_secret().split(' ').count(), 24);

        let account = k.create_account(ChainType::Ethereum, None)?;
        assert_eq!(account.index, 0);
        assert_eq!(account.derivation_path.coin_type(), Some(60));
        assert_eq!(account.name, "Ethereum Account 1");

        k.lock();
        assert!(k.state().is_locked);
        assert_eq!(
            k.get_accounts(None).err(),
            Some(CofferError::KeyringLocked)
        );
        assert_eq!(
            k.sign_message(b"hi", ChainType::Ethereum).err(),
            Some(CofferError::KeyringLocked)
        );
        assert_eq!(
            k.sign_transaction(b"\x02\xf8", ChainType::Ethereum).err(),
            Some(CofferError::KeyringLocked)
        );

        k.unlock(&pw(GOOD_PW))?;
        let accounts = k.get_accounts(Some(ChainType::Ethereum))?;
        assert_eq!(accounts.first().map(|a| a.address.as_str()), Some(account.address.as_str()));
        Ok(())
    }

    #[test]
    fn imported_phrase_gives_known_address() -> eyre::Result<()> {
        let k = imported()?;
        let a = k.create_account(ChainType::Ethereum, Some("main"))?;
        assert_eq!(a.address, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
        assert_eq!(a.name, "main");
        let b = k.create_account(ChainType::Bitcoin, None)?;
        assert_eq!(b.address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
        Ok(())
    }

    #[test]
    fn initialize_guards() -> eyre::Result<()> {
        let k = Keyring::new(fast());
        assert!(matches!(
            k.initialize(None, &pw("password")),
            Err(CofferError::WeakPassword { .. })
        ));
        assert_eq!(
            k.initialize(Some(&pw("abandon abandon")), &pw(GOOD_PW)).err(),
            Some(CofferError::InvalidMnemonic)
        );
        assert!(!k.state().is_initialized);
        k.initialize(None, &pw(GOOD_PW))?;
        assert_eq!(
            k.initialize(None, &pw(GOOD_PW)).err(),
            Some(CofferError::AlreadyInitialized)
        );
        Ok(())
    }

    #[test]
    fn unlock_with_wrong_password_keeps_state() -> eyre::Result<()> {
        let k = imported()?;
        k.lock();
        assert_eq!(
            k.unlock(&pw("Wr0ng!Password")).err(),
            Some(CofferError::InvalidPassword)
        );
        assert!(k.state().is_locked);
        Ok(())
    }

    #[test]
    fn corrupted_vault_reads_as_invalid_password() -> eyre::Result<()> {
        let k = imported()?;
        let mut snap = k.snapshot()?;
        snap.vault.auth_tag = None;
        let k2 = Keyring::from_snapshot(fast(), snap.clone())?;
        assert_eq!(k2.unlock(&pw(GOOD_PW)).err(), Some(CofferError::InvalidPassword));

        let mut snap = k.snapshot()?;
        snap.vault.ciphertext = snap.vault.ciphertext.chars().rev().collect();
        let k3 = Keyring::from_snapshot(fast(), snap)?;
        assert_eq!(k3.unlock(&pw(GOOD_PW)).err(), Some(CofferError::InvalidPassword));
        Ok(())
    }

    #[test]
    fn uninitialized_operations_fail() {
        let k = Keyring::new(fast());
        assert_eq!(k.unlock(&pw(GOOD_PW)).err(), Some(CofferError::NotInitialized));
        assert_eq!(
            k.create_account(ChainType::Solana, None).err(),
            Some(CofferError::NotInitialized)
        );
        assert_eq!(k.snapshot().err(), Some(CofferError::NotInitialized));
        k.lock();
    }

    #[test]
    fn signing_needs_an_account() -> eyre::Result<()> {
        let k = imported()?;
        assert_eq!(
            k.sign_transaction(b"tx", ChainType::Solana).err(),
            Some(CofferError::NoAccountForChain(ChainType::Solana))
        );
        k.create_account(ChainType::Solana, None)?;
        assert_eq!(k.sign_transaction(b"tx", ChainType::Solana)?.len(), 64);
        assert_eq!(k.sign_message(b"m", ChainType::Solana)?.len(), 64);
        assert_eq!(k.public_key(ChainType::Solana)?.len(), 64);
        Ok(())
    }

    #[test]
    fn active_account_switch_changes_signer() -> eyre::Result<()> {
        let k = imported()?;
        let first = k.create_account(ChainType::Ethereum, None)?;
        let second = k.create_account(ChainType::Ethereum, None)?;
        assert_eq!(second.name, "Ethereum Account 2");
        let pk_first = k.public_key(ChainType::Ethereum)?;
        k.set_active_account(&second.id.to_string())?;
        let pk_second = k.public_key(ChainType::Ethereum)?;
        assert_ne!(pk_first, pk_second);
        k.set_active_account(&first.id.to_string())?;
        assert_eq!(k.public_key(ChainType::Ethereum)?, pk_first);
        assert!(matches!(
            k.set_active_account(&Uuid::new_v4().to_string()),
            Err(CofferError::AccountNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn keys_are_rederived_after_unlock() -> eyre::Result<()> {
        let k = imported()?;
        k.create_account(ChainType::Aptos, None)?;
        let before = k.sign_message(b"same", ChainType::Aptos)?;
        k.lock();
        k.unlock(&pw(GOOD_PW))?;
        assert_eq!(k.sign_message(b"same", ChainType::Aptos)?, before);
        Ok(())
    }

    #[test]
    fn export_requires_fresh_password() -> eyre::Result<()> {
        let k = imported()?;
        assert_eq!(
            k.export_mnemonic(&pw("Wr0ng!Password")).err(),
            Some(CofferError::InvalidPassword)
        );
        let phrase = k.export_mnemonic(&pw(GOOD_PW))?;
        assert_eq!(phrase.expose_secret(), ABANDON_ABOUT);
        k.lock();
        assert_eq!(
            k.export_mnemonic(&pw(GOOD_PW)).err(),
            Some(CofferError::KeyringLocked)
        );
        Ok(())
    }

    #[test]
    fn backup_restores_into_fresh_keyring() -> eyre::Result<()> {
        let k = imported()?;
        let eth = k.create_account(ChainType::Ethereum, None)?;
        k.create_account(ChainType::Solana, Some("trading"))?;
        let backup = k.backup(&pw("Backup#Pass2024"))?;

        let other = Keyring::new(fast());
        assert_eq!(
            other.restore(&backup, &pw("Wr0ng!Password")).err(),
            Some(CofferError::InvalidPassword)
        );
        other.restore(&backup, &pw("Backup#Pass2024"))?;
        assert!(!other.state().is_locked);
        let accounts = other.get_accounts(None)?;
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts.first().context("first")?.id, eth.id);

        other.lock();
        other.unlock(&pw("Backup#Pass2024"))?;
        assert_eq!(
            other.public_key(ChainType::Ethereum)?,
            k.public_key(ChainType::Ethereum)?
        );
        Ok(())
    }

    #[test]
    fn tampered_backup_account_is_a_mismatch() -> eyre::Result<()> {
        let k = imported()?;
        let eth = k.create_account(ChainType::Ethereum, None)?;
        let phrase = k.export_mnemonic(&pw(GOOD_PW))?;
        let mut forged = eth.clone();
        forged.address = "0x0000000000000000000000000000000000000000".to_owned();
        let payload = BackupPayload {
            mnemonic: phrase.expose_secret().to_owned(),
            accounts: vec![forged],
        };
        let file = BackupFile::seal(&payload, &pw(GOOD_PW), &fast().envelope)?;

        let other = Keyring::new(fast());
        assert_eq!(
            other.restore(&file.to_json()?, &pw(GOOD_PW)).err(),
            Some(CofferError::BackupMismatch {
                account: eth.id.to_string()
            })
        );
        assert!(!other.state().is_initialized);
        Ok(())
    }

    #[test]
    fn backup_index_must_match_its_path() -> eyre::Result<()> {
        let k = imported()?;
        let eth = k.create_account(ChainType::Ethereum, None)?;
        let phrase = k.export_mnemonic(&pw(GOOD_PW))?;
        let master = MasterSecret::from_phrase(phrase.expose_secret())?;
        let fifth = derive::derive_key_pair(master.seed(), ChainType::Ethereum, 5)?;

        let mut shifted = eth.clone();
        shifted.address = fifth.address.clone();
        shifted.derivation_path = fifth.derivation_path.clone();
        let payload = BackupPayload {
            mnemonic: phrase.expose_secret().to_owned(),
            accounts: vec![shifted],
        };
        let file = BackupFile::seal(&payload, &pw(GOOD_PW), &fast().envelope)?;

        let other = Keyring::new(fast());
        assert_eq!(
            other.restore(&file.to_json()?, &pw(GOOD_PW)).err(),
            Some(CofferError::BackupMismatch {
                account: eth.id.to_string()
            })
        );
        assert!(!other.state().is_initialized);
        Ok(())
    }

    #[test]
    fn change_password_reseals() -> eyre::Result<()> {
        let k = imported()?;
        assert_eq!(
            k.change_password(&pw("Wr0ng!Password"), &pw("N3w&Better!pass")).err(),
            Some(CofferError::InvalidPassword)
        );
        assert!(matches!(
            k.change_password(&pw(GOOD_PW), &pw("short")),
            Err(CofferError::WeakPassword { .. })
        ));
        k.change_password(&pw(GOOD_PW), &pw("N3w&Better!pass"))?;
        k.lock();
        assert_eq!(k.unlock(&pw(GOOD_PW)).err(), Some(CofferError::InvalidPassword));
        k.unlock(&pw("N3w&Better!pass"))?;
        Ok(())
    }

    #[test]
    fn snapshot_roundtrip_starts_locked() -> eyre::Result<()> {
        let k = imported()?;
        let a = k.create_account(ChainType::Bitcoin, None)?;
        let json = serde_json::to_string(&k.snapshot()?)?;
        assert!(!json.contains("abandon"));
        let snap: KeyringSnapshot = serde_json::from_str(&json)?;
        let loaded = Keyring::from_snapshot(fast(), snap)?;
        assert!(loaded.state().is_locked);
        loaded.unlock(&pw(GOOD_PW))?;
        assert_eq!(loaded.get_accounts(None)?, vec![a]);
        Ok(())
    }

    #[test]
    fn wipe_returns_to_uninitialized() -> eyre::Result<()> {
        let k = imported()?;
        k.wipe();
        assert_eq!(
            k.state(),
            KeyringState {
                is_initialized: false,
                is_locked: true
            }
        );
        k.initialize(None, &pw(GOOD_PW))?;
        Ok(())
    }

    #[test]
    fn rename_account_updates_listing() -> eyre::Result<()> {
        let k = imported()?;
        let a = k.create_account(ChainType::Polygon, None)?;
        k.rename_account(&a.id.to_string(), "  savings ")?;
        let listed = k.get_accounts(Some(ChainType::Polygon))?;
        assert_eq!(listed.first().map(|a| a.name.as_str()), Some("savings"));
        Ok(())
    }

    #[test]
    fn concurrent_signing_and_locking() -> eyre::Result<()> {
        let k = Arc::new(imported()?);
        k.create_account(ChainType::Ethereum, None)?;
        let signers: Vec<_> = (0..4)
            .map(|_| {
                let k = Arc::clone(&k);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        match k.sign_message(b"race", ChainType::Ethereum) {
                            Ok(sig) => assert_eq!(sig.len(), 65),
                            Err(e) => assert_eq!(e, CofferError::KeyringLocked),
                        }
                    }
                })
            })
            .collect();
        k.lock();
        for s in signers {
            s.join().map_err(|_panic| eyre::eyre!("signer thread panicked"))?;
        }
        Ok(())
    }
}
