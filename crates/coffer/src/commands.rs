use crate::cli_output::{print_mnemonic_notice, read_new_secret, read_secret};
use coffer::{
    config::CofferConfig,
    crypto::{message_box, MessageBoxRequest},
    fsutil,
    keyring::Keyring,
    network::{JsonRpcProbe, ProviderRegistry},
    paths::CofferPaths,
    store::KeyringStore,
    ChainType, CofferError,
};
use eyre::Context as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde_json::{json, Value};
use std::path::Path;

pub const PASSWORD_ENV: &str = "COFFER_PASSWORD";
pub const NEW_PASSWORD_ENV: &str = "COFFER_NEW_PASSWORD";
pub const BACKUP_PASSWORD_ENV: &str = "COFFER_BACKUP_PASSWORD";
pub const MNEMONIC_ENV: &str = "COFFER_MNEMONIC";

#[derive(Debug)]
pub struct Ctx {
    pub paths: CofferPaths,
    pub cfg: CofferConfig,
    store: KeyringStore,
}

impl Ctx {
    pub fn new(paths: CofferPaths, cfg: CofferConfig) -> Self {
        let store = KeyringStore::new(&paths);
        Self { paths, cfg, store }
    }

    fn load(&self) -> eyre::Result<Keyring> {
        self.store.load(self.cfg.keyring_config())
    }

    fn password(&self) -> eyre::Result<SecretString> {
        read_secret(PASSWORD_ENV, "Keyring password: ")
    }

    fn unlocked_with(&self, password: &SecretString) -> eyre::Result<Keyring> {
        let keyring = self.load()?;
        keyring.unlock(password)?;
        Ok(keyring)
    }

    fn unlocked(&self) -> eyre::Result<Keyring> {
        let password = self.password()?;
        self.unlocked_with(&password)
    }
}

pub fn paths(ctx: &Ctx) -> Value {
    json!({ "ok": true, "paths": ctx.paths })
}

pub fn init(ctx: &Ctx, strength: Option<u32>, import: bool) -> eyre::Result<Value> {
    let _lock = ctx.store.lock()?;
    let mut cfg = ctx.cfg.keyring_config();
    if let Some(bits) = strength {
        cfg.mnemonic_strength = bits;
    }
    let keyring = ctx.store.load(cfg)?;
    if keyring.state().is_initialized {
        return Err(CofferError::AlreadyInitialized.into());
    }

    let mnemonic = if import {
        Some(read_secret(MNEMONIC_ENV, "Recovery phrase: ")?)
    } else {
        None
    };
    let password = read_new_secret(PASSWORD_ENV, "New keyring password: ")?;
    let phrase = keyring.initialize(mnemonic.as_ref(), &password)?;
    ctx.store.save(&keyring)?;

    let words = phrase.expose_secret().split_whitespace().count();
    if !import {
        print_mnemonic_notice(words);
    }
    Ok(json!({ "ok": true, "words": words, "state": keyring.state() }))
}

pub fn unlock_check(ctx: &Ctx) -> eyre::Result<Value> {
    let keyring = ctx.unlocked()?;
    let accounts = keyring.get_accounts(None)?.len();
    Ok(json!({ "ok": true, "state": keyring.state(), "accounts": accounts }))
}

pub fn create_account(ctx: &Ctx, chain: ChainType, name: Option<&str>) -> eyre::Result<Value> {
    let _lock = ctx.store.lock()?;
    let keyring = ctx.unlocked()?;
    let account = keyring.create_account(chain, name)?;
    ctx.store.save(&keyring)?;
    Ok(json!({ "ok": true, "account": account }))
}

pub fn accounts(ctx: &Ctx, chain: Option<ChainType>) -> eyre::Result<Value> {
    let keyring = ctx.unlocked()?;
    Ok(json!({ "ok": true, "accounts": keyring.get_accounts(chain)? }))
}

pub fn use_account(ctx: &Ctx, id: &str) -> eyre::Result<Value> {
    let _lock = ctx.store.lock()?;
    let keyring = ctx.unlocked()?;
    let account = keyring.set_active_account(id)?;
    ctx.store.save(&keyring)?;
    Ok(json!({ "ok": true, "account": account }))
}

pub fn rename_account(ctx: &Ctx, id: &str, name: &str) -> eyre::Result<Value> {
    let _lock = ctx.store.lock()?;
    let keyring = ctx.unlocked()?;
    let account = keyring.rename_account(id, name)?;
    ctx.store.save(&keyring)?;
    Ok(json!({ "ok": true, "account": account }))
}

pub fn sign_message(ctx: &Ctx, chain: ChainType, message: &str) -> eyre::Result<Value> {
    let keyring = ctx.unlocked()?;
    let signature = keyring.sign_message(message.as_bytes(), chain)?;
    Ok(json!({
        "ok": true,
        "chain": chain,
        "publicKey": keyring.public_key(chain)?,
        "signature": hex::encode(signature),
    }))
}

pub fn sign_tx(ctx: &Ctx, chain: ChainType, payload_hex: &str) -> eyre::Result<Value> {
    let trimmed = payload_hex.trim();
    let payload = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .context("transaction payload is not hex")?;
    let keyring = ctx.unlocked()?;
    let signature = keyring.sign_transaction(&payload, chain)?;
    Ok(json!({
        "ok": true,
        "chain": chain,
        "publicKey": keyring.public_key(chain)?,
        "signature": hex::encode(signature),
    }))
}

pub fn export_mnemonic(ctx: &Ctx) -> eyre::Result<Value> {
    let password = ctx.password()?;
    let keyring = ctx.unlocked_with(&password)?;
    let phrase = keyring.export_mnemonic(&password)?;
    Ok(json!({ "ok": true, "mnemonic": phrase.expose_secret() }))
}

pub fn backup(ctx: &Ctx, out: &Path) -> eyre::Result<Value> {
    let keyring = ctx.unlocked()?;
    let backup_password = read_new_secret(BACKUP_PASSWORD_ENV, "Backup password: ")?;
    let serialized = keyring.backup(&backup_password)?;
    fsutil::write_private_atomic(out, serialized.as_bytes()).context("write backup file")?;
    Ok(json!({
        "ok": true,
        "path": out,
        "accounts": keyring.get_accounts(None)?.len(),
    }))
}

/// Restoring re-seals the keyring under the backup password.
pub fn restore(ctx: &Ctx, input: &Path, force: bool) -> eyre::Result<Value> {
    let _lock = ctx.store.lock()?;
    let keyring = ctx.load()?;
    if keyring.state().is_initialized && !force {
        return Err(eyre::Report::new(CofferError::AlreadyInitialized)
            .wrap_err("keyring exists; pass --force to replace it"));
    }
    let serialized = fsutil::read_private(input)?
        .ok_or_else(|| eyre::eyre!("backup file not found: {}", input.display()))?;
    let backup_password = read_secret(BACKUP_PASSWORD_ENV, "Backup password: ")?;
    keyring.restore(&serialized, &backup_password)?;
    ctx.store.save(&keyring)?;
    Ok(json!({
        "ok": true,
        "accounts": keyring.get_accounts(None)?.len(),
        "state": keyring.state(),
    }))
}

pub fn change_password(ctx: &Ctx) -> eyre::Result<Value> {
    let _lock = ctx.store.lock()?;
    let old = ctx.password()?;
    let keyring = ctx.unlocked_with(&old)?;
    let new = read_new_secret(NEW_PASSWORD_ENV, "New keyring password: ")?;
    keyring.change_password(&old, &new)?;
    ctx.store.save(&keyring)?;
    Ok(json!({ "ok": true }))
}

/// Fetch the block height of `network` through the retry and failover layers.
pub async fn probe(ctx: &Ctx, network: &str) -> eyre::Result<Value> {
    let entry = ctx
        .cfg
        .providers
        .networks
        .get(network)
        .ok_or_else(|| CofferError::UnknownNetwork(network.to_owned()))?;
    let rpc = JsonRpcProbe::new(entry.probe_method(), ctx.cfg.probe_timeout())?;
    let registry = ProviderRegistry::with_probe_timeout(rpc.clone(), ctx.cfg.probe_timeout());
    registry.register_network(network, entry.endpoints.clone());

    let outcome = registry
        .execute_with_failover(network, &ctx.cfg.retry_config(), |endpoint| {
            let rpc = rpc.clone();
            async move { rpc.block_height(&endpoint).await }
        })
        .await?;

    Ok(json!({
        "ok": outcome.success,
        "network": network,
        "method": rpc.method(),
        "endpoint": outcome.endpoint,
        "height": outcome.data,
        "attempts": outcome.attempts,
        "durationMs": u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
        "history": outcome.history,
        "error": outcome.error,
    }))
}

pub fn encrypt_message(public_key: &str, text: &str) -> eyre::Result<Value> {
    let envelope = message_box::encrypt(&MessageBoxRequest {
        public_key,
        data: text,
        version: message_box::VERSION_X25519_XCHACHA20,
    })?;
    Ok(json!({ "ok": true, "envelope": envelope }))
}
