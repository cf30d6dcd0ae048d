use crate::{
    config::CofferConfig,
    fsutil::{self, FileLock},
    keyring::{Keyring, KeyringConfig, KeyringSnapshot},
    paths::CofferPaths,
};
use eyre::Context as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// If `var` is set to a value that parses, hand it to `setter`.
fn apply_env<T: std::str::FromStr>(var: &str, setter: impl FnOnce(T)) {
    if let Some(v) = std::env::var(var)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
    {
        setter(v);
    }
}

/// Environment knobs that win over `config.toml`. They are applied on every load and
/// never written back.
fn apply_env_overrides(cfg: &mut CofferConfig) {
    apply_env("COFFER_KDF_ITERATIONS", |n: u32| cfg.kdf.iterations = n);
    apply_env("COFFER_MAX_RETRIES", |n: u32| cfg.retry.max_retries = n);
    apply_env("COFFER_ATTEMPT_TIMEOUT_MS", |n: u64| {
        if n > 0 {
            cfg.retry.attempt_timeout_ms = n;
        }
    });
    apply_env("COFFER_MIN_PASSWORD_SCORE", |n: u8| {
        cfg.keyring.min_password_score = n.min(100);
    });
}

impl ConfigStore {
    pub fn new(paths: &CofferPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    /// Read `config.toml`, creating it with defaults on first run.
    pub fn load_or_init_default(&self) -> eyre::Result<CofferConfig> {
        let mut cfg = match fsutil::read_private(&self.path)? {
            Some(s) => toml::from_str(&s).context("parse config.toml")?,
            None => {
                let cfg = CofferConfig::default();
                self.save(&cfg)?;
                cfg
            }
        };
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &CofferConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        fsutil::write_private_atomic(&self.path, s.as_bytes()).context("write config.toml")
    }
}

/// Persists the keyring snapshot. Writers hold an advisory lock for the duration of a
/// load-modify-save cycle so concurrent CLI invocations cannot interleave.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl KeyringStore {
    pub fn new(paths: &CofferPaths) -> Self {
        Self {
            path: paths.keyring_file(),
            lock_path: paths.keyring_lock_file(),
        }
    }

    /// Take the writer lock, failing fast if another process holds it.
    pub fn lock(&self) -> eyre::Result<FileLock> {
        FileLock::try_acquire(&self.lock_path)?
            .ok_or_else(|| eyre::eyre!("keyring is busy (locked by another coffer process)"))
    }

    pub fn load_snapshot(&self) -> eyre::Result<Option<KeyringSnapshot>> {
        fsutil::read_private(&self.path)?
            .map(|s| serde_json::from_str(&s).context("parse keyring.json"))
            .transpose()
    }

    /// Load the persisted keyring, or an empty one if none exists yet. Always locked.
    pub fn load(&self, cfg: KeyringConfig) -> eyre::Result<Keyring> {
        match self.load_snapshot()? {
            Some(snap) => Ok(Keyring::from_snapshot(cfg, snap)?),
            None => Ok(Keyring::new(cfg)),
        }
    }

    pub fn save(&self, keyring: &Keyring) -> eyre::Result<()> {
        let snap = keyring.snapshot()?;
        let s = serde_json::to_string_pretty(&snap).context("serialize keyring.json")?;
        fsutil::write_private_atomic(&self.path, s.as_bytes()).context("write keyring.json")?;
        tracing::debug!(path = %self.path.display(), accounts = snap.accounts.len(), "keyring saved");
        Ok(())
    }
}
