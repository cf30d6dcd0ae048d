use crate::{
    crypto::{
        envelope::{
            DEFAULT_ARGON2_MEMORY_KIB, DEFAULT_ARGON2_PARALLELISM, DEFAULT_ITERATIONS,
            DEFAULT_NONCE_LEN, DEFAULT_SALT_LEN,
        },
        EnvelopeOptions, KdfAlgorithm,
    },
    derive::DEFAULT_STRENGTH,
    keyring::{KeyringConfig, DEFAULT_MIN_PASSWORD_SCORE},
    network::{retry, RetryConfig, DEFAULT_PROBE_METHOD},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub algorithm: KdfAlgorithm,
    /// PBKDF2 rounds (1000..=10000000), or the Argon2id time cost (1..=10).
    pub iterations: u32,
    pub salt_len: usize,
    /// AES-GCM nonce length: 12 or 16.
    pub nonce_len: usize,
    pub argon2_memory_kib: u32,
    pub argon2_parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            algorithm: KdfAlgorithm::Pbkdf2Sha256,
            iterations: DEFAULT_ITERATIONS,
            salt_len: DEFAULT_SALT_LEN,
            nonce_len: DEFAULT_NONCE_LEN,
            argon2_memory_kib: DEFAULT_ARGON2_MEMORY_KIB,
            argon2_parallelism: DEFAULT_ARGON2_PARALLELISM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyringSection {
    /// Entropy bits for generated mnemonics (128..=256, step 32).
    pub mnemonic_strength: u32,
    /// Minimum `password_strength` score (0-100) accepted for new passwords.
    pub min_password_score: u8,
}

impl Default for KeyringSection {
    fn default() -> Self {
        Self {
            mnemonic_strength: DEFAULT_STRENGTH,
            min_password_score: DEFAULT_MIN_PASSWORD_SCORE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Total attempts per endpoint, including the first.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: u32,
    pub attempt_timeout_ms: u64,
    pub jitter_percent: u8,
    pub deadline_ms: Option<u64>,
}

impl Default for RetrySection {
    fn default() -> Self {
        let d = RetryConfig::default();
        Self {
            max_retries: d.max_retries,
            initial_delay_ms: millis(d.initial_delay),
            max_delay_ms: millis(d.max_delay),
            backoff_factor: d.backoff_factor,
            attempt_timeout_ms: millis(d.attempt_timeout),
            jitter_percent: retry::DEFAULT_JITTER_PERCENT,
            deadline_ms: None,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkEndpoints {
    pub endpoints: Vec<String>,
    /// JSON-RPC method used as the liveness probe. Defaults to `eth_blockNumber`.
    pub probe_method: Option<String>,
}

impl NetworkEndpoints {
    pub fn probe_method(&self) -> &str {
        self.probe_method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_PROBE_METHOD)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersSection {
    pub probe_timeout_ms: u64,
    pub networks: BTreeMap<String, NetworkEndpoints>,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(
            "ethereum".to_owned(),
            NetworkEndpoints {
                endpoints: vec![
                    "https://ethereum-rpc.publicnode.com".to_owned(),
                    "https://eth.llamarpc.com".to_owned(),
                ],
                probe_method: None,
            },
        );
        networks.insert(
            "polygon".to_owned(),
            NetworkEndpoints {
                endpoints: vec![
                    "https://polygon-bor-rpc.publicnode.com".to_owned(),
                    "https://polygon-rpc.com".to_owned(),
                ],
                probe_method: None,
            },
        );
        networks.insert(
            "solana".to_owned(),
            NetworkEndpoints {
                endpoints: vec!["https://api.mainnet-beta.solana.com".to_owned()],
                probe_method: Some("getSlot".to_owned()),
            },
        );
        Self {
            probe_timeout_ms: 5_000,
            networks,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CofferConfig {
    pub kdf: KdfConfig,
    pub keyring: KeyringSection,
    pub retry: RetrySection,
    pub providers: ProvidersSection,
}

impl CofferConfig {
    pub fn envelope_options(&self) -> EnvelopeOptions {
        EnvelopeOptions {
            kdf: self.kdf.algorithm,
            iterations: self.kdf.iterations,
            salt_len: self.kdf.salt_len,
            nonce_len: self.kdf.nonce_len,
            argon2_memory_kib: self.kdf.argon2_memory_kib,
            argon2_parallelism: self.kdf.argon2_parallelism,
        }
    }

    pub fn keyring_config(&self) -> KeyringConfig {
        KeyringConfig {
            envelope: self.envelope_options(),
            mnemonic_strength: self.keyring.mnemonic_strength,
            min_password_score: self.keyring.min_password_score,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        let r = &self.retry;
        RetryConfig {
            max_retries: r.max_retries,
            initial_delay: Duration::from_millis(r.initial_delay_ms),
            max_delay: Duration::from_millis(r.max_delay_ms),
            backoff_factor: r.backoff_factor,
            attempt_timeout: Duration::from_millis(r.attempt_timeout_ms),
            jitter_percent: r.jitter_percent.min(100),
            deadline: r.deadline_ms.map(Duration::from_millis),
        }
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.providers.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = CofferConfig::default();
        assert_eq!(cfg.kdf.iterations, 100_000);
        assert_eq!(cfg.envelope_options(), EnvelopeOptions::default());
        assert_eq!(cfg.keyring_config(), KeyringConfig::default());
        assert_eq!(cfg.retry_config(), RetryConfig::default());
        assert_eq!(cfg.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_fills_defaults() -> eyre::Result<()> {
        let cfg: CofferConfig = toml::from_str(
            r#"
[kdf]
algorithm = "argon2id"
iterations = 3

[retry]
max_retries = 5
deadline_ms = 60000

[providers.networks.aptos]
endpoints = ["https://api.mainnet.aptoslabs.com/v1"]
probe_method = "get_ledger_info"
"#,
        )?;
        assert_eq!(cfg.kdf.algorithm, KdfAlgorithm::Argon2id);
        assert_eq!(cfg.kdf.salt_len, 16);
        assert_eq!(cfg.keyring.min_password_score, 50);
        let retry = cfg.retry_config();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.deadline, Some(Duration::from_secs(60)));
        assert_eq!(retry.initial_delay, Duration::from_secs(1));
        let aptos = cfg.providers.networks.get("aptos");
        assert_eq!(aptos.map(NetworkEndpoints::probe_method), Some("get_ledger_info"));
        Ok(())
    }

    #[test]
    fn toml_roundtrip() -> eyre::Result<()> {
        let cfg = CofferConfig::default();
        let s = toml::to_string_pretty(&cfg)?;
        let back: CofferConfig = toml::from_str(&s)?;
        assert_eq!(back, cfg);
        Ok(())
    }
}
