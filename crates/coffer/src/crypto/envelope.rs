//! Password-based envelope encryption.
//!
//! A vault carries everything needed to reverse itself except the password: the KDF
//! parameters, the salt, the nonce and the detached GCM tag. Decryption always uses the
//! parameters recorded in the vault, so changing the defaults never strands old vaults.

use crate::errors::{CofferError, Result};
use aes_gcm::{
    aead::{consts::U16, AeadInPlace, KeyInit},
    aes::Aes256,
    Aes256Gcm, AesGcm,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

pub const VAULT_VERSION: u8 = 1;
pub const CIPHER_AES_256_GCM: &str = "aes-256-gcm";

pub const DEFAULT_ITERATIONS: u32 = 100_000;
pub const MIN_PBKDF2_ITERATIONS: u32 = 1_000;
pub const DEFAULT_SALT_LEN: usize = 16;
pub const DEFAULT_NONCE_LEN: usize = 12;
pub const DEFAULT_ARGON2_MEMORY_KIB: u32 = 19 * 1024;
pub const DEFAULT_ARGON2_PARALLELISM: u32 = 1;

/// Ceilings on KDF work. Vault headers are read before the tag can be checked, so these
/// bound what an edited vault can make `decrypt` allocate or compute.
pub const MAX_PBKDF2_ITERATIONS: u32 = 10_000_000;
pub const MAX_ARGON2_TIME_COST: u32 = 10;
pub const MAX_ARGON2_MEMORY_KIB: u32 = 1024 * 1024;
pub const MAX_ARGON2_PARALLELISM: u32 = 16;

const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum KdfAlgorithm {
    #[default]
    #[serde(rename = "pbkdf2-sha256")]
    Pbkdf2Sha256,
    #[serde(rename = "argon2id")]
    Argon2id,
}

impl KdfAlgorithm {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pbkdf2Sha256 => "pbkdf2-sha256",
            Self::Argon2id => "argon2id",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pbkdf2-sha256" => Some(Self::Pbkdf2Sha256),
            "argon2id" => Some(Self::Argon2id),
            _ => None,
        }
    }
}

/// KDF parameters as persisted inside a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub algorithm: String,
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_kib: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,
}

/// The persisted, secret-bearing record. Binary fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedVault {
    pub version: u8,
    pub algorithm: String,
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_tag: Option<String>,
    pub kdf: KdfParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeOptions {
    pub kdf: KdfAlgorithm,
    /// PBKDF2 rounds, or the Argon2 time cost.
    pub iterations: u32,
    pub salt_len: usize,
    /// 12 or 16 bytes.
    pub nonce_len: usize,
    pub argon2_memory_kib: u32,
    pub argon2_parallelism: u32,
}

impl Default for EnvelopeOptions {
    fn default() -> Self {
        Self {
            kdf: KdfAlgorithm::Pbkdf2Sha256,
            iterations: DEFAULT_ITERATIONS,
            salt_len: DEFAULT_SALT_LEN,
            nonce_len: DEFAULT_NONCE_LEN,
            argon2_memory_kib: DEFAULT_ARGON2_MEMORY_KIB,
            argon2_parallelism: DEFAULT_ARGON2_PARALLELISM,
        }
    }
}

impl EnvelopeOptions {
    fn validate(&self) -> Result<()> {
        if !matches!(self.nonce_len, 12 | 16) {
            return Err(CofferError::UnsupportedAlgorithm(format!(
                "{CIPHER_AES_256_GCM} with {}-byte nonce",
                self.nonce_len
            )));
        }
        if !(16..=64).contains(&self.salt_len) {
            return Err(CofferError::UnsupportedAlgorithm(format!(
                "{}-byte salt",
                self.salt_len
            )));
        }
        if self.kdf == KdfAlgorithm::Pbkdf2Sha256 && self.iterations < MIN_PBKDF2_ITERATIONS {
            return Err(CofferError::UnsupportedAlgorithm(format!(
                "{} with {} iterations",
                self.kdf.as_str(),
                self.iterations
            )));
        }
        check_kdf_bounds(self.kdf, &self.kdf_params())
    }

    fn kdf_params(&self) -> KdfParams {
        match self.kdf {
            KdfAlgorithm::Pbkdf2Sha256 => KdfParams {
                algorithm: self.kdf.as_str().to_owned(),
                iterations: self.iterations,
                memory_kib: None,
                parallelism: None,
            },
            KdfAlgorithm::Argon2id => KdfParams {
                algorithm: self.kdf.as_str().to_owned(),
                iterations: self.iterations,
                memory_kib: Some(self.argon2_memory_kib),
                parallelism: Some(self.argon2_parallelism),
            },
        }
    }
}

fn check_kdf_bounds(algorithm: KdfAlgorithm, kdf: &KdfParams) -> Result<()> {
    let out_of_range = |what: &str, value: u32| {
        Err(CofferError::UnsupportedAlgorithm(format!(
            "{} with {what} {value}",
            algorithm.as_str()
        )))
    };
    match algorithm {
        KdfAlgorithm::Pbkdf2Sha256 => {
            if kdf.iterations > MAX_PBKDF2_ITERATIONS {
                return out_of_range("iterations", kdf.iterations);
            }
        }
        KdfAlgorithm::Argon2id => {
            if kdf.iterations == 0 || kdf.iterations > MAX_ARGON2_TIME_COST {
                return out_of_range("time cost", kdf.iterations);
            }
            let memory = kdf.memory_kib.unwrap_or(DEFAULT_ARGON2_MEMORY_KIB);
            if memory > MAX_ARGON2_MEMORY_KIB {
                return out_of_range("memory KiB", memory);
            }
            let lanes = kdf.parallelism.unwrap_or(DEFAULT_ARGON2_PARALLELISM);
            if lanes == 0 || lanes > MAX_ARGON2_PARALLELISM {
                return out_of_range("parallelism", lanes);
            }
        }
    }
    Ok(())
}

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

fn derive_key(
    password: &SecretString,
    salt: &[u8],
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let algorithm = KdfAlgorithm::parse(&kdf.algorithm)
        .ok_or_else(|| CofferError::UnsupportedAlgorithm(kdf.algorithm.clone()))?;
    let pw = password.expose_secret().as_bytes();
    let mut key = Zeroizing::new([0_u8; KEY_LEN]);
    match algorithm {
        KdfAlgorithm::Pbkdf2Sha256 => {
            if kdf.iterations == 0 {
                return Err(CofferError::DecryptionFailed);
            }
            pbkdf2::pbkdf2_hmac::<Sha256>(pw, salt, kdf.iterations, key.as_mut_slice());
        }
        KdfAlgorithm::Argon2id => {
            let memory = kdf.memory_kib.unwrap_or(DEFAULT_ARGON2_MEMORY_KIB);
            let lanes = kdf.parallelism.unwrap_or(DEFAULT_ARGON2_PARALLELISM);
            let params = Params::new(memory, kdf.iterations, lanes, Some(KEY_LEN))
                .map_err(|_argon| CofferError::Crypto("argon2 params"))?;
            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                .hash_password_into(pw, salt, key.as_mut_slice())
                .map_err(|_argon| CofferError::Crypto("argon2 hash"))?;
        }
    }
    Ok(key)
}

/// Associated data binds the header fields to the ciphertext, so editing the recorded
/// algorithm or KDF parameters fails the tag check like any other tampering.
fn associated_data(algorithm: &str, kdf: &KdfParams) -> Vec<u8> {
    format!(
        "coffer-vault:v{VAULT_VERSION}:{algorithm}:{}:{}:{}:{}",
        kdf.algorithm,
        kdf.iterations,
        kdf.memory_kib.unwrap_or(0),
        kdf.parallelism.unwrap_or(0)
    )
    .into_bytes()
}

fn seal_with<C: AeadInPlace + KeyInit>(
    key: &[u8; KEY_LEN],
    nonce: &[u8],
    aad: &[u8],
    buf: &mut Vec<u8>,
) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|_len| CofferError::Crypto("aes key length"))?;
    let tag = cipher
        .encrypt_in_place_detached(aes_gcm::aead::Nonce::<C>::from_slice(nonce), aad, buf)
        .map_err(|_aead| CofferError::Crypto("aes encrypt"))?;
    Ok(tag.to_vec())
}

fn open_with<C: AeadInPlace + KeyInit>(
    key: &[u8; KEY_LEN],
    nonce: &[u8],
    aad: &[u8],
    buf: &mut Vec<u8>,
    tag: &[u8],
) -> Result<()> {
    let cipher = C::new_from_slice(key).map_err(|_len| CofferError::DecryptionFailed)?;
    cipher
        .decrypt_in_place_detached(
            aes_gcm::aead::Nonce::<C>::from_slice(nonce),
            aad,
            buf,
            aes_gcm::aead::Tag::<C>::from_slice(tag),
        )
        .map_err(|_aead| CofferError::DecryptionFailed)
}

/// Seal `plaintext` under `password`. Salt and nonce are fresh for every call.
pub fn encrypt(
    plaintext: &[u8],
    password: &SecretString,
    options: Option<&EnvelopeOptions>,
) -> Result<EncryptedVault> {
    let opts = options.copied().unwrap_or_default();
    opts.validate()?;

    let salt = super::random_bytes(opts.salt_len);
    let nonce = super::random_bytes(opts.nonce_len);
    let kdf = opts.kdf_params();
    let key = derive_key(password, &salt, &kdf)?;
    let aad = associated_data(CIPHER_AES_256_GCM, &kdf);

    let mut buf = plaintext.to_vec();
    let tag = if opts.nonce_len == 16 {
        seal_with::<Aes256Gcm16>(&key, &nonce, &aad, &mut buf)?
    } else {
        seal_with::<Aes256Gcm>(&key, &nonce, &aad, &mut buf)?
    };

    Ok(EncryptedVault {
        version: VAULT_VERSION,
        algorithm: CIPHER_AES_256_GCM.to_owned(),
        ciphertext: b64().encode(&buf),
        iv: b64().encode(&nonce),
        salt: b64().encode(&salt),
        auth_tag: Some(b64().encode(tag)),
        kdf,
    })
}

/// Open a vault. The tag is verified before any plaintext is returned.
pub fn decrypt(vault: &EncryptedVault, password: &SecretString) -> Result<Zeroizing<Vec<u8>>> {
    if vault.version != VAULT_VERSION {
        return Err(CofferError::UnsupportedVersion(vault.version.to_string()));
    }
    if vault.algorithm != CIPHER_AES_256_GCM {
        return Err(CofferError::UnsupportedAlgorithm(vault.algorithm.clone()));
    }
    let kdf_algorithm = KdfAlgorithm::parse(&vault.kdf.algorithm)
        .ok_or_else(|| CofferError::UnsupportedAlgorithm(vault.kdf.algorithm.clone()))?;
    check_kdf_bounds(kdf_algorithm, &vault.kdf)?;
    let tag_b64 = vault
        .auth_tag
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(CofferError::AuthTagRequired)?;

    let decode = |s: &str| b64().decode(s).map_err(|_b64| CofferError::DecryptionFailed);
    let tag = decode(tag_b64)?;
    let nonce = decode(&vault.iv)?;
    let salt = decode(&vault.salt)?;
    let ciphertext = decode(&vault.ciphertext)?;
    if tag.len() != TAG_LEN || !matches!(nonce.len(), 12 | 16) || salt.is_empty() {
        return Err(CofferError::DecryptionFailed);
    }

    let key = derive_key(password, &salt, &vault.kdf)?;
    let aad = associated_data(&vault.algorithm, &vault.kdf);
    let mut buf = Zeroizing::new(ciphertext);
    if nonce.len() == 16 {
        open_with::<Aes256Gcm16>(&key, &nonce, &aad, &mut buf, &tag)?;
    } else {
        open_with::<Aes256Gcm>(&key, &nonce, &aad, &mut buf, &tag)?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::ContextCompat as _;

    fn pw(s: &str) -> SecretString {
        SecretString::new(s.to_owned().into())
    }

    fn fast() -> EnvelopeOptions {
        EnvelopeOptions {
            iterations: MIN_PBKDF2_ITERATIONS,
            ..EnvelopeOptions::default()
        }
    }

    fn flip_bit(b64_field: &str, byte: usize) -> eyre::Result<String> {
        let mut raw = b64().decode(b64_field)?;
        let len = raw.len();
        let b = raw
            .get_mut(byte % len)
            .context("field must not be empty")?;
        *b ^= 0x01;
        Ok(b64().encode(raw))
    }

    #[test]
    fn roundtrip_sizes_and_charsets() -> eyre::Result<()> {
        let opts = fast();
        let big = vec![0xAB_u8; 1024 * 1024];
        let payloads: [&[u8]; 3] = [b"", b"x", &big];
        for password in ["ascii-Passw0rd", "pässwörd-ünïcødé", "🔐🦀 secret 🗝️"] {
            for p in payloads {
                let v = encrypt(p, &pw(password), Some(&opts))?;
                let out = decrypt(&v, &pw(password))?;
                assert_eq!(out.as_slice(), p, "roundtrip len={}", p.len());
            }
        }
        Ok(())
    }

    #[test]
    fn same_plaintext_encrypts_differently() -> eyre::Result<()> {
        let opts = fast();
        let a = encrypt(b"seed words", &pw("pw"), Some(&opts))?;
        let b = encrypt(b"seed words", &pw("pw"), Some(&opts))?;
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.salt, b.salt);
        assert_eq!(decrypt(&a, &pw("pw"))?.as_slice(), b"seed words");
        assert_eq!(decrypt(&b, &pw("pw"))?.as_slice(), b"seed words");
        Ok(())
    }

    #[test]
    fn single_bit_flips_fail_closed() -> eyre::Result<()> {
        let v = encrypt(b"the quick brown fox", &pw("pw"), Some(&fast()))?;
        let tag = v.auth_tag.clone().context("tag")?;
        for byte in [0_usize, 5, 11, 15] {
            let mut t = v.clone();
            t.ciphertext = flip_bit(&v.ciphertext, byte)?;
            assert_eq!(decrypt(&t, &pw("pw")), Err(CofferError::DecryptionFailed));

            let mut t = v.clone();
            t.iv = flip_bit(&v.iv, byte)?;
            assert_eq!(decrypt(&t, &pw("pw")), Err(CofferError::DecryptionFailed));

            let mut t = v.clone();
            t.salt = flip_bit(&v.salt, byte)?;
            assert_eq!(decrypt(&t, &pw("pw")), Err(CofferError::DecryptionFailed));

            let mut t = v.clone();
            t.auth_tag = Some(flip_bit(&tag, byte)?);
            assert_eq!(decrypt(&t, &pw("pw")), Err(CofferError::DecryptionFailed));
        }
        Ok(())
    }

    #[test]
    fn wrong_password_looks_like_corruption() -> eyre::Result<()> {
        let v = encrypt(b"data", &pw("right"), Some(&fast()))?;
        let wrong = decrypt(&v, &pw("wrong")).err().context("must fail")?;
        let mut corrupted = v.clone();
        corrupted.ciphertext = flip_bit(&v.ciphertext, 0)?;
        let bad = decrypt(&corrupted, &pw("right"))
            .err()
            .context("must fail")?;
        assert_eq!(wrong, bad);
        Ok(())
    }

    #[test]
    fn edited_kdf_params_fail() -> eyre::Result<()> {
        let v = encrypt(b"data", &pw("pw"), Some(&fast()))?;
        let mut t = v;
        t.kdf.iterations += 1;
        assert_eq!(decrypt(&t, &pw("pw")), Err(CofferError::DecryptionFailed));
        Ok(())
    }

    #[test]
    fn missing_tag_is_distinct() -> eyre::Result<()> {
        let mut v = encrypt(b"data", &pw("pw"), Some(&fast()))?;
        v.auth_tag = None;
        assert_eq!(decrypt(&v, &pw("pw")), Err(CofferError::AuthTagRequired));
        v.auth_tag = Some(String::new());
        assert_eq!(decrypt(&v, &pw("pw")), Err(CofferError::AuthTagRequired));
        Ok(())
    }

    #[test]
    fn unknown_algorithms_are_rejected_before_decrypting() -> eyre::Result<()> {
        let v = encrypt(b"data", &pw("pw"), Some(&fast()))?;

        let mut t = v.clone();
        t.algorithm = "aes-128-cbc".to_owned();
        assert_eq!(
            decrypt(&t, &pw("pw")),
            Err(CofferError::UnsupportedAlgorithm("aes-128-cbc".to_owned()))
        );

        let mut t = v.clone();
        t.kdf.algorithm = "scrypt".to_owned();
        assert_eq!(
            decrypt(&t, &pw("pw")),
            Err(CofferError::UnsupportedAlgorithm("scrypt".to_owned()))
        );

        let mut t = v;
        t.version = 9;
        assert_eq!(
            decrypt(&t, &pw("pw")),
            Err(CofferError::UnsupportedVersion("9".to_owned()))
        );
        Ok(())
    }

    #[test]
    fn sixteen_byte_nonce_and_argon2() -> eyre::Result<()> {
        let opts = EnvelopeOptions {
            kdf: KdfAlgorithm::Argon2id,
            iterations: 1,
            nonce_len: 16,
            argon2_memory_kib: 1024,
            ..EnvelopeOptions::default()
        };
        let v = encrypt(b"payload", &pw("pw"), Some(&opts))?;
        assert_eq!(b64().decode(&v.iv)?.len(), 16);
        assert_eq!(v.kdf.memory_kib, Some(1024));
        assert_eq!(decrypt(&v, &pw("pw"))?.as_slice(), b"payload");
        Ok(())
    }

    #[test]
    fn oversized_kdf_params_are_refused_before_derivation() -> eyre::Result<()> {
        let opts = EnvelopeOptions {
            kdf: KdfAlgorithm::Argon2id,
            iterations: 1,
            argon2_memory_kib: 1024,
            ..EnvelopeOptions::default()
        };
        let v = encrypt(b"payload", &pw("pw"), Some(&opts))?;

        let mut t = v.clone();
        t.kdf.memory_kib = Some(u32::MAX);
        assert!(matches!(
            decrypt(&t, &pw("pw")),
            Err(CofferError::UnsupportedAlgorithm(_))
        ));

        let mut t = v.clone();
        t.kdf.parallelism = Some(u32::MAX);
        assert!(matches!(
            decrypt(&t, &pw("pw")),
            Err(CofferError::UnsupportedAlgorithm(_))
        ));

        let mut t = v;
        t.kdf.iterations = u32::MAX;
        assert!(matches!(
            decrypt(&t, &pw("pw")),
            Err(CofferError::UnsupportedAlgorithm(_))
        ));

        let mut p = encrypt(b"payload", &pw("pw"), Some(&fast()))?;
        p.kdf.iterations = u32::MAX;
        assert!(matches!(
            decrypt(&p, &pw("pw")),
            Err(CofferError::UnsupportedAlgorithm(_))
        ));
        Ok(())
    }

    #[test]
    fn encrypt_refuses_params_decrypt_would_refuse() {
        let opts = EnvelopeOptions {
            kdf: KdfAlgorithm::Argon2id,
            iterations: MAX_ARGON2_TIME_COST + 1,
            ..EnvelopeOptions::default()
        };
        assert!(matches!(
            encrypt(b"x", &pw("pw"), Some(&opts)),
            Err(CofferError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn vault_json_shape_is_stable() -> eyre::Result<()> {
        let v = encrypt(b"x", &pw("pw"), Some(&fast()))?;
        let j = serde_json::to_value(&v)?;
        for field in ["ciphertext", "iv", "salt", "authTag", "algorithm", "kdf", "version"] {
            assert!(j.get(field).is_some(), "missing {field}");
        }
        assert_eq!(
            j.pointer("/kdf/algorithm").and_then(|x| x.as_str()),
            Some("pbkdf2-sha256")
        );
        let back: EncryptedVault = serde_json::from_value(j)?;
        assert_eq!(back, v);
        Ok(())
    }

    #[test]
    fn rejects_bad_options() {
        let opts = EnvelopeOptions {
            nonce_len: 8,
            ..EnvelopeOptions::default()
        };
        assert!(matches!(
            encrypt(b"x", &pw("pw"), Some(&opts)),
            Err(CofferError::UnsupportedAlgorithm(_))
        ));
        let opts = EnvelopeOptions {
            iterations: 10,
            ..EnvelopeOptions::default()
        };
        assert!(encrypt(b"x", &pw("pw"), Some(&opts)).is_err());
    }
}
