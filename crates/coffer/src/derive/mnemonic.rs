use crate::errors::{CofferError, Result};
use bip39::{Language, Mnemonic};
use zeroize::Zeroizing;

pub const SUPPORTED_STRENGTHS: [u32; 5] = [128, 160, 192, 224, 256];
pub const DEFAULT_STRENGTH: u32 = 256;

/// The wallet's root secret: a BIP-39 phrase and its 64-byte seed.
///
/// Both live in zeroizing buffers and never appear in `Debug` output.
pub struct MasterSecret {
    phrase: Zeroizing<String>,
    seed: Zeroizing<[u8; 64]>,
    word_count: usize,
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret")
            .field("word_count", &self.word_count)
            .finish_non_exhaustive()
    }
}

impl MasterSecret {
    /// Validate (word list, checksum, word count) and normalize a user-supplied phrase.
    pub fn from_phrase(phrase: &str) -> Result<Self> {
        let normalized = Zeroizing::new(
            phrase
                .split_whitespace()
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
                .join(" "),
        );
        let word_count = normalized.split(' ').count();
        if !(12..=24).contains(&word_count) || word_count % 3 != 0 {
            return Err(CofferError::InvalidMnemonic);
        }
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized)
            .map_err(|_bip39| CofferError::InvalidMnemonic)?;
        Ok(Self::from_mnemonic(&mnemonic))
    }

    /// Fresh phrase from the CSPRNG. `strength_bits` is one of [`SUPPORTED_STRENGTHS`].
    pub fn generate(strength_bits: u32) -> Result<Self> {
        if !SUPPORTED_STRENGTHS.contains(&strength_bits) {
            return Err(CofferError::InvalidMnemonicStrength(strength_bits));
        }
        let len = usize::try_from(strength_bits / 8)
            .map_err(|_int| CofferError::InvalidMnemonicStrength(strength_bits))?;
        let entropy = Zeroizing::new(crate::crypto::random_bytes(len));
        let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
            .map_err(|_bip39| CofferError::Crypto("mnemonic from entropy"))?;
        Ok(Self::from_mnemonic(&mnemonic))
    }

    fn from_mnemonic(mnemonic: &Mnemonic) -> Self {
        Self {
            phrase: Zeroizing::new(mnemonic.to_string()),
            seed: Zeroizing::new(mnemonic.to_seed_normalized("")),
            word_count: mnemonic.word_count(),
        }
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn seed(&self) -> &[u8; 64] {
        &self.seed
    }

    pub const fn word_count(&self) -> usize {
        self.word_count
    }
}

pub fn validate_mnemonic(phrase: &str) -> Result<()> {
    MasterSecret::from_phrase(phrase).map(drop)
}

/// BIP-39 seed (PBKDF2-HMAC-SHA512, 2048 rounds) for `phrase` and `passphrase`.
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<Zeroizing<[u8; 64]>> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|_bip39| CofferError::InvalidMnemonic)?;
    Ok(Zeroizing::new(mnemonic.to_seed_normalized(passphrase)))
}
