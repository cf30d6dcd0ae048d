use crate::errors::{CofferError, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Offset added to an index to mark it hardened (BIP-32).
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildIndex {
    Normal(u32),
    Hardened(u32),
}

impl ChildIndex {
    pub fn normal(index: u32) -> Result<Self> {
        check_range(index)?;
        Ok(Self::Normal(index))
    }

    pub fn hardened(index: u32) -> Result<Self> {
        check_range(index)?;
        Ok(Self::Hardened(index))
    }

    pub const fn is_hardened(self) -> bool {
        matches!(self, Self::Hardened(_))
    }

    /// Index without the hardened offset.
    pub const fn index(self) -> u32 {
        match self {
            Self::Normal(i) | Self::Hardened(i) => i,
        }
    }

    /// Serialized form used in HMAC input (`ser32`).
    pub const fn raw(self) -> u32 {
        match self {
            Self::Normal(i) => i,
            Self::Hardened(i) => i | HARDENED_OFFSET,
        }
    }
}

fn check_range(index: u32) -> Result<()> {
    if index >= HARDENED_OFFSET {
        return Err(CofferError::DerivationOverflow(u64::from(index)));
    }
    Ok(())
}

impl fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal(i) => write!(f, "{i}"),
            Self::Hardened(i) => write!(f, "{i}'"),
        }
    }
}

/// A BIP-32 style path such as `m/44'/60'/0'/0/0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivationPath(Vec<ChildIndex>);

impl DerivationPath {
    pub const fn new(children: Vec<ChildIndex>) -> Self {
        Self(children)
    }

    pub fn children(&self) -> &[ChildIndex] {
        &self.0
    }

    pub fn is_fully_hardened(&self) -> bool {
        self.0.iter().all(|c| c.is_hardened())
    }

    /// Coin-type segment (`m/purpose'/coin'/...`), if the path is deep enough.
    pub fn coin_type(&self) -> Option<u32> {
        self.0.get(1).map(|c| c.index())
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for c in &self.0 {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = CofferError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let rest = match trimmed.strip_prefix('m') {
            Some("") => return Ok(Self(Vec::new())),
            Some(rest) => rest
                .strip_prefix('/')
                .ok_or_else(|| CofferError::InvalidDerivationPath(trimmed.to_owned()))?,
            None => return Err(CofferError::InvalidDerivationPath(trimmed.to_owned())),
        };

        let mut children = Vec::new();
        for part in rest.split('/') {
            let (digits, hardened) = match part
                .strip_suffix('\'')
                .or_else(|| part.strip_suffix('h'))
            {
                Some(d) => (d, true),
                None => (part, false),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CofferError::InvalidDerivationPath(trimmed.to_owned()));
            }
            let value: u64 = digits
                .parse()
                .map_err(|_int| CofferError::DerivationOverflow(u64::MAX))?;
            let index = u32::try_from(value)
                .ok()
                .filter(|i| *i < HARDENED_OFFSET)
                .ok_or(CofferError::DerivationOverflow(value))?;
            children.push(if hardened {
                ChildIndex::Hardened(index)
            } else {
                ChildIndex::Normal(index)
            });
        }
        Ok(Self(children))
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_renders() -> eyre::Result<()> {
        let p: DerivationPath = "m/44'/60'/0'/0/7".parse()?;
        assert_eq!(
            p.children(),
            &[
                ChildIndex::Hardened(44),
                ChildIndex::Hardened(60),
                ChildIndex::Hardened(0),
                ChildIndex::Normal(0),
                ChildIndex::Normal(7),
            ]
        );
        assert_eq!(p.to_string(), "m/44'/60'/0'/0/7");
        assert_eq!(p.coin_type(), Some(60));
        assert!(!p.is_fully_hardened());
        Ok(())
    }

    #[test]
    fn accepts_h_suffix_and_root() -> eyre::Result<()> {
        let p: DerivationPath = "m/44h/501h/0h/0h".parse()?;
        assert!(p.is_fully_hardened());
        assert_eq!(p.to_string(), "m/44'/501'/0'/0'");
        let root: DerivationPath = "m".parse()?;
        assert!(root.children().is_empty());
        Ok(())
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", "44'/0'", "m/", "m//1", "m/x", "m/1''", "m/-1", "n/1"] {
            assert!(
                matches!(
                    bad.parse::<DerivationPath>(),
                    Err(CofferError::InvalidDerivationPath(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn index_overflow_is_reported() {
        assert_eq!(
            "m/2147483648".parse::<DerivationPath>(),
            Err(CofferError::DerivationOverflow(2_147_483_648))
        );
        assert_eq!(
            "m/44'/4294967296'".parse::<DerivationPath>(),
            Err(CofferError::DerivationOverflow(4_294_967_296))
        );
        assert_eq!(
            ChildIndex::hardened(HARDENED_OFFSET),
            Err(CofferError::DerivationOverflow(u64::from(HARDENED_OFFSET)))
        );
        assert!(ChildIndex::normal(HARDENED_OFFSET - 1).is_ok());
    }

    #[test]
    fn raw_applies_offset() {
        assert_eq!(ChildIndex::Hardened(1).raw(), 0x8000_0001);
        assert_eq!(ChildIndex::Normal(1).raw(), 1);
    }

    #[test]
    fn serde_as_string() -> eyre::Result<()> {
        let p: DerivationPath = "m/84'/0'/0'/0/3".parse()?;
        let j = serde_json::to_string(&p)?;
        assert_eq!(j, "\"m/84'/0'/0'/0/3\"");
        let back: DerivationPath = serde_json::from_str(&j)?;
        assert_eq!(back, p);
        Ok(())
    }
}
