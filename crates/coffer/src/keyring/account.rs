use crate::{
    derive::{ChainType, DerivationPath},
    errors::{CofferError, Result},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Public record of a derived account. Carries no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub chain_type: ChainType,
    pub address: String,
    pub derivation_path: DerivationPath,
    pub index: u32,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn default_name(chain: ChainType, ordinal: usize) -> String {
        format!("{} Account {ordinal}", chain.display_name())
    }
}

/// Accounts in creation order plus the active account per chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountTable {
    accounts: Vec<Account>,
    active: BTreeMap<ChainType, Uuid>,
}

impl AccountTable {
    /// Rebuild from persisted parts. Active entries pointing at unknown ids, or at an
    /// account on another chain, fall back to the chain's first account.
    pub fn from_parts(accounts: Vec<Account>, active: BTreeMap<ChainType, Uuid>) -> Self {
        let mut table = Self {
            accounts,
            active: BTreeMap::new(),
        };
        for (chain, id) in active {
            if table.get(&id).is_some_and(|a| a.chain_type == chain) {
                table.active.insert(chain, id);
            }
        }
        for a in &table.accounts {
            table.active.entry(a.chain_type).or_insert(a.id);
        }
        table
    }

    pub fn into_parts(self) -> (Vec<Account>, BTreeMap<ChainType, Uuid>) {
        (self.accounts, self.active)
    }

    pub(crate) fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Next unused derivation index on `chain`.
    pub fn next_index(&self, chain: ChainType) -> Result<u32> {
        let next = self
            .accounts
            .iter()
            .filter(|a| a.chain_type == chain)
            .map(|a| u64::from(a.index) + 1)
            .max()
            .unwrap_or(0);
        u32::try_from(next).map_err(|_int| CofferError::DerivationOverflow(next))
    }

    /// Append an account. The first account of a chain becomes its active account.
    pub fn push(&mut self, account: Account) {
        self.active.entry(account.chain_type).or_insert(account.id);
        self.accounts.push(account);
    }

    pub fn list(&self, chain: Option<ChainType>) -> Vec<Account> {
        self.accounts
            .iter()
            .filter(|a| chain.is_none_or(|c| a.chain_type == c))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &Uuid) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == *id)
    }

    pub fn active_for(&self, chain: ChainType) -> Option<&Account> {
        self.active.get(&chain).and_then(|id| self.get(id))
    }

    pub fn set_active(&mut self, id: &Uuid) -> Result<Account> {
        let account = self
            .get(id)
            .cloned()
            .ok_or_else(|| CofferError::AccountNotFound(id.to_string()))?;
        self.active.insert(account.chain_type, account.id);
        Ok(account)
    }

    pub fn rename(&mut self, id: &Uuid, name: &str) -> Result<Account> {
        let account = self
            .accounts
            .iter_mut()
            .find(|a| a.id == *id)
            .ok_or_else(|| CofferError::AccountNotFound(id.to_string()))?;
        name.trim().clone_into(&mut account.name);
        Ok(account.clone())
    }
}

/// Parse a user-supplied account id; anything unparseable cannot name an account.
pub fn parse_account_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s.trim()).map_err(|_uuid| CofferError::AccountNotFound(s.to_owned()))
}
