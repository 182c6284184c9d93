//! Wallet state aggregate

use crate::addresses::{AddressSet, PaymentAddress};
use crate::config::NetworkType;
use crate::error::{MaspError, MaspResult};
use crate::hd_wallet::{SealedSecret, ViewingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

const MAX_ALIAS_LEN: usize = 64;

/// A named spending key. Only the account is stored; the key itself is
/// re-derived from the sealed master secret when it is asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingKeyRecord {

    pub alias: String,

    pub account: u32,

    /// Viewing key of the same account.
    pub viewing_key_id: String,
}

/// What an alias points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AliasEntry {
    ViewingKey(ViewingKey),
    SpendingKey(SpendingKeyRecord),
    PaymentAddress(PaymentAddress),
}

/// Lowercases an alias and checks it only uses `[a-z0-9._-]`.
pub fn normalize_alias(alias: &str) -> MaspResult<String> {
    let alias = alias.trim().to_lowercase();
    if alias.is_empty() {
        return Err(MaspError::InvalidAlias("alias must not be empty".to_string()));
    }
    if alias.len() > MAX_ALIAS_LEN {
        return Err(MaspError::InvalidAlias(format!("'{}' is longer than {} characters", alias, MAX_ALIAS_LEN)));
    }
    if let Some(c) = alias
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(MaspError::InvalidAlias(format!("'{}' contains '{}'", alias, c)));
    }
    Ok(alias)
}

/// Everything persisted for one wallet. Written whole or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletState {

    pub network: NetworkType,

    /// One-way seed identifier, see [`crate::hd_wallet::seed_fingerprint`].
    pub seed_fingerprint: String,


    pub sealed_master: SealedSecret,


    pub viewing_keys: BTreeMap<String, ViewingKey>,

    /// Key used when the caller does not name one.
    pub active_viewing_key: String,

    /// Spending key aliases, keyed by alias.
    #[serde(default)]
    pub spending_keys: BTreeMap<String, SpendingKeyRecord>,


    pub addresses: AddressSet,


    pub created_at: String,
}

impl WalletState {

    pub fn new(
        network: NetworkType,
        seed_fingerprint: String,
        sealed_master: SealedSecret,
        viewing_key: ViewingKey,
    ) -> Self {
        let active_viewing_key = viewing_key.id.clone();
        let mut viewing_keys = BTreeMap::new();
        viewing_keys.insert(viewing_key.id.clone(), viewing_key);

        Self {
            network,
            seed_fingerprint,
            sealed_master,
            viewing_keys,
            active_viewing_key,
            spending_keys: BTreeMap::new(),
            addresses: AddressSet::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }


    pub fn active_key(&self) -> MaspResult<&ViewingKey> {
        self.viewing_keys
            .get(&self.active_viewing_key)
            .ok_or(MaspError::NoViewingKey)
    }


    pub fn viewing_key(&self, id: &str) -> MaspResult<&ViewingKey> {
        self.viewing_keys.get(id).ok_or(MaspError::NoViewingKey)
    }

    /// Next unused account index.
    pub fn next_account(&self) -> u32 {
        self.viewing_keys
            .values()
            .map(|key| key.account + 1)
            .max()
            .unwrap_or(0)
    }


    pub fn add_viewing_key(&mut self, key: ViewingKey) {
        self.viewing_keys.entry(key.id.clone()).or_insert(key);
    }

    pub fn viewing_key_for_account(&self, account: u32) -> Option<&ViewingKey> {
        self.viewing_keys.values().find(|key| key.account == account)
    }

    /// Aliases held by viewing and spending keys.
    pub fn key_aliases(&self) -> BTreeSet<String> {
        self.viewing_keys
            .values()
            .filter_map(|key| key.alias.clone())
            .chain(self.spending_keys.keys().cloned())
            .collect()
    }


    pub fn find_alias(&self, alias: &str) -> Option<AliasEntry> {
        if let Some(record) = self.spending_keys.get(alias) {
            return Some(AliasEntry::SpendingKey(record.clone()));
        }
        if let Some(key) = self
            .viewing_keys
            .values()
            .find(|key| key.alias.as_deref() == Some(alias))
        {
            return Some(AliasEntry::ViewingKey(key.clone()));
        }
        self.addresses
            .find_alias(alias)
            .map(|record| AliasEntry::PaymentAddress(record.clone()))
    }


    pub fn ensure_alias_free(&self, alias: &str) -> MaspResult<()> {
        match self.find_alias(alias) {
            Some(_) => Err(MaspError::AliasTaken(alias.to_string())),
            None => Ok(()),
        }
    }

    /// SHA-256 over the canonical JSON form. Maps are ordered, so equal
    /// states always hash equally.
    pub fn checksum(&self) -> MaspResult<String> {
        let canonical = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }
}
