
use crate::config::NetworkType;
use crate::error::{MaspError, MaspResult};
use crate::hd_wallet::{self, ViewingKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAddress {

    pub viewing_key_id: String,

    /// Diversifier index within the viewing key.
    pub index: u32,

    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    pub created_at: String,
}

impl PaymentAddress {

    pub fn new(viewing_key_id: &str, index: u32, address: String) -> Self {
        Self {
            viewing_key_id: viewing_key_id.to_string(),
            index,
            address,
            alias: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }


    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    AlreadyPresent,
    /// The slot holds a different address; carries the stored one.
    Conflict(String),
}

/// All payment addresses of a wallet, keyed by (viewing key id, index).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSet {

    entries: BTreeMap<String, BTreeMap<u32, PaymentAddress>>,

    next_index: BTreeMap<String, u32>,
}

impl AddressSet {

    pub fn new() -> Self {
        Self::default()
    }


    pub fn next_index(&self, viewing_key_id: &str) -> u32 {
        self.next_index.get(viewing_key_id).copied().unwrap_or(0)
    }


    pub fn get(&self, viewing_key_id: &str, index: u32) -> Option<&PaymentAddress> {
        self.entries.get(viewing_key_id)?.get(&index)
    }


    pub fn find_alias(&self, alias: &str) -> Option<&PaymentAddress> {
        self.iter().find(|record| record.alias.as_deref() == Some(alias))
    }

    /// Points `alias` at the record in slot (`viewing_key_id`, `index`),
    /// taking it away from whichever record held it before.
    pub fn assign_alias(&mut self, viewing_key_id: &str, index: u32, alias: &str) -> bool {
        if self.get(viewing_key_id, index).is_none() {
            return false;
        }
        for record in self.entries.values_mut().flat_map(|slots| slots.values_mut()) {
            if record.alias.as_deref() == Some(alias) {
                record.alias = None;
            }
        }
        if let Some(record) = self
            .entries
            .get_mut(viewing_key_id)
            .and_then(|slots| slots.get_mut(&index))
        {
            record.alias = Some(alias.to_string());
        }
        true
    }


    pub fn classify(&self, record: &PaymentAddress) -> InsertOutcome {
        match self.get(&record.viewing_key_id, record.index) {
            None => InsertOutcome::Added,
            Some(existing) if existing.address == record.address => InsertOutcome::AlreadyPresent,
            Some(existing) => InsertOutcome::Conflict(existing.address.clone()),
        }
    }

    /// Inserts a record, returning `true` when it was new. A different
    /// address in an occupied slot is a [`MaspError::DerivationMismatch`].
    pub fn insert(&mut self, record: PaymentAddress) -> MaspResult<bool> {
        match self.classify(&record) {
            InsertOutcome::AlreadyPresent => return Ok(false),
            InsertOutcome::Conflict(existing) => {
                return Err(MaspError::DerivationMismatch {
                    viewing_key: record.viewing_key_id,
                    index: record.index,
                    existing,
                    incoming: record.address,
                    conflicting: 1,
                })
            }
            InsertOutcome::Added => {}
        }

        let following = record.index.checked_add(1).ok_or_else(|| MaspError::IndexExhausted {
            viewing_key: record.viewing_key_id.clone(),
            limit: u32::MAX,
        })?;
        let counter = self.next_index.entry(record.viewing_key_id.clone()).or_insert(0);
        if *counter < following {
            *counter = following;
        }

        self.entries
            .entry(record.viewing_key_id.clone())
            .or_default()
            .insert(record.index, record);
        Ok(true)
    }

    /// Records of one key in ascending index order.
    pub fn for_key(&self, viewing_key_id: &str) -> Vec<&PaymentAddress> {
        self.entries
            .get(viewing_key_id)
            .map(|slots| slots.values().collect())
            .unwrap_or_default()
    }


    pub fn iter(&self) -> impl Iterator<Item = &PaymentAddress> {
        self.entries.values().flat_map(|slots| slots.values())
    }


    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }


    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }


    /// Checks the structural invariants of a set read from disk.
    pub fn validate(&self) -> MaspResult<()> {
        let mut aliases = BTreeSet::new();
        for alias in self.iter().filter_map(|record| record.alias.as_deref()) {
            if !aliases.insert(alias) {
                return Err(MaspError::StoreCorrupted(format!("Alias '{}' names more than one address", alias)));
            }
        }

        for (key_id, slots) in &self.entries {
            for (index, record) in slots {
                if &record.viewing_key_id != key_id || record.index != *index {
                    return Err(MaspError::StoreCorrupted(format!(
                        "Address record {}/{} is filed under {}/{}",
                        record.viewing_key_id, record.index, key_id, index
                    )));
                }
            }
            if let Some(highest) = slots.keys().next_back() {
                if self.next_index(key_id) <= *highest {
                    return Err(MaspError::StoreCorrupted(format!(
                        "Next index {} for {} does not exceed stored index {}",
                        self.next_index(key_id),
                        key_id,
                        highest
                    )));
                }
            }
        }
        Ok(())
    }
}


#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {

    pub sources: usize,

    pub added: usize,

    pub already_present: usize,

    pub conflicting: usize,

    /// Sources ignored because they belong to another wallet or failed to load.
    pub skipped_sources: usize,

    /// Records dropped because no verified viewing key owns them.
    #[serde(default)]
    pub orphaned: usize,
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "merged {} source(s): {} added, {} already present, {} conflicting, {} skipped, {} orphaned",
            self.sources,
            self.added,
            self.already_present,
            self.conflicting,
            self.skipped_sources,
            self.orphaned
        )
    }
}


#[derive(Debug, Clone, PartialEq, Eq)]
struct Conflict {
    viewing_key: String,
    index: u32,
    existing: String,
    incoming: String,
}


#[derive(Debug, Clone)]
pub struct AddressManager {

    network: NetworkType,

    max_per_key: u32,
}

impl AddressManager {

    pub fn new(network: NetworkType, max_per_key: u32) -> Self {
        Self {
            network,
            max_per_key,
        }
    }

    /// Allocates the next index of `key`, derives its address and records it.
    /// The caller persists `set` while still holding the wallet lock and has
    /// already checked that `alias` is free.
    pub fn generate_address(
        &self,
        set: &mut AddressSet,
        key: &ViewingKey,
        alias: Option<&str>,
    ) -> MaspResult<PaymentAddress> {
        let index = set.next_index(&key.id);
        if index >= self.max_per_key {
            return Err(MaspError::IndexExhausted {
                viewing_key: key.id.clone(),
                limit: self.max_per_key,
            });
        }

        let address = hd_wallet::derive_payment_address(key, index, self.network)?;
        let record = PaymentAddress::new(&key.id, index, address);
        set.insert(record.clone())?;
        let record = match alias {
            Some(alias) => {
                set.assign_alias(&key.id, index, alias);
                record.with_alias(alias)
            }
            None => record,
        };

        tracing::debug!(viewing_key = %key.id, index, "allocated payment address");
        Ok(record)
    }


    pub fn list_addresses(&self, set: &AddressSet, key: &ViewingKey) -> Vec<PaymentAddress> {
        set.for_key(&key.id).into_iter().cloned().collect()
    }

    /// Folds `sources` into `base`. Every record is re-derived from its key in
    /// `known_keys` and must match; records of unknown keys are dropped as
    /// orphans. Incoming aliases already used in `base` or listed in
    /// `reserved_aliases` are discarded. Any conflict aborts the merge and
    /// leaves `base` untouched.
    pub fn merge_addresses(
        &self,
        base: &mut AddressSet,
        known_keys: &BTreeMap<String, ViewingKey>,
        reserved_aliases: &BTreeSet<String>,
        sources: &[AddressSet],
    ) -> MaspResult<MergeReport> {
        let mut merged = base.clone();
        let mut report = MergeReport {
            sources: sources.len(),
            ..MergeReport::default()
        };
        let mut conflicts = Vec::new();

        for source in sources {
            for record in source.iter() {
                let key = match known_keys.get(&record.viewing_key_id) {
                    Some(key) => key,
                    None => {
                        tracing::debug!(viewing_key = %record.viewing_key_id, index = record.index, "dropping orphaned address");
                        report.orphaned += 1;
                        continue;
                    }
                };
                let expected = hd_wallet::derive_payment_address(key, record.index, self.network)?;
                if expected != record.address {
                    conflicts.push(Conflict {
                        viewing_key: record.viewing_key_id.clone(),
                        index: record.index,
                        existing: expected,
                        incoming: record.address.clone(),
                    });
                    continue;
                }

                match merged.classify(record) {
                    InsertOutcome::Added => {
                        let mut incoming = record.clone();
                        let alias_taken = incoming.alias.as_ref().map_or(false, |alias| {
                            reserved_aliases.contains(alias) || merged.find_alias(alias).is_some()
                        });
                        if alias_taken {
                            incoming.alias = None;
                        }
                        merged.insert(incoming)?;
                        report.added += 1;
                    }
                    InsertOutcome::AlreadyPresent => report.already_present += 1,
                    InsertOutcome::Conflict(existing) => conflicts.push(Conflict {
                        viewing_key: record.viewing_key_id.clone(),
                        index: record.index,
                        existing,
                        incoming: record.address.clone(),
                    }),
                }
            }
        }

        report.conflicting = conflicts.len();
        if let Some(first) = conflicts.into_iter().next() {
            tracing::warn!(
                viewing_key = %first.viewing_key,
                index = first.index,
                conflicting = report.conflicting,
                "address merge found diverging derivations"
            );
            return Err(MaspError::DerivationMismatch {
                viewing_key: first.viewing_key,
                index: first.index,
                existing: first.existing,
                incoming: first.incoming,
                conflicting: report.conflicting,
            });
        }

        *base = merged;
        tracing::info!(%report, "address sets merged");
        Ok(report)
    }

    /// Human readable `key/index = "address"` lines, keys by account and
    /// indices ascending. Named addresses carry `(alias)` at the end.
    pub fn render_listing(&self, set: &AddressSet, keys: &BTreeMap<String, ViewingKey>) -> String {
        let mut ordered: Vec<&ViewingKey> = keys.values().collect();
        ordered.sort_by_key(|key| key.account);

        ordered
            .into_iter()
            .flat_map(|key| set.for_key(&key.id))
            .map(|record| {
                let line = format!("{}/{} = \"{}\"", record.viewing_key_id, record.index, record.address);
                match &record.alias {
                    Some(alias) => format!("{} ({})", line, alias),
                    None => line,
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
