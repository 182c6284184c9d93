//! Wallet facade.
//!
//! Every operation is one awaitable unit of work. All of them run behind a
//! single lock around the store: the owned guard is moved onto the blocking
//! pool together with the load → derive → save sequence, so overlapping
//! requests are serialized and a caller that stops waiting (timeout, dropped
//! future) cannot interrupt a save that has already started.

use crate::addresses::{AddressManager, MergeReport, PaymentAddress};
use crate::config::WalletConfig;
use crate::encrypted_storage::{IntegrityReport, SecretStore};
use crate::error::{MaspError, MaspResult};
use crate::hd_wallet::{self, MasterSecret, ViewingKey};
use crate::mnemonic;
use crate::storage::{self, AliasEntry, SpendingKeyRecord, WalletState};
use bip39::Mnemonic;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use zeroize::Zeroizing;


#[derive(Debug, Clone)]
pub struct WalletService {

    config: Arc<WalletConfig>,

    store: Arc<Mutex<SecretStore>>,
}

impl WalletService {

    pub fn new(config: WalletConfig) -> MaspResult<Self> {
        config.validate()?;
        let store = SecretStore::open(&config.store);
        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(Mutex::new(store)),
        })
    }


    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    async fn run_locked<T, F>(&self, operation: &'static str, work: F) -> MaspResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SecretStore, &WalletConfig) -> MaspResult<T> + Send + 'static,
    {
        let guard = Arc::clone(&self.store).lock_owned().await;
        let config = Arc::clone(&self.config);
        let span = tracing::info_span!("wallet", operation);

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let result = work(&guard, &config);
            if let Err(err) = &result {
                tracing::warn!(error = %err, kind = ?err.kind(), "operation failed");
            }
            result
        })
        .await?
    }

    /// Creates a fresh wallet and returns `(status message, recovery phrase)`.
    /// An existing wallet is archived as a snapshot before being replaced.
    pub async fn initialize(&self) -> MaspResult<(String, String)> {
        self.run_locked("initialize", |store, config| {
            let existing = store.load()?;
            let mnemonic = mnemonic::generate()?;
            let state = build_state(&mnemonic, config)?;

            if let Some(previous) = existing {
                let archived = store.snapshot(&previous, "replaced")?;
                tracing::info!(path = %archived.display(), "previous wallet archived");
            }
            store.save(&state)?;

            tracing::info!(viewing_key = %state.active_viewing_key, "wallet created");
            let message = format!(
                "Wallet created and saved with alias {} (viewing key {})",
                config.derivation.base_alias, state.active_viewing_key
            );
            Ok((message, mnemonic.to_string()))
        })
        .await
    }

    /// Imports an existing recovery phrase. Importing the phrase the wallet
    /// already holds keeps its addresses.
    pub async fn restore(&self, phrase: &str) -> MaspResult<String> {
        let phrase = Zeroizing::new(phrase.to_string());
        self.run_locked("restore", move |store, config| {
            let mnemonic = mnemonic::parse(&phrase)?;
            let existing = store.load()?;

            if let Some(previous) = existing {
                if hd_wallet::fingerprint_matches(&hd_wallet::derive(&mnemonic), &previous.seed_fingerprint) {
                    return Ok("Wallet already holds this recovery phrase".to_string());
                }
                let archived = store.snapshot(&previous, "replaced")?;
                tracing::info!(path = %archived.display(), "previous wallet archived");
            }

            let state = build_state(&mnemonic, config)?;
            store.save(&state)?;
            tracing::info!(viewing_key = %state.active_viewing_key, "wallet restored");
            Ok(format!(
                "Wallet restored with viewing key {}",
                state.active_viewing_key
            ))
        })
        .await
    }


    pub async fn verify_mnemonic(&self, phrase: &str) -> MaspResult<bool> {
        let phrase = Zeroizing::new(phrase.to_string());
        self.run_locked("verify_mnemonic", move |store, _| {
            let mnemonic = mnemonic::parse(&phrase)?;
            let state = require(store.load()?)?;
            Ok(hd_wallet::fingerprint_matches(
                &hd_wallet::derive(&mnemonic),
                &state.seed_fingerprint,
            ))
        })
        .await
    }

    /// Viewing keys ordered by account index.
    pub async fn list_viewing_keys(&self) -> MaspResult<Vec<ViewingKey>> {
        self.run_locked("list_viewing_keys", |store, _| {
            let state = require(store.load()?)?;
            let mut keys: Vec<ViewingKey> = state.viewing_keys.into_values().collect();
            keys.sort_by_key(|key| key.account);
            Ok(keys)
        })
        .await
    }

    /// Derives the next account's viewing key. Needs the sealing passphrase.
    pub async fn add_viewing_key(&self, alias: Option<&str>) -> MaspResult<ViewingKey> {
        let alias = alias.map(storage::normalize_alias).transpose()?;
        self.run_locked("add_viewing_key", move |store, config| {
            let mut state = require(store.load()?)?;
            if let Some(alias) = &alias {
                state.ensure_alias_free(alias)?;
            }
            let master = unseal(&state, config)?;

            let mut key = hd_wallet::derive_viewing_key(
                &master,
                state.next_account(),
                state.network,
                config.derivation.coin_type,
            )?;
            key.alias = alias;
            state.add_viewing_key(key.clone());
            store.save(&state)?;

            tracing::info!(viewing_key = %key.id, "viewing key added");
            Ok(key)
        })
        .await
    }

    /// Names the spending key of `account` (the active key's account when
    /// omitted), deriving that account's viewing key if the wallet lacks it.
    /// The key itself stays sealed; see [`WalletService::reveal_spending_key`].
    pub async fn create_spending_key(&self, alias: &str, account: Option<u32>) -> MaspResult<SpendingKeyRecord> {
        let alias = storage::normalize_alias(alias)?;
        self.run_locked("create_spending_key", move |store, config| {
            let mut state = require(store.load()?)?;
            state.ensure_alias_free(&alias)?;
            let master = unseal(&state, config)?;

            let account = match account {
                Some(account) => account,
                None => state.active_key()?.account,
            };
            let viewing_key_id = match state.viewing_key_for_account(account) {
                Some(key) => key.id.clone(),
                None => {
                    let key = hd_wallet::derive_viewing_key(&master, account, state.network, config.derivation.coin_type)?;
                    let id = key.id.clone();
                    state.add_viewing_key(key);
                    id
                }
            };
            // Fails early on a bad account index
            hd_wallet::derive_spending_key(&master, account, state.network, config.derivation.coin_type)?;

            let record = SpendingKeyRecord {
                alias: alias.clone(),
                account,
                viewing_key_id,
            };
            state.spending_keys.insert(alias, record.clone());
            store.save(&state)?;

            tracing::info!(alias = %record.alias, account, "spending key created");
            Ok(record)
        })
        .await
    }

    /// Returns the encoded spending key named `alias`. This is the only way
    /// the key leaves the sealed master secret.
    pub async fn reveal_spending_key(&self, alias: &str) -> MaspResult<Zeroizing<String>> {
        let alias = storage::normalize_alias(alias)?;
        self.run_locked("reveal_spending_key", move |store, config| {
            let state = require(store.load()?)?;
            let record = state
                .spending_keys
                .get(&alias)
                .ok_or_else(|| MaspError::AliasNotFound(alias.clone()))?;
            let master = unseal(&state, config)?;

            let key = hd_wallet::derive_spending_key(&master, record.account, state.network, config.derivation.coin_type)?;
            tracing::info!(alias = %record.alias, "spending key revealed");
            Ok(key)
        })
        .await
    }


    pub async fn find_alias(&self, alias: &str) -> MaspResult<AliasEntry> {
        let alias = storage::normalize_alias(alias)?;
        self.run_locked("find_alias", move |store, _| {
            let state = require(store.load()?)?;
            state
                .find_alias(&alias)
                .ok_or(MaspError::AliasNotFound(alias))
        })
        .await
    }

    /// Allocates a new address on the active viewing key.
    pub async fn generate_payment_address(&self) -> MaspResult<PaymentAddress> {
        self.run_locked("generate_payment_address", |store, config| {
            let state = require(store.load()?)?;
            let key_id = state.active_key()?.id.clone();
            allocate(store, config, state, &key_id, None)
        })
        .await
    }

    /// Allocates a named address on the active key. An alias that already
    /// names an address returns that address unless `force` is set, in which
    /// case a new one is generated and the alias moves to it.
    pub async fn generate_named_address(&self, alias: &str, force: bool) -> MaspResult<PaymentAddress> {
        let alias = storage::normalize_alias(alias)?;
        self.run_locked("generate_payment_address", move |store, config| {
            let state = require(store.load()?)?;
            match state.find_alias(&alias) {
                Some(AliasEntry::PaymentAddress(existing)) if !force => {
                    tracing::debug!(alias = %alias, index = existing.index, "alias already names an address");
                    return Ok(existing);
                }
                Some(AliasEntry::PaymentAddress(_)) | None => {}
                Some(_) => return Err(MaspError::AliasTaken(alias)),
            }
            let key_id = state.active_key()?.id.clone();
            allocate(store, config, state, &key_id, Some(&alias))
        })
        .await
    }


    pub async fn generate_payment_address_for(&self, viewing_key_id: &str) -> MaspResult<PaymentAddress> {
        let key_id = viewing_key_id.to_string();
        self.run_locked("generate_payment_address", move |store, config| {
            let state = require(store.load()?)?;
            allocate(store, config, state, &key_id, None)
        })
        .await
    }

    /// Addresses of the active viewing key, ascending by index.
    pub async fn list_addresses(&self) -> MaspResult<Vec<PaymentAddress>> {
        self.run_locked("list_addresses", |store, config| {
            let state = require(store.load()?)?;
            let key = state.active_key()?;
            Ok(manager_for(&state, config).list_addresses(&state.addresses, key))
        })
        .await
    }


    pub async fn print_payment_addresses(&self) -> MaspResult<String> {
        self.run_locked("print_payment_addresses", |store, config| {
            let state = require(store.load()?)?;
            Ok(manager_for(&state, config).render_listing(&state.addresses, &state.viewing_keys))
        })
        .await
    }

    /// Reconciles the wallet with every local snapshot of the same seed.
    /// Viewing keys the wallet does not hold yet are re-derived from the
    /// master secret and must match; addresses of keys that cannot be
    /// verified are dropped.
    pub async fn merge_addresses(&self) -> MaspResult<MergeReport> {
        self.run_locked("merge_addresses", |store, config| {
            let mut state = require(store.load()?)?;
            let before = state.clone();
            let (snapshots, damaged) = store.load_snapshots()?;

            let mut skipped = damaged;
            let mut sources = Vec::new();
            let mut master: Option<MasterSecret> = None;
            for snapshot in snapshots {
                if snapshot.state.seed_fingerprint != state.seed_fingerprint
                    || snapshot.state.network != state.network
                {
                    tracing::debug!(path = %snapshot.path.display(), "snapshot belongs to another wallet");
                    skipped += 1;
                    continue;
                }

                for key in snapshot.state.viewing_keys.into_values() {
                    if state.viewing_keys.contains_key(&key.id) {
                        continue;
                    }
                    if master.is_none() {
                        master = Some(unseal(&state, config)?);
                    }
                    let derived = match &master {
                        Some(master) => hd_wallet::derive_viewing_key(master, key.account, state.network, config.derivation.coin_type)?,
                        None => continue,
                    };
                    if derived.id != key.id || derived.encoded != key.encoded {
                        tracing::warn!(path = %snapshot.path.display(), viewing_key = %key.id, "snapshot viewing key does not re-derive");
                        return Err(MaspError::DerivationMismatch {
                            viewing_key: key.id,
                            index: key.account,
                            existing: derived.encoded,
                            incoming: key.encoded,
                            conflicting: 1,
                        });
                    }

                    let alias = key.alias.filter(|alias| state.ensure_alias_free(alias).is_ok());
                    state.add_viewing_key(ViewingKey { alias, ..derived });
                }

                for (alias, record) in snapshot.state.spending_keys {
                    let matches_key = state
                        .viewing_keys
                        .get(&record.viewing_key_id)
                        .map_or(false, |key| key.account == record.account);
                    if matches_key && state.ensure_alias_free(&alias).is_ok()
                    {
                        state.spending_keys.insert(alias, record);
                    }
                }
                sources.push(snapshot.state.addresses);
            }

            let known_keys = state.viewing_keys.clone();
            let reserved = state.key_aliases();
            let mut report = manager_for(&state, config).merge_addresses(
                &mut state.addresses,
                &known_keys,
                &reserved,
                &sources,
            )?;
            report.skipped_sources = skipped;

            if state != before {
                store.save(&state)?;
            }
            Ok(report)
        })
        .await
    }

    /// Writes the current wallet into the snapshot directory.
    pub async fn snapshot(&self) -> MaspResult<PathBuf> {
        self.run_locked("snapshot", |store, _| {
            let state = require(store.load()?)?;
            store.snapshot(&state, "manual")
        })
        .await
    }

    /// Location and integrity check of the store.
    pub async fn check_dir(&self) -> MaspResult<IntegrityReport> {
        let dir = self.config.store.wallet_dir.clone();
        if tokio::fs::metadata(&dir).await.is_err() {
            return Ok(IntegrityReport {
                location: dir,
                exists: false,
                version: None,
                checksum: None,
                recovered_from_backup: false,
                viewing_keys: 0,
                addresses: 0,
            });
        }
        self.run_locked("check_dir", |store, _| store.verify_integrity())
            .await
    }
}


fn require(state: Option<WalletState>) -> MaspResult<WalletState> {
    state.ok_or(MaspError::NoViewingKey)
}


fn manager_for(state: &WalletState, config: &WalletConfig) -> AddressManager {
    AddressManager::new(state.network, config.derivation.max_addresses_per_key)
}


fn unseal(state: &WalletState, config: &WalletConfig) -> MaspResult<MasterSecret> {
    hd_wallet::unseal(
        &state.sealed_master,
        &config.security.passphrase,
        config.security.kdf_iterations,
    )
}


fn allocate(
    store: &SecretStore,
    config: &WalletConfig,
    mut state: WalletState,
    key_id: &str,
    alias: Option<&str>,
) -> MaspResult<PaymentAddress> {
    let key = state.viewing_key(key_id)?.clone();
    let record = manager_for(&state, config).generate_address(&mut state.addresses, &key, alias)?;
    store.save(&state)?;
    tracing::info!(viewing_key = %key.id, index = record.index, "payment address generated");
    Ok(record)
}


fn build_state(mnemonic: &Mnemonic, config: &WalletConfig) -> MaspResult<WalletState> {
    let master = hd_wallet::derive(mnemonic);
    let base = storage::normalize_alias(&config.derivation.base_alias)?;
    let mut viewing_key = hd_wallet::derive_viewing_key(
        &master,
        config.derivation.default_account,
        config.network,
        config.derivation.coin_type,
    )?;
    viewing_key.alias = Some(format!("{}-public", base));
    let sealed = hd_wallet::seal(
        &master,
        &config.security.passphrase,
        config.security.kdf_iterations,
    )?;

    let spending = SpendingKeyRecord {
        alias: format!("{}-spending", base),
        account: viewing_key.account,
        viewing_key_id: viewing_key.id.clone(),
    };
    let mut state = WalletState::new(
        config.network,
        hd_wallet::seed_fingerprint(&master),
        sealed,
        viewing_key,
    );
    state.spending_keys.insert(spending.alias.clone(), spending);
    Ok(state)
}
