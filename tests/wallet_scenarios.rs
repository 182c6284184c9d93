use masp_wallet::addresses::{AddressSet, PaymentAddress};
use masp_wallet::encrypted_storage::{decode_envelope, encode_envelope};
use masp_wallet::{AliasEntry, MaspError, NetworkType, WalletConfig, WalletService};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn wallet_dir(root: &Path) -> PathBuf {
    root.join("sdk-wallet")
}

fn service(root: &Path) -> WalletService {
    let mut config = WalletConfig::new(wallet_dir(root), NetworkType::Mainnet);
    config.security.kdf_iterations = 1_000;
    WalletService::new(config).unwrap()
}

#[tokio::test]
async fn test_initialize_then_generate_three() {
    let temp_dir = tempdir().unwrap();
    let wallet = service(temp_dir.path());

    let (message, phrase) = wallet.initialize().await.unwrap();
    assert!(message.starts_with("Wallet created and saved"));
    assert_eq!(phrase.split_whitespace().count(), 24);

    let keys = wallet.list_viewing_keys().await.unwrap();
    assert_eq!(keys.len(), 1);

    let mut seen = BTreeSet::new();
    for expected in 0..3 {
        let record = wallet.generate_payment_address().await.unwrap();
        assert_eq!(record.index, expected);
        assert_eq!(record.viewing_key_id, keys[0].id);
        assert!(seen.insert(record.address));
    }

    let listing = wallet.print_payment_addresses().await.unwrap();
    assert_eq!(listing.lines().count(), 3);
    for address in &seen {
        assert!(listing.contains(address.as_str()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_generation_is_serialized() {
    let temp_dir = tempdir().unwrap();
    let wallet = service(temp_dir.path());
    wallet.initialize().await.unwrap();

    const N: u32 = 16;
    let mut handles = Vec::new();
    for _ in 0..N {
        let wallet = wallet.clone();
        handles.push(tokio::spawn(async move {
            wallet.generate_payment_address().await.unwrap()
        }));
    }

    let mut indices = Vec::new();
    let mut addresses = BTreeSet::new();
    for handle in handles {
        let record = handle.await.unwrap();
        indices.push(record.index);
        addresses.insert(record.address);
    }
    indices.sort_unstable();
    assert_eq!(indices, (0..N).collect::<Vec<_>>());
    assert_eq!(addresses.len(), N as usize);

    // A fresh process sees the same counter
    let reopened = service(temp_dir.path());
    assert_eq!(reopened.list_addresses().await.unwrap().len(), N as usize);
    assert_eq!(reopened.generate_payment_address().await.unwrap().index, N);
}

#[tokio::test]
async fn test_restore_reproduces_keys_and_addresses() {
    let first_dir = tempdir().unwrap();
    let first = service(first_dir.path());
    let (_, phrase) = first.initialize().await.unwrap();
    let mut original = Vec::new();
    for _ in 0..3 {
        original.push(first.generate_payment_address().await.unwrap().address);
    }

    let second_dir = tempdir().unwrap();
    let second = service(second_dir.path());
    second.restore(&phrase).await.unwrap();

    let first_keys: Vec<String> = first.list_viewing_keys().await.unwrap().into_iter().map(|k| k.encoded).collect();
    let second_keys: Vec<String> = second.list_viewing_keys().await.unwrap().into_iter().map(|k| k.encoded).collect();
    assert_eq!(first_keys, second_keys);

    let mut restored = Vec::new();
    for _ in 0..3 {
        restored.push(second.generate_payment_address().await.unwrap().address);
    }
    assert_eq!(original, restored);

    // Restoring the same phrase again keeps what was generated
    let message = second.restore(&phrase).await.unwrap();
    assert!(message.contains("already holds"));
    assert_eq!(second.list_addresses().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_merge_from_snapshot() {
    let first_dir = tempdir().unwrap();
    let first = service(first_dir.path());
    let (_, phrase) = first.initialize().await.unwrap();
    for _ in 0..3 {
        first.generate_payment_address().await.unwrap();
    }
    let snapshot = first.snapshot().await.unwrap();

    let second_dir = tempdir().unwrap();
    let second = service(second_dir.path());
    second.restore(&phrase).await.unwrap();
    second.generate_payment_address().await.unwrap();

    let snapshots = wallet_dir(second_dir.path()).join("snapshots");
    fs::create_dir_all(&snapshots).unwrap();
    fs::copy(&snapshot, snapshots.join("from-first.json")).unwrap();

    let report = second.merge_addresses().await.unwrap();
    assert_eq!(report.sources, 1);
    assert_eq!(report.added, 2);
    assert_eq!(report.already_present, 1);
    assert_eq!(report.conflicting, 0);
    assert_eq!(second.list_addresses().await.unwrap().len(), 3);
    assert_eq!(second.generate_payment_address().await.unwrap().index, 3);

    // Second merge has nothing left to add
    let again = second.merge_addresses().await.unwrap();
    assert_eq!(again.added, 0);

    // Foreign wallets are ignored
    let third_dir = tempdir().unwrap();
    let third = service(third_dir.path());
    third.initialize().await.unwrap();
    let foreign = third.snapshot().await.unwrap();
    fs::copy(&foreign, snapshots.join("foreign.json")).unwrap();
    let report = second.merge_addresses().await.unwrap();
    assert_eq!(report.skipped_sources, 1);
    assert_eq!(report.added, 0);
}

#[tokio::test]
async fn test_merge_rejects_diverging_snapshot() {
    let temp_dir = tempdir().unwrap();
    let wallet = service(temp_dir.path());
    wallet.initialize().await.unwrap();
    let genuine = wallet.generate_payment_address().await.unwrap();
    let snapshot = wallet.snapshot().await.unwrap();

    let mut state = decode_envelope(&fs::read(&snapshot).unwrap()).unwrap();
    let mut forged = AddressSet::new();
    forged
        .insert(PaymentAddress::new(&genuine.viewing_key_id, 0, "znam1forged".to_string()))
        .unwrap();
    state.addresses = forged;
    fs::write(snapshot.with_file_name("forged.json"), encode_envelope(&state).unwrap()).unwrap();

    let before = fs::read(wallet_dir(temp_dir.path()).join("wallet.json")).unwrap();
    match wallet.merge_addresses().await {
        Err(MaspError::DerivationMismatch { index, incoming, .. }) => {
            assert_eq!(index, 0);
            assert_eq!(incoming, "znam1forged");
        }
        other => panic!("expected a derivation mismatch, got {:?}", other),
    }
    let after = fs::read(wallet_dir(temp_dir.path()).join("wallet.json")).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_interrupted_and_damaged_writes() {
    let temp_dir = tempdir().unwrap();
    let wallet = service(temp_dir.path());
    wallet.initialize().await.unwrap();
    wallet.generate_payment_address().await.unwrap();
    let dir = wallet_dir(temp_dir.path());

    // A leftover temp file from a write that never reached the rename
    fs::write(dir.join(".wallet.json.tmp"), b"{\"format\":\"masp-wal").unwrap();
    assert_eq!(wallet.list_addresses().await.unwrap().len(), 1);

    // Truncated primary falls back to the last good copy
    let primary = dir.join("wallet.json");
    let bytes = fs::read(&primary).unwrap();
    fs::write(&primary, &bytes[..bytes.len() / 2]).unwrap();
    let report = wallet.check_dir().await.unwrap();
    assert!(report.recovered_from_backup);
    assert_eq!(report.addresses, 0);
    assert_eq!(wallet.generate_payment_address().await.unwrap().index, 0);

    // Both copies gone bad is fatal and never silently reset
    fs::write(&primary, b"garbage").unwrap();
    fs::write(dir.join("wallet.json.bak"), b"garbage").unwrap();
    let err = wallet.generate_payment_address().await.unwrap_err();
    assert!(matches!(err, MaspError::StoreCorrupted(_)));
    assert!(err.is_fatal());
    assert!(matches!(wallet.initialize().await, Err(MaspError::StoreCorrupted(_))));
}

#[tokio::test]
async fn test_testnet_prefixes() {
    let temp_dir = tempdir().unwrap();
    let mut config = WalletConfig::new(wallet_dir(temp_dir.path()), NetworkType::Testnet);
    config.security.kdf_iterations = 1_000;
    let wallet = WalletService::new(config).unwrap();
    wallet.initialize().await.unwrap();

    let keys = wallet.list_viewing_keys().await.unwrap();
    assert!(keys[0].encoded.starts_with("zvktnam1"));
    let record = wallet.generate_payment_address().await.unwrap();
    assert!(record.address.starts_with("ztnam1"));
}

#[tokio::test]
async fn test_deleted_wallet_file_recovers_from_backup() {
    let temp_dir = tempdir().unwrap();
    let wallet = service(temp_dir.path());
    let (_, phrase) = wallet.initialize().await.unwrap();
    let first = wallet.generate_payment_address().await.unwrap();
    wallet.generate_payment_address().await.unwrap();
    let dir = wallet_dir(temp_dir.path());

    fs::remove_file(dir.join("wallet.json")).unwrap();
    let report = wallet.check_dir().await.unwrap();
    assert!(report.recovered_from_backup);
    assert_eq!(report.addresses, 1);
    assert!(wallet.verify_mnemonic(&phrase).await.unwrap());
    assert_eq!(wallet.list_addresses().await.unwrap(), vec![first]);

    // The recovered wallet is archived, not dropped, when replaced
    wallet.initialize().await.unwrap();
    let archived: Vec<String> = fs::read_dir(dir.join("snapshots"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(archived.len(), 1);
    assert!(archived[0].ends_with("-replaced.json"));
    assert!(!wallet.verify_mnemonic(&phrase).await.unwrap());
}

#[tokio::test]
async fn test_newer_store_version_is_left_alone() {
    let temp_dir = tempdir().unwrap();
    let wallet = service(temp_dir.path());
    wallet.initialize().await.unwrap();
    wallet.generate_payment_address().await.unwrap();

    let primary = wallet_dir(temp_dir.path()).join("wallet.json");
    let mut envelope: serde_json::Value = serde_json::from_slice(&fs::read(&primary).unwrap()).unwrap();
    envelope["version"] = serde_json::json!(2);
    let bumped = serde_json::to_vec(&envelope).unwrap();
    fs::write(&primary, &bumped).unwrap();

    match wallet.generate_payment_address().await {
        Err(MaspError::UnsupportedStoreVersion { found, supported }) => {
            assert_eq!(found, 2);
            assert_eq!(supported, 1);
        }
        other => panic!("expected an unsupported version, got {:?}", other),
    }
    assert!(matches!(
        wallet.initialize().await,
        Err(MaspError::UnsupportedStoreVersion { .. })
    ));
    assert_eq!(fs::read(&primary).unwrap(), bumped);
}

#[tokio::test]
async fn test_merge_brings_in_keys_added_elsewhere() {
    let first_dir = tempdir().unwrap();
    let first = service(first_dir.path());
    let (_, phrase) = first.initialize().await.unwrap();
    let added = first.add_viewing_key(Some("travel")).await.unwrap();
    let remote = first.generate_payment_address_for(&added.id).await.unwrap();
    let snapshot = first.snapshot().await.unwrap();

    let second_dir = tempdir().unwrap();
    let second = service(second_dir.path());
    second.restore(&phrase).await.unwrap();
    let snapshots = wallet_dir(second_dir.path()).join("snapshots");
    fs::create_dir_all(&snapshots).unwrap();
    fs::copy(&snapshot, snapshots.join("from-first.json")).unwrap();

    let report = second.merge_addresses().await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.orphaned, 0);
    let keys = second.list_viewing_keys().await.unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[1].encoded, added.encoded);
    match second.find_alias("travel").await.unwrap() {
        AliasEntry::ViewingKey(key) => assert_eq!(key.id, added.id),
        other => panic!("expected a viewing key, got {:?}", other),
    }
    assert_eq!(second.generate_payment_address_for(&added.id).await.unwrap().index, remote.index + 1);
}

#[tokio::test]
async fn test_merge_rejects_forged_viewing_key() {
    let temp_dir = tempdir().unwrap();
    let wallet = service(temp_dir.path());
    wallet.initialize().await.unwrap();
    let snapshot = wallet.snapshot().await.unwrap();

    let mut state = decode_envelope(&fs::read(&snapshot).unwrap()).unwrap();
    let mut forged = state.active_key().unwrap().clone();
    forged.id = "m/32'/877'/5'".to_string();
    forged.account = 5;
    forged.alias = None;
    state.viewing_keys.insert(forged.id.clone(), forged.clone());
    state
        .addresses
        .insert(PaymentAddress::new(&forged.id, 0, "znam1attacker".to_string()))
        .unwrap();
    fs::write(snapshot.with_file_name("forged.json"), encode_envelope(&state).unwrap()).unwrap();

    let primary = wallet_dir(temp_dir.path()).join("wallet.json");
    let before = fs::read(&primary).unwrap();
    match wallet.merge_addresses().await {
        Err(MaspError::DerivationMismatch { viewing_key, incoming, .. }) => {
            assert_eq!(viewing_key, forged.id);
            assert_eq!(incoming, forged.encoded);
        }
        other => panic!("expected a derivation mismatch, got {:?}", other),
    }
    assert_eq!(fs::read(&primary).unwrap(), before);
    assert_eq!(wallet.list_viewing_keys().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_merge_drops_addresses_without_a_key() {
    let temp_dir = tempdir().unwrap();
    let wallet = service(temp_dir.path());
    wallet.initialize().await.unwrap();
    let snapshot = wallet.snapshot().await.unwrap();

    let mut state = decode_envelope(&fs::read(&snapshot).unwrap()).unwrap();
    state
        .addresses
        .insert(PaymentAddress::new("m/32'/877'/9'", 0, "znam1stray".to_string()))
        .unwrap();
    fs::write(snapshot.with_file_name("stray.json"), encode_envelope(&state).unwrap()).unwrap();

    let report = wallet.merge_addresses().await.unwrap();
    assert_eq!(report.orphaned, 1);
    assert_eq!(report.added, 0);

    let stored = fs::read_to_string(wallet_dir(temp_dir.path()).join("wallet.json")).unwrap();
    assert!(!stored.contains("znam1stray"));
    assert!(!wallet.print_payment_addresses().await.unwrap().contains("znam1stray"));
}
