//! On-disk secret store.
//!
//! The wallet lives in a single JSON envelope carrying a format tag, a
//! version and a SHA-256 checksum of the state. Writes go through a temp
//! file that is fsynced and renamed over the target, so a reader sees the
//! old state or the new one and nothing in between. The last good file is
//! kept as `<file>.bak` and used once to recover from a damaged primary.

use crate::config::StoreConfig;
use crate::error::{MaspError, MaspResult};
use crate::storage::WalletState;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;

pub const STORE_FORMAT: &str = "masp-wallet";
pub const STORE_VERSION: u32 = 1;


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEnvelope {

    pub format: String,

    pub version: u32,

    pub checksum: String,

    pub state: WalletState,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {

    pub location: PathBuf,

    pub exists: bool,

    pub version: Option<u32>,

    pub checksum: Option<String>,

    pub recovered_from_backup: bool,

    pub viewing_keys: usize,

    pub addresses: usize,
}

impl IntegrityReport {

    pub fn message(&self) -> String {
        if !self.exists {
            return format!("Directory '{}' does not exist.", self.location.display());
        }
        match &self.checksum {
            Some(checksum) => format!(
                "Directory '{}' exists. Wallet v{} verified ({} viewing key(s), {} address(es), checksum {}){}.",
                self.location.display(),
                self.version.unwrap_or(STORE_VERSION),
                self.viewing_keys,
                self.addresses,
                &checksum[..checksum.len().min(12)],
                if self.recovered_from_backup { ", restored from backup" } else { "" }
            ),
            None => format!("Directory '{}' exists. No wallet stored yet.", self.location.display()),
        }
    }
}

/// A wallet copy found in the snapshot directory.
#[derive(Debug, Clone)]
pub struct Snapshot {

    pub path: PathBuf,

    pub state: WalletState,
}


#[derive(Debug, Clone)]
pub struct SecretStore {

    storage_dir: PathBuf,

    file_name: String,

    snapshot_dir: PathBuf,
}

enum Loaded {
    Missing,
    Valid(WalletState),
    Damaged(MaspError),
}

impl SecretStore {
    /// Opens the store without touching the disk; directories are created on
    /// first write so that probing an absent wallet has no side effects.
    pub fn open(config: &StoreConfig) -> Self {
        Self {
            storage_dir: config.wallet_dir.clone(),
            file_name: config.file_name.clone(),
            snapshot_dir: config.wallet_dir.join(&config.snapshot_dir),
        }
    }


    pub fn location(&self) -> &Path {
        &self.storage_dir
    }


    pub fn wallet_path(&self) -> PathBuf {
        self.storage_dir.join(&self.file_name)
    }


    pub fn backup_path(&self) -> PathBuf {
        self.storage_dir.join(format!("{}.bak", self.file_name))
    }


    fn temp_path(&self, target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_name.clone());
        target.with_file_name(format!(".{}.tmp", name))
    }


    pub fn exists(&self) -> bool {
        self.wallet_path().exists()
    }

    /// Loads the wallet. A damaged or missing primary is recovered from the
    /// backup once; if that fails too the store is reported corrupted.
    pub fn load(&self) -> MaspResult<Option<WalletState>> {
        Ok(self.load_with_recovery()?.map(|(state, _)| state))
    }

    fn load_with_recovery(&self) -> MaspResult<Option<(WalletState, bool)>> {
        let reason = match self.read_envelope(&self.wallet_path())? {
            Loaded::Valid(state) => return Ok(Some((state, false))),
            Loaded::Damaged(err @ MaspError::UnsupportedStoreVersion { .. }) => return Err(err),
            Loaded::Damaged(err) => err.to_string(),
            Loaded::Missing if !self.backup_path().exists() => return Ok(None),
            Loaded::Missing => "Wallet file is missing".to_string(),
        };

        tracing::warn!(
            path = %self.wallet_path().display(),
            reason = %reason,
            "wallet file failed verification, trying backup"
        );

        match self.read_envelope(&self.backup_path())? {
            Loaded::Valid(state) => {
                let bytes = encode_envelope(&state)?;
                self.write_atomic(&self.wallet_path(), &bytes)?;
                tracing::warn!(path = %self.backup_path().display(), "wallet restored from backup");
                Ok(Some((state, true)))
            }
            Loaded::Missing => Err(MaspError::StoreCorrupted(format!(
                "{} (no backup available)",
                reason
            ))),
            Loaded::Damaged(backup_err) => Err(MaspError::StoreCorrupted(format!(
                "{}; backup unusable: {}",
                reason, backup_err
            ))),
        }
    }

    /// Atomically replaces the stored wallet, keeping the previous good copy
    /// as backup. Without a primary the backup is left in place, and a backup
    /// of another seed is archived as a snapshot first.
    pub fn save(&self, state: &WalletState) -> MaspResult<()> {
        state.addresses.validate()?;
        let bytes = encode_envelope(state)?;

        let primary = self.wallet_path();
        match fs::read(&primary) {
            Ok(current) => {
                if decode_envelope(&current).is_ok() {
                    self.write_atomic(&self.backup_path(), &current)?;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Loaded::Valid(orphan) = self.read_envelope(&self.backup_path())? {
                    if orphan.seed_fingerprint != state.seed_fingerprint {
                        let archived = self.snapshot(&orphan, "orphaned-backup")?;
                        tracing::warn!(path = %archived.display(), "backup of another wallet archived");
                    }
                }
            }
            Err(e) => {
                return Err(MaspError::Storage(format!(
                    "Failed to read {}: {}",
                    primary.display(),
                    e
                )))
            }
        }

        self.write_atomic(&primary, &bytes)?;
        tracing::debug!(
            path = %primary.display(),
            addresses = state.addresses.len(),
            "wallet state saved"
        );
        Ok(())
    }


    pub fn verify_integrity(&self) -> MaspResult<IntegrityReport> {
        let mut report = IntegrityReport {
            location: self.storage_dir.clone(),
            exists: self.storage_dir.is_dir(),
            version: None,
            checksum: None,
            recovered_from_backup: false,
            viewing_keys: 0,
            addresses: 0,
        };
        if !report.exists {
            return Ok(report);
        }

        if let Some((state, recovered)) = self.load_with_recovery()? {
            report.version = Some(STORE_VERSION);
            report.checksum = Some(state.checksum()?);
            report.recovered_from_backup = recovered;
            report.viewing_keys = state.viewing_keys.len();
            report.addresses = state.addresses.len();
        }
        Ok(report)
    }

    /// Writes a copy of `state` into the snapshot directory.
    pub fn snapshot(&self, state: &WalletState, label: &str) -> MaspResult<PathBuf> {
        let safe_label: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let path = self.snapshot_dir.join(format!("{}-{}.json", stamp, safe_label));

        self.write_atomic(&path, &encode_envelope(state)?)?;
        tracing::info!(path = %path.display(), "wallet snapshot written");
        Ok(path)
    }

    /// Every readable snapshot, oldest first. Damaged ones are skipped.
    pub fn load_snapshots(&self) -> MaspResult<(Vec<Snapshot>, usize)> {
        if !self.snapshot_dir.is_dir() {
            return Ok((Vec::new(), 0));
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.snapshot_dir)
            .map_err(|e| MaspError::Storage(format!("Failed to read snapshot directory: {}", e)))?
        {
            let entry = entry
                .map_err(|e| MaspError::Storage(format!("Failed to read directory entry: {}", e)))?;
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut snapshots = Vec::new();
        let mut skipped = 0;
        for path in paths {
            match self.read_envelope(&path)? {
                Loaded::Valid(state) => snapshots.push(Snapshot { path, state }),
                Loaded::Damaged(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable snapshot");
                    skipped += 1;
                }
                Loaded::Missing => {}
            }
        }
        Ok((snapshots, skipped))
    }

    fn read_envelope(&self, path: &Path) -> MaspResult<Loaded> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Loaded::Missing),
            Err(e) => {
                return Err(MaspError::Storage(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Ok(match decode_envelope(&bytes) {
            Ok(state) => Loaded::Valid(state),
            Err(err) => Loaded::Damaged(err),
        })
    }

    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> MaspResult<()> {
        let dir = target
            .parent()
            .ok_or_else(|| MaspError::Storage(format!("{} has no parent directory", target.display())))?;
        fs::create_dir_all(dir)
            .map_err(|e| MaspError::Storage(format!("Failed to create storage directory: {}", e)))?;

        let temp = self.temp_path(target);
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp)
                .map_err(|e| MaspError::Storage(format!("Failed to create {}: {}", temp.display(), e)))?;
            file.write_all(bytes)
                .map_err(|e| MaspError::Storage(format!("Failed to write {}: {}", temp.display(), e)))?;
            file.sync_all()
                .map_err(|e| MaspError::Storage(format!("Failed to sync {}: {}", temp.display(), e)))?;
        }

        if let Err(e) = fs::rename(&temp, target) {
            let _ = fs::remove_file(&temp);
            return Err(MaspError::Storage(format!(
                "Failed to move {} into place: {}",
                target.display(),
                e
            )));
        }

        sync_directory(dir)
    }
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> MaspResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| MaspError::Storage(format!("Failed to sync directory {}: {}", dir.display(), e)))
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> MaspResult<()> {
    Ok(())
}


pub fn encode_envelope(state: &WalletState) -> MaspResult<Vec<u8>> {
    let envelope = StoreEnvelope {
        format: STORE_FORMAT.to_string(),
        version: STORE_VERSION,
        checksum: state.checksum()?,
        state: state.clone(),
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

/// Parses and verifies an envelope. The version is checked before the
/// state is interpreted, so newer layouts fail as unsupported rather than
/// corrupted.
pub fn decode_envelope(bytes: &[u8]) -> MaspResult<WalletState> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| MaspError::StoreCorrupted(format!("Unreadable wallet file: {}", e)))?;

    if value.get("format").and_then(|f| f.as_str()) != Some(STORE_FORMAT) {
        return Err(MaspError::StoreCorrupted("Missing or unknown format tag".to_string()));
    }
    let version = value
        .get("version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| MaspError::StoreCorrupted("Missing format version".to_string()))?;
    if version != u64::from(STORE_VERSION) {
        return Err(MaspError::UnsupportedStoreVersion {
            found: u32::try_from(version).unwrap_or(u32::MAX),
            supported: STORE_VERSION,
        });
    }

    let envelope: StoreEnvelope = serde_json::from_value(value)
        .map_err(|e| MaspError::StoreCorrupted(format!("Malformed wallet state: {}", e)))?;

    let actual = envelope.state.checksum()?;
    if !bool::from(actual.as_bytes().ct_eq(envelope.checksum.as_bytes())) {
        return Err(MaspError::StoreCorrupted("Checksum mismatch".to_string()));
    }
    envelope.state.addresses.validate()?;
    Ok(envelope.state)
}
