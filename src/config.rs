//! Configuration for the MASP wallet core

use crate::error::{MaspError, MaspResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const ENV_WALLET_DIR: &str = "MASP_WALLET_DIR";
pub const ENV_NETWORK: &str = "MASP_WALLET_NETWORK";
pub const ENV_PASSPHRASE: &str = "MASP_WALLET_PASSPHRASE";


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {

    pub network: NetworkType,


    pub store: StoreConfig,


    pub derivation: DerivationConfig,


    pub security: SecurityConfig,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {

    pub wallet_dir: PathBuf,


    pub file_name: String,


    pub snapshot_dir: String,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivationConfig {

    pub coin_type: u32,


    pub default_account: u32,

    /// Highest number of payment addresses a single viewing key may hand out.
    pub max_addresses_per_key: u32,

    /// New wallets name their keys `<base_alias>-public` and `<base_alias>-spending`.
    pub base_alias: String,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Passphrase sealing the master secret at rest. Never written back to disk.
    #[serde(skip_serializing)]
    pub passphrase: String,


    pub kdf_iterations: u32,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
}

impl NetworkType {
    pub fn viewing_key_hrp(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "zvknam",
            NetworkType::Testnet => "zvktnam",
        }
    }

    pub fn payment_address_hrp(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "znam",
            NetworkType::Testnet => "ztnam",
        }
    }

    pub fn spending_key_hrp(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "zsknam",
            NetworkType::Testnet => "zsktnam",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::Mainnet => write!(f, "mainnet"),
            NetworkType::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for NetworkType {
    type Err = MaspError;

    fn from_str(s: &str) -> MaspResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(NetworkType::Mainnet),
            "testnet" => Ok(NetworkType::Testnet),
            other => Err(MaspError::Config(format!("Unknown network '{}'", other))),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            wallet_dir: PathBuf::from("./sdk-wallet"),
            file_name: "wallet.json".to_string(),
            snapshot_dir: "snapshots".to_string(),
        }
    }
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self {
            // Namada's registered SLIP-44 coin type
            coin_type: 877,
            default_account: 0,
            max_addresses_per_key: u32::MAX,
            base_alias: "wallet".to_string(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            passphrase: String::new(),
            kdf_iterations: 100_000, // 100k iterations for security
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::Mainnet,
            store: StoreConfig::default(),
            derivation: DerivationConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl WalletConfig {

    pub fn new(wallet_dir: impl Into<PathBuf>, network: NetworkType) -> Self {
        Self {
            network,
            store: StoreConfig {
                wallet_dir: wallet_dir.into(),
                ..StoreConfig::default()
            },
            ..Self::default()
        }
    }

    /// Loads the config file if one is given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> MaspResult<Self> {
        let mut config = match path {
            Some(path) => {
                let data = fs::read_to_string(path).map_err(|e| {
                    MaspError::Config(format!("Failed to read config {}: {}", path.display(), e))
                })?;
                serde_json::from_str(&data).map_err(|e| {
                    MaspError::Config(format!("Failed to parse config {}: {}", path.display(), e))
                })?
            }
            None => Self::default(),
        };

        if let Ok(dir) = std::env::var(ENV_WALLET_DIR) {
            config.store.wallet_dir = PathBuf::from(dir);
        }
        if let Ok(network) = std::env::var(ENV_NETWORK) {
            config.network = network.parse()?;
        }
        if let Ok(passphrase) = std::env::var(ENV_PASSPHRASE) {
            config.security.passphrase = passphrase;
        }

        config.validate()?;
        Ok(config)
    }


    pub fn validate(&self) -> MaspResult<()> {
        if self.store.file_name.trim().is_empty() {
            return Err(MaspError::Config("Store file name must not be empty".to_string()));
        }
        if self.store.snapshot_dir.trim().is_empty() {
            return Err(MaspError::Config("Snapshot directory must not be empty".to_string()));
        }
        if self.security.kdf_iterations == 0 {
            return Err(MaspError::Config("kdf_iterations must be at least 1".to_string()));
        }
        if self.derivation.max_addresses_per_key == 0 {
            return Err(MaspError::Config("max_addresses_per_key must be at least 1".to_string()));
        }
        crate::storage::normalize_alias(&self.derivation.base_alias)
            .map_err(|e| MaspError::Config(format!("base_alias: {}", e)))?;
        if self.derivation.coin_type >= bip32::ChildNumber::HARDENED_FLAG {
            return Err(MaspError::Config(format!(
                "coin_type {} does not fit a hardened derivation index",
                self.derivation.coin_type
            )));
        }
        Ok(())
    }
}
