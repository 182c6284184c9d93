// Key management core for a shielded-address wallet.

pub mod error;
pub mod config;
pub mod mnemonic;
pub mod hd_wallet;
pub mod addresses;
pub mod storage;
pub mod encrypted_storage;
pub mod wallet;
pub mod bridge;
pub mod cli;

pub use error::{ErrorKind, MaspError, MaspResult};
pub use config::{NetworkType, WalletConfig};
pub use hd_wallet::{MasterSecret, ViewingKey};
pub use addresses::{AddressManager, AddressSet, MergeReport, PaymentAddress};
pub use storage::{AliasEntry, SpendingKeyRecord, WalletState};
pub use encrypted_storage::{IntegrityReport, SecretStore};
pub use wallet::WalletService;
pub use bridge::{BridgeOutcome, BridgeRequest, BridgeResponse, NoopSink, StatusSink};
pub use cli::{Cli, CliHandler, Commands};
