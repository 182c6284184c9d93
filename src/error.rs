//! Error handling for the MASP wallet core

use serde::{Deserialize, Serialize};
use thiserror::Error;


pub type MaspResult<T> = Result<T, MaspError>;


#[derive(Error, Debug, Clone)]
pub enum MaspError {
    #[error("Insufficient entropy: {0}")]
    InsufficientEntropy(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Wallet store corrupted: {0}")]
    StoreCorrupted(String),

    #[error(
        "Derivation mismatch for {viewing_key} at index {index}: {existing} != {incoming} ({conflicting} conflicting record(s))"
    )]
    DerivationMismatch {
        viewing_key: String,
        index: u32,
        existing: String,
        incoming: String,
        conflicting: usize,
    },

    #[error("No viewing key found, initialize the wallet first")]
    NoViewingKey,

    #[error("Unsupported store version {found} (this build reads version {supported}), migration required")]
    UnsupportedStoreVersion { found: u32, supported: u32 },

    #[error("Address index space exhausted for {viewing_key} (limit {limit})")]
    IndexExhausted { viewing_key: String, limit: u32 },

    #[error("Invalid alias: {0}")]
    InvalidAlias(String),

    #[error("Alias '{0}' is already in use")]
    AliasTaken(String),

    #[error("No key or address found for alias '{0}'")]
    AliasNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Task error: {0}")]
    Task(String),
}

/// Discriminant of [`MaspError`] as it crosses the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientEntropy,
    InvalidMnemonic,
    StoreCorrupted,
    DerivationMismatch,
    NoViewingKey,
    UnsupportedStoreVersion,
    IndexExhausted,
    InvalidAlias,
    AliasTaken,
    AliasNotFound,
    Config,
    Storage,
    Serialization,
    Crypto,
    Task,
}

impl MaspError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MaspError::InsufficientEntropy(_) => ErrorKind::InsufficientEntropy,
            MaspError::InvalidMnemonic(_) => ErrorKind::InvalidMnemonic,
            MaspError::StoreCorrupted(_) => ErrorKind::StoreCorrupted,
            MaspError::DerivationMismatch { .. } => ErrorKind::DerivationMismatch,
            MaspError::NoViewingKey => ErrorKind::NoViewingKey,
            MaspError::UnsupportedStoreVersion { .. } => ErrorKind::UnsupportedStoreVersion,
            MaspError::IndexExhausted { .. } => ErrorKind::IndexExhausted,
            MaspError::InvalidAlias(_) => ErrorKind::InvalidAlias,
            MaspError::AliasTaken(_) => ErrorKind::AliasTaken,
            MaspError::AliasNotFound(_) => ErrorKind::AliasNotFound,
            MaspError::Config(_) => ErrorKind::Config,
            MaspError::Storage(_) => ErrorKind::Storage,
            MaspError::Serialization(_) => ErrorKind::Serialization,
            MaspError::Crypto(_) => ErrorKind::Crypto,
            MaspError::Task(_) => ErrorKind::Task,
        }
    }

    /// Fatal errors must not be retried by the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MaspError::InsufficientEntropy(_)
                | MaspError::StoreCorrupted(_)
                | MaspError::DerivationMismatch { .. }
                | MaspError::UnsupportedStoreVersion { .. }
        )
    }
}

impl From<std::io::Error> for MaspError {
    fn from(err: std::io::Error) -> Self {
        MaspError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for MaspError {
    fn from(err: serde_json::Error) -> Self {
        MaspError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<bip39::Error> for MaspError {
    fn from(err: bip39::Error) -> Self {
        MaspError::InvalidMnemonic(err.to_string())
    }
}

impl From<bip32::Error> for MaspError {
    fn from(err: bip32::Error) -> Self {
        MaspError::Crypto(format!("BIP32 error: {}", err))
    }
}

impl From<bech32::EncodeError> for MaspError {
    fn from(err: bech32::EncodeError) -> Self {
        MaspError::Serialization(format!("bech32 encode error: {}", err))
    }
}

impl From<bech32::DecodeError> for MaspError {
    fn from(err: bech32::DecodeError) -> Self {
        MaspError::Serialization(format!("bech32 decode error: {}", err))
    }
}

impl From<tokio::task::JoinError> for MaspError {
    fn from(err: tokio::task::JoinError) -> Self {
        MaspError::Task(err.to_string())
    }
}
