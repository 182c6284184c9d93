//! Typed request/response contract for the UI bridge.
//!
//! The front-end calls `invoke("command_name", args)`; here each command is
//! a variant of [`BridgeRequest`] and every call ends in a [`BridgeOutcome`]
//! that is either a response or an error kind with a message.

use crate::addresses::MergeReport;
use crate::error::{ErrorKind, MaspError, MaspResult};
use crate::storage::{AliasEntry, SpendingKeyRecord};
use crate::wallet::WalletService;
use serde::{Deserialize, Serialize};
use serde_json::Value;


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum BridgeRequest {
    InitializeNamadaSdk,
    GetViewingKeys,
    GeneratePaymentAddress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
        #[serde(default)]
        force: bool,
    },
    PrintPaymentAddresses,
    MergeAddresses,
    CheckDir,
    Restore { phrase: String },
    FindAddress { alias: String },
    CreateSpendingKey {
        alias: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account: Option<u32>,
    },
}

impl BridgeRequest {

    pub fn command(&self) -> &'static str {
        match self {
            BridgeRequest::InitializeNamadaSdk => "initialize_namada_sdk",
            BridgeRequest::GetViewingKeys => "get_viewing_keys",
            BridgeRequest::GeneratePaymentAddress { .. } => "generate_payment_address",
            BridgeRequest::PrintPaymentAddresses => "print_payment_addresses",
            BridgeRequest::MergeAddresses => "merge_addresses",
            BridgeRequest::CheckDir => "check_dir",
            BridgeRequest::Restore { .. } => "restore",
            BridgeRequest::FindAddress { .. } => "find_address",
            BridgeRequest::CreateSpendingKey { .. } => "create_spending_key",
        }
    }

    /// Builds a request from the string form `invoke(command, args)`.
    pub fn from_invoke(command: &str, args: Value) -> MaspResult<Self> {
        let mut object = match args {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(MaspError::Serialization(format!(
                    "Arguments for '{}' must be an object, got {}",
                    command, other
                )))
            }
        };
        object.insert("command".to_string(), Value::String(command.to_string()));
        serde_json::from_value(Value::Object(object))
            .map_err(|e| MaspError::Serialization(format!("Unknown or malformed command '{}': {}", command, e)))
    }
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BridgeResponse {
    Initialized { message: String, mnemonic: String },
    ViewingKeys(Vec<String>),
    PaymentAddress(String),
    PaymentAddresses(String),
    Merged(MergeReport),
    DirectoryChecked { exists: bool, message: String },
    Restored(String),
    Alias(AliasEntry),
    SpendingKey(SpendingKeyRecord),
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BridgeOutcome {
    Ok { response: BridgeResponse },
    Error { kind: ErrorKind, message: String },
}

impl From<MaspResult<BridgeResponse>> for BridgeOutcome {
    fn from(result: MaspResult<BridgeResponse>) -> Self {
        match result {
            Ok(response) => BridgeOutcome::Ok { response },
            Err(err) => BridgeOutcome::Error {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

/// Receives human readable progress lines, in place of global UI handles.
pub trait StatusSink: Send + Sync {
    fn status(&self, command: &str, line: &str);
}


pub struct NoopSink;

impl StatusSink for NoopSink {
    fn status(&self, _command: &str, _line: &str) {}
}


pub async fn dispatch(wallet: &WalletService, request: BridgeRequest, sink: &dyn StatusSink) -> BridgeOutcome {
    let command = request.command();
    tracing::debug!(command, "bridge request");

    let outcome: BridgeOutcome = handle(wallet, request, sink).await.into();
    if let BridgeOutcome::Error { message, .. } = &outcome {
        sink.status(command, message);
    }
    outcome
}

async fn handle(wallet: &WalletService, request: BridgeRequest, sink: &dyn StatusSink) -> MaspResult<BridgeResponse> {
    let command = request.command();
    match request {
        BridgeRequest::InitializeNamadaSdk => {
            let (message, mnemonic) = wallet.initialize().await?;
            sink.status(command, &message);
            Ok(BridgeResponse::Initialized { message, mnemonic })
        }
        BridgeRequest::GetViewingKeys => {
            let keys = wallet.list_viewing_keys().await?;
            Ok(BridgeResponse::ViewingKeys(keys.into_iter().map(|key| key.encoded).collect()))
        }
        BridgeRequest::GeneratePaymentAddress { alias, force } => {
            let record = match alias {
                Some(alias) => wallet.generate_named_address(&alias, force).await?,
                None => wallet.generate_payment_address().await?,
            };
            sink.status(
                command,
                &format!("New payment address {}/{} generated", record.viewing_key_id, record.index),
            );
            Ok(BridgeResponse::PaymentAddress(record.address))
        }
        BridgeRequest::PrintPaymentAddresses => {
            Ok(BridgeResponse::PaymentAddresses(wallet.print_payment_addresses().await?))
        }
        BridgeRequest::MergeAddresses => {
            let report = wallet.merge_addresses().await?;
            sink.status(command, &report.to_string());
            Ok(BridgeResponse::Merged(report))
        }
        BridgeRequest::CheckDir => {
            let report = wallet.check_dir().await?;
            let message = report.message();
            sink.status(command, &message);
            Ok(BridgeResponse::DirectoryChecked {
                exists: report.exists,
                message,
            })
        }
        BridgeRequest::Restore { phrase } => {
            let message = wallet.restore(&phrase).await?;
            sink.status(command, &message);
            Ok(BridgeResponse::Restored(message))
        }
        BridgeRequest::FindAddress { alias } => Ok(BridgeResponse::Alias(wallet.find_alias(&alias).await?)),
        BridgeRequest::CreateSpendingKey { alias, account } => {
            let record = wallet.create_spending_key(&alias, account).await?;
            sink.status(
                command,
                &format!("Spending key '{}' created for account {}", record.alias, record.account),
            );
            Ok(BridgeResponse::SpendingKey(record))
        }
    }
}

/// String dispatch entry point; always answers with a JSON outcome.
pub async fn invoke(wallet: &WalletService, command: &str, args: Value, sink: &dyn StatusSink) -> Value {
    let outcome = match BridgeRequest::from_invoke(command, args) {
        Ok(request) => dispatch(wallet, request, sink).await,
        Err(err) => Err::<BridgeResponse, _>(err).into(),
    };
    serde_json::to_value(&outcome).unwrap_or_else(|e| {
        serde_json::json!({
            "status": "error",
            "kind": ErrorKind::Serialization,
            "message": e.to_string(),
        })
    })
}
