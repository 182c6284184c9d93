//! CLI command handling for the MASP wallet

use clap::{Parser, Subcommand};
use colored::*;
use crate::bridge::{self, StatusSink};
use crate::config::WalletConfig;
use crate::error::{MaspError, MaspResult};
use crate::storage::AliasEntry;
use crate::wallet::WalletService;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "masp-wallet")]
#[command(about = "Shielded address wallet: recovery phrase, viewing keys and payment addresses")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new wallet and print its recovery phrase
    Init,

    Restore {
        phrase: String,
    },

    VerifySeed {
        phrase: String,
    },

    ViewingKeys,

    AddKey {
        #[arg(long)]
        alias: Option<String>,
    },

    NewAddress {
        /// Viewing key identifier, defaults to the active key
        #[arg(long, conflicts_with = "alias")]
        key: Option<String>,

        #[arg(long)]
        alias: Option<String>,

        /// Move an alias that already names an address to a new one
        #[arg(long, requires = "alias")]
        force: bool,
    },

    /// Look up a key or address by alias
    Find {
        alias: String,
    },

    CreateSpendingKey {
        alias: String,

        /// Account index, defaults to the active key's account
        #[arg(long)]
        account: Option<u32>,
    },

    /// Print a spending key; anyone holding it can spend
    RevealSpendingKey {
        alias: String,
    },

    Addresses {
        /// Only the active key, one address per line
        #[arg(long)]
        active: bool,
    },

    Merge,

    Snapshot,

    Check,

    /// Run a bridge command and print its JSON outcome
    Invoke {
        command: String,

        #[arg(long, default_value = "{}")]
        args: String,
    },
}


struct ConsoleSink;

impl StatusSink for ConsoleSink {
    fn status(&self, command: &str, line: &str) {
        eprintln!("{} {}", format!("[{}]", command).dimmed(), line);
    }
}


pub struct CliHandler {
    wallet: WalletService,
}

impl CliHandler {

    pub fn new(cli: &Cli) -> MaspResult<Self> {
        let config = WalletConfig::load(cli.config.as_deref())?;
        Ok(Self {
            wallet: WalletService::new(config)?,
        })
    }


    pub async fn handle(&self, cli: &Cli) -> MaspResult<()> {
        match &cli.command {
            Commands::Init => {
                let (message, phrase) = self.wallet.initialize().await?;
                println!("{}", message.green());
                println!("{}", "Recovery phrase:".blue());
                println!("  {}", phrase);
                println!("{}", "Write this down and keep it safe, it is shown only once.".yellow());
            }
            Commands::Restore { phrase } => {
                let message = self.wallet.restore(phrase).await?;
                println!("{}", message.green());
            }
            Commands::VerifySeed { phrase } => {
                if self.wallet.verify_mnemonic(phrase).await? {
                    println!("{}", "Recovery phrase matches this wallet".green());
                } else {
                    println!("{}", "Recovery phrase does not match this wallet".red());
                }
            }
            Commands::ViewingKeys => {
                let keys = self.wallet.list_viewing_keys().await?;
                println!("{}", format!("Viewing keys ({}):", keys.len()).blue());
                for key in keys {
                    println!("  {} {}", key.id.cyan(), key.encoded);
                }
            }
            Commands::AddKey { alias } => {
                let key = self.wallet.add_viewing_key(alias.as_deref()).await?;
                println!("{}", format!("Viewing key {} added", key.id).green());
                println!("  {}", key.encoded);
            }
            Commands::NewAddress { key, alias, force } => {
                let record = match (key, alias) {
                    (Some(id), _) => self.wallet.generate_payment_address_for(id).await?,
                    (None, Some(alias)) => self.wallet.generate_named_address(alias, *force).await?,
                    (None, None) => self.wallet.generate_payment_address().await?,
                };
                println!(
                    "{}",
                    format!("Payment address {}/{}", record.viewing_key_id, record.index).green()
                );
                println!("  {}", record.address);
            }
            Commands::Find { alias } => match self.wallet.find_alias(alias).await? {
                AliasEntry::ViewingKey(key) => {
                    println!("{}", format!("Viewing key {}", key.id).green());
                    println!("  {}", key.encoded);
                }
                AliasEntry::SpendingKey(record) => {
                    println!(
                        "{}",
                        format!("Spending key for account {} (viewing key {})", record.account, record.viewing_key_id).green()
                    );
                }
                AliasEntry::PaymentAddress(record) => {
                    println!(
                        "{}",
                        format!("Payment address {}/{}", record.viewing_key_id, record.index).green()
                    );
                    println!("  {}", record.address);
                }
            },
            Commands::CreateSpendingKey { alias, account } => {
                let record = self.wallet.create_spending_key(alias, *account).await?;
                println!(
                    "{}",
                    format!("Spending key '{}' created for account {}", record.alias, record.account).green()
                );
            }
            Commands::RevealSpendingKey { alias } => {
                let key = self.wallet.reveal_spending_key(alias).await?;
                println!("{}", "Anyone holding this key can spend from the account.".yellow());
                println!("  {}", key.as_str());
            }
            Commands::Addresses { active } => {
                if *active {
                    for record in self.wallet.list_addresses().await? {
                        println!("{}", record.address);
                    }
                } else {
                    let listing = self.wallet.print_payment_addresses().await?;
                    if listing.is_empty() {
                        println!("{}", "No payment addresses yet".yellow());
                    } else {
                        println!("{}", listing);
                    }
                }
            }
            Commands::Merge => {
                let report = self.wallet.merge_addresses().await?;
                println!("{}", report.to_string().green());
            }
            Commands::Snapshot => {
                let path = self.wallet.snapshot().await?;
                println!("{}", format!("Snapshot written to {}", path.display()).green());
            }
            Commands::Check => {
                let report = self.wallet.check_dir().await?;
                let message = report.message();
                if report.exists {
                    println!("{}", message.green());
                } else {
                    println!("{}", message.yellow());
                }
            }
            Commands::Invoke { command, args } => {
                let args: serde_json::Value = serde_json::from_str(args)
                    .map_err(|e| MaspError::Serialization(format!("Invalid --args JSON: {}", e)))?;
                let outcome = bridge::invoke(&self.wallet, command, args, &ConsoleSink).await;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
        }
        Ok(())
    }
}
