use clap::Parser;
use colored::*;
use masp_wallet::cli::{Cli, CliHandler};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "masp_wallet=debug" } else { "masp_wallet=warn" })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let result = match CliHandler::new(&args) {
        Ok(handler) => handler.handle(&args).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red(), e);
        std::process::exit(1);
    }
}
