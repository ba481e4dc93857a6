use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::core::AppConfig;

pub mod auth;
pub mod chat;
pub mod stats;

#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat session
    Chat {},
    /// Sign in and sync the account profile
    Login {},
    /// Register a new account
    Register {},
    /// Show usage stats for the account
    Stats {},
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=warn", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    init_tracing();
    let config = AppConfig::default();

    // Handle each sub command; the default is an interactive chat session
    match args.command {
        Some(Command::Chat {}) | None => chat::run(&config).await?,
        Some(Command::Login {}) => auth::run_login(&config).await?,
        Some(Command::Register {}) => auth::run_register(&config).await?,
        Some(Command::Stats {}) => stats::run(&config).await?,
    }

    Ok(())
}
