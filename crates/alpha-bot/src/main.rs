//! Alpha trading/airdrop automation - entry point.

use alpha_bot::{context, AppConfig, RunContext};
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

/// Automated claiming and trading for managed exchange accounts.
#[derive(Parser, Debug)]
#[command(name = "alpha-bot", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (also via ALPHA_CONFIG env var).
    #[arg(short, long)]
    config: Option<String>,

    /// Validate configuration and discovery without claiming or trading.
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Timed airdrop claim: per-account discovery at the target instant.
    Claim,
    /// Timed airdrop claim: shared discovery, first claimable id wins.
    SkiplistClaim,
    /// Run the buy/sell auto-trader for all enabled accounts.
    Trade,
    /// Print per-account day order statistics for the target token.
    OrderStats,
    /// Print the public alpha token list as JSON.
    TokenInfo,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before any stream connections.
    alpha_ws::init_crypto();

    let cli = Cli::parse();
    alpha_telemetry::init_logging()?;

    info!("starting alpha-bot v{}", env!("CARGO_PKG_VERSION"));

    let config_path = cli
        .config
        .or_else(|| std::env::var("ALPHA_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());
    info!(config_path = %config_path, "loading configuration");
    let config = AppConfig::load(&config_path)?;

    let ctx = RunContext::new(cli.dry_run);
    context::install_signal_handler(ctx.clone());

    match cli.command {
        Command::Claim => alpha_bot::run_claim(&config, &ctx, false).await?,
        Command::SkiplistClaim => alpha_bot::run_claim(&config, &ctx, true).await?,
        Command::Trade => alpha_bot::run_trade(&config, &ctx).await?,
        Command::OrderStats => alpha_bot::run_order_stats(&config).await?,
        Command::TokenInfo => alpha_bot::run_token_info().await?,
    }

    Ok(())
}
