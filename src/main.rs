//! Hyperliquid copy-trading bot.
//!
//! Follows high-performing accounts, mirrors their position changes
//! proportionally to follower equity, and gates every order through a
//! risk manager with idempotent execution.

mod api;
mod bot;
mod config;
mod db;
mod error;
mod execution;
mod leaders;
mod metrics;
mod models;
mod risk;
mod signals;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::DataSource;
use crate::bot::Bot;
use crate::config::Config;
use crate::db::Database;
use crate::models::LeaderStatus;

/// Hyperliquid copy-trading bot CLI.
#[derive(Parser)]
#[command(name = "hypercopier")]
#[command(about = "Copy trades from successful Hyperliquid accounts", long_about = None)]
struct Cli {
    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the copy-trading loop
    Run {
        /// Simulate fills instead of sending orders
        #[arg(long)]
        dry_run: bool,

        /// Tick interval in seconds
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Add a leader to track
    Track {
        /// Leader's account address
        address: String,

        /// Sizing weight override in [0, 1]; omit to derive from score
        #[arg(short, long)]
        weight: Option<f64>,
    },

    /// Remove a leader from tracking
    Untrack {
        /// Leader's account address
        address: String,
    },

    /// List tracked leaders
    List,

    /// Show recently generated signals
    Signals {
        /// Maximum number of signals to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show bot state from the database
    Status,

    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = Config::from_env()?;

    match cli.command {
        Commands::Run { dry_run, interval } => {
            if dry_run {
                config.dry_run = true;
            }
            if let Some(secs) = interval {
                config.tick_interval_secs = secs.max(1);
            }

            let mut bot = Bot::new(config).await?;
            bot.initialize().await?;
            bot.run().await?;
        }

        Commands::Track { address, weight } => {
            if let Some(w) = weight {
                if !(0.0..=1.0).contains(&w) {
                    anyhow::bail!("weight must be in [0, 1], got {w}");
                }
            }
            let db = Database::new(&config.database_url).await?;
            let existing = db.get_leader(&address).await?;
            db.save_leader(&address, weight).await?;
            info!(address = %address, ?weight, "leader tracked");
            let shown = weight.map_or("derived".to_string(), |w| w.to_string());
            if existing.is_some() {
                println!("Updated: {address} (weight {shown})");
            } else {
                println!("Now tracking: {address} (weight {shown})");
            }
        }

        Commands::Untrack { address } => {
            let db = Database::new(&config.database_url).await?;
            if db.untrack_leader(&address).await? {
                println!("Stopped tracking: {address}");
            } else {
                println!("Not tracked: {address}");
            }
        }

        Commands::List => {
            let db = Database::new(&config.database_url).await?;
            let leaders = db.get_tracked_leaders().await?;
            if leaders.is_empty() {
                println!("No leaders tracked. Use 'hypercopier track <address>' to add one.");
                return Ok(());
            }

            println!(
                "\n{:<44} {:<10} {:>12} {:>8} {:>8} {:>8}",
                "ADDRESS", "STATUS", "EQUITY", "WEIGHT", "SHARPE", "WIN%"
            );
            println!("{}", "-".repeat(96));
            for leader in leaders {
                let (sharpe, win_rate) = match db.get_latest_metrics(&leader.address).await? {
                    Some((sharpe, _, win_rate)) => {
                        (format!("{sharpe:.2}"), format!("{:.1}", win_rate * 100.0))
                    }
                    None => ("-".to_string(), "-".to_string()),
                };
                let weight = leader
                    .weight
                    .map_or("derived".to_string(), |w| format!("{w:.2}"));
                println!(
                    "{:<44} {:<10} {:>12.2} {:>8} {:>8} {:>8}",
                    leader.address, leader.status, leader.equity, weight, sharpe, win_rate
                );
            }
        }

        Commands::Signals { limit } => {
            let db = Database::new(&config.database_url).await?;
            let signals = db.get_recent_signals(limit).await?;
            if signals.is_empty() {
                println!("No signals recorded yet.");
                return Ok(());
            }

            println!(
                "\n{:<18} {:<10} {:<16} {:>5} {:>14} {:>14}",
                "ID", "ASSET", "KIND", "SIDE", "SIZE", "PRICE"
            );
            println!("{}", "-".repeat(82));
            for s in signals {
                println!(
                    "{:<18} {:<10} {:<16} {:>5} {:>14} {:>14}",
                    &s.id[..16.min(s.id.len())],
                    s.asset,
                    s.kind,
                    s.side,
                    s.size,
                    s.price_display()
                );
            }
        }

        Commands::Status => {
            let source = DataSource::from_config(&config)?;
            let reachable = source.probe().await;
            let assets = match source.meta().await {
                Ok(meta) => meta.universe.len().to_string(),
                Err(_) => "-".to_string(),
            };

            println!("\nBot status");
            println!(
                "  Provider:       {} ({})",
                source.primary_name(),
                if reachable { "reachable" } else { "unreachable" }
            );
            println!("  Assets:         {assets}");

            match Database::new(&config.database_url).await {
                Ok(db) => {
                    println!("  Database:       reachable");
                    let leaders = db.get_tracked_leaders().await?;
                    let active = leaders
                        .iter()
                        .filter(|l| l.status == LeaderStatus::Active.as_str())
                        .count();
                    println!("  Leaders:        {} tracked, {active} active", leaders.len());
                    println!("  Fills today:    {}", db.execution_count_today().await?);
                    println!("  Errors today:   {}", db.failed_execution_count_today().await?);
                    if let Ok(state) = db.get_bot_state().await {
                        println!("  Running:        {}", state.is_running);
                        println!("  Equity:         {:.2}", state.equity);
                        println!("  Exposure:       {:.2}", state.current_exposure);
                        println!("  Daily P&L:      {:.2}", state.daily_pnl);
                        if let Some(at) = state.last_tick_at {
                            println!("  Last tick:      {at}");
                        }
                    }
                }
                Err(e) => println!("  Database:       unreachable ({e})"),
            }
        }

        Commands::Config => {
            println!("\nConfiguration");
            println!("  Chain:                  {:?}", config.chain);
            println!(
                "  Primary provider:       {}",
                config.node_api_url.as_deref().unwrap_or("public API")
            );
            println!("  Dry run:                {}", config.dry_run);
            println!("  Max daily loss:         {}", config.max_daily_loss);
            println!("  Max position size:      {}", config.max_position_size);
            println!("  Max total exposure:     {}", config.max_total_exposure);
            println!("  Slippage threshold:     {} bps", config.default_slippage_bps);
            println!("  Follow window:          {}s", config.follow_window_seconds);
            println!("  Rerank interval:        {}s", config.leader_update_interval);
            println!("  Min leader equity:      {}", config.min_leader_equity);
            println!("  Max leaders:            {}", config.max_leaders_to_follow);
            println!("  Lookback:               {} days", config.performance_lookback_days);
            println!("  Max retries:            {}", config.max_retries);
            println!("  Retry base delay:       {}s", config.retry_delay_seconds);
        }
    }

    Ok(())
}
