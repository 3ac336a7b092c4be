//! Bot configuration: risk limits, leader selection, execution parameters.
//!
//! Values load from the environment (with `.env` support) and are validated
//! before the orchestrator starts. Every limit here is consumed by the
//! pipeline; none are mutated at runtime.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::CopyError;

/// Which Hyperliquid chain to trade against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Chain {
    Mainnet,
    Testnet,
}

impl Chain {
    pub fn api_url(&self) -> &'static str {
        match self {
            Chain::Mainnet => "https://api.hyperliquid.xyz",
            Chain::Testnet => "https://api.hyperliquid-testnet.xyz",
        }
    }

    fn parse(s: &str) -> Result<Self, CopyError> {
        match s {
            "Mainnet" => Ok(Chain::Mainnet),
            "Testnet" => Ok(Chain::Testnet),
            other => Err(CopyError::Config(format!(
                "chain must be Mainnet or Testnet, got {other}"
            ))),
        }
    }
}

/// Main configuration for the copy-trade bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // === Chain / endpoints ===
    pub chain: Chain,

    /// Base URL of a local low-latency node (primary provider when set).
    pub node_api_url: Option<String>,

    /// Fall over to the public API when the node fails.
    pub fallback_to_public_api: bool,

    /// SQLite database URL.
    pub database_url: String,

    /// The follower account address. When set, equity is polled from
    /// the venue; otherwise `initial_equity` is used throughout.
    pub follower_address: Option<String>,

    /// Starting equity when no follower address is configured.
    pub initial_equity: Decimal,

    /// Subscribe to the WebSocket feed for push updates between polls.
    pub stream_enabled: bool,

    // === Risk management ===
    /// Max daily loss as a fraction of follower equity (0-1).
    pub max_daily_loss: Decimal,

    /// Max single-asset position as a fraction of follower equity (0-1).
    pub max_position_size: Decimal,

    /// Max total exposure as a fraction of follower equity (0-1).
    pub max_total_exposure: Decimal,

    /// Slippage threshold in basis points before a fill is flagged.
    pub default_slippage_bps: u32,

    /// Max age of a signal before it is discarded as stale (seconds).
    pub follow_window_seconds: i64,

    // === Leader selection ===
    /// How often to re-rank leaders (seconds).
    pub leader_update_interval: u64,

    /// Minimum account equity for a leader to be considered.
    pub min_leader_equity: Decimal,

    /// Maximum number of leaders to follow at once.
    pub max_leaders_to_follow: usize,

    /// Lookback window for performance metrics (days).
    pub performance_lookback_days: i64,

    /// Scoring weights. The source of these numbers is a judgment call,
    /// so they are configuration rather than constants.
    pub score_sharpe_weight: f64,
    pub score_drawdown_weight: f64,
    pub score_win_rate_weight: f64,

    // === Execution ===
    pub dry_run: bool,
    pub max_retries: u32,
    pub retry_delay_seconds: f64,

    // === Orchestration ===
    /// Main loop cadence (seconds).
    pub tick_interval_secs: u64,

    /// Per-leader fetch timeout within a tick (seconds).
    pub poll_timeout_secs: u64,

    /// How long in-flight executions may drain on shutdown (seconds).
    pub shutdown_grace_secs: u64,

    // === Leader filtering ===
    pub banned_leaders: Vec<String>,
    pub allowed_leaders: Vec<String>,
    pub leader_weights: HashMap<String, f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain: Chain::Mainnet,
            node_api_url: None,
            fallback_to_public_api: true,
            database_url: "sqlite:hypercopier.db?mode=rwc".to_string(),
            follower_address: None,
            initial_equity: dec!(10000),
            stream_enabled: false,

            max_daily_loss: dec!(0.05),
            max_position_size: dec!(0.1),
            max_total_exposure: dec!(0.5),
            default_slippage_bps: 50,
            follow_window_seconds: 5,

            leader_update_interval: 300,
            min_leader_equity: dec!(10000),
            max_leaders_to_follow: 10,
            performance_lookback_days: 30,
            score_sharpe_weight: 0.4,
            score_drawdown_weight: 0.3,
            score_win_rate_weight: 0.3,

            dry_run: false,
            max_retries: 3,
            retry_delay_seconds: 1.0,

            tick_interval_secs: 1,
            poll_timeout_secs: 5,
            shutdown_grace_secs: 10,

            banned_leaders: Vec::new(),
            allowed_leaders: Vec::new(),
            leader_weights: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from the environment, on top of defaults.
    pub fn from_env() -> Result<Self, CopyError> {
        dotenvy::dotenv().ok();

        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("HYPERLIQUID_CHAIN") {
            cfg.chain = Chain::parse(&v)?;
        }
        if let Ok(v) = std::env::var("NODE_API_URL") {
            if !v.trim().is_empty() {
                cfg.node_api_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("FALLBACK_TO_PUBLIC_API") {
            cfg.fallback_to_public_api = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            cfg.database_url = v;
        }
        if let Ok(v) = std::env::var("FOLLOWER_ADDRESS") {
            if !v.trim().is_empty() {
                cfg.follower_address = Some(v);
            }
        }
        if let Ok(v) = std::env::var("INITIAL_EQUITY") {
            cfg.initial_equity = parse_decimal("INITIAL_EQUITY", &v)?;
        }
        if let Ok(v) = std::env::var("STREAM_ENABLED") {
            cfg.stream_enabled = parse_bool(&v);
        }

        if let Ok(v) = std::env::var("MAX_DAILY_LOSS") {
            cfg.max_daily_loss = parse_decimal("MAX_DAILY_LOSS", &v)?;
        }
        if let Ok(v) = std::env::var("MAX_POSITION_SIZE") {
            cfg.max_position_size = parse_decimal("MAX_POSITION_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("MAX_TOTAL_EXPOSURE") {
            cfg.max_total_exposure = parse_decimal("MAX_TOTAL_EXPOSURE", &v)?;
        }
        if let Ok(v) = std::env::var("DEFAULT_SLIPPAGE_BPS") {
            cfg.default_slippage_bps = parse_num("DEFAULT_SLIPPAGE_BPS", &v)?;
        }
        if let Ok(v) = std::env::var("FOLLOW_WINDOW_SECONDS") {
            cfg.follow_window_seconds = parse_num("FOLLOW_WINDOW_SECONDS", &v)?;
        }

        if let Ok(v) = std::env::var("LEADER_UPDATE_INTERVAL") {
            cfg.leader_update_interval = parse_num("LEADER_UPDATE_INTERVAL", &v)?;
        }
        if let Ok(v) = std::env::var("MIN_LEADER_EQUITY") {
            cfg.min_leader_equity = parse_decimal("MIN_LEADER_EQUITY", &v)?;
        }
        if let Ok(v) = std::env::var("MAX_LEADERS_TO_FOLLOW") {
            cfg.max_leaders_to_follow = parse_num("MAX_LEADERS_TO_FOLLOW", &v)?;
        }
        if let Ok(v) = std::env::var("PERFORMANCE_LOOKBACK_DAYS") {
            cfg.performance_lookback_days = parse_num("PERFORMANCE_LOOKBACK_DAYS", &v)?;
        }

        if let Ok(v) = std::env::var("DRY_RUN") {
            cfg.dry_run = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("MAX_RETRIES") {
            cfg.max_retries = parse_num("MAX_RETRIES", &v)?;
        }
        if let Ok(v) = std::env::var("RETRY_DELAY_SECONDS") {
            cfg.retry_delay_seconds = parse_num("RETRY_DELAY_SECONDS", &v)?;
        }

        if let Ok(v) = std::env::var("BANNED_LEADERS") {
            cfg.banned_leaders = parse_list(&v);
        }
        if let Ok(v) = std::env::var("ALLOWED_LEADERS") {
            cfg.allowed_leaders = parse_list(&v);
        }
        if let Ok(v) = std::env::var("LEADER_WEIGHTS") {
            cfg.leader_weights = serde_json::from_str(&v).unwrap_or_default();
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// The public API base URL for the configured chain.
    pub fn public_api_url(&self) -> String {
        self.chain.api_url().to_string()
    }

    /// The WebSocket endpoint for the configured chain.
    pub fn ws_url(&self) -> String {
        format!("{}/ws", self.chain.api_url().replace("https://", "wss://"))
    }

    /// Validate limits, mirroring what a sane operator would expect.
    pub fn validate(&self) -> Result<(), CopyError> {
        for (name, v) in [
            ("max_daily_loss", self.max_daily_loss),
            ("max_position_size", self.max_position_size),
            ("max_total_exposure", self.max_total_exposure),
        ] {
            if v < Decimal::ZERO || v > Decimal::ONE {
                return Err(CopyError::Config(format!(
                    "{name} must be between 0 and 1, got {v}"
                )));
            }
        }
        if self.default_slippage_bps > 1000 {
            return Err(CopyError::Config(format!(
                "default_slippage_bps must be at most 1000, got {}",
                self.default_slippage_bps
            )));
        }
        if !(1..=60).contains(&self.follow_window_seconds) {
            return Err(CopyError::Config(format!(
                "follow_window_seconds must be between 1 and 60, got {}",
                self.follow_window_seconds
            )));
        }
        if !(60..=3600).contains(&self.leader_update_interval) {
            return Err(CopyError::Config(format!(
                "leader_update_interval must be between 60 and 3600, got {}",
                self.leader_update_interval
            )));
        }
        if !(1..=50).contains(&self.max_leaders_to_follow) {
            return Err(CopyError::Config(format!(
                "max_leaders_to_follow must be between 1 and 50, got {}",
                self.max_leaders_to_follow
            )));
        }
        if !(1..=365).contains(&self.performance_lookback_days) {
            return Err(CopyError::Config(format!(
                "performance_lookback_days must be between 1 and 365, got {}",
                self.performance_lookback_days
            )));
        }
        for (addr, w) in &self.leader_weights {
            if !(0.0..=1.0).contains(w) {
                return Err(CopyError::Config(format!(
                    "leader weight for {addr} must be in [0, 1], got {w}"
                )));
            }
        }
        Ok(())
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_decimal(name: &str, v: &str) -> Result<Decimal, CopyError> {
    v.parse()
        .map_err(|_| CopyError::Config(format!("invalid {name}: {v}")))
}

fn parse_num<T: std::str::FromStr>(name: &str, v: &str) -> Result<T, CopyError> {
    v.parse()
        .map_err(|_| CopyError::Config(format!("invalid {name}: {v}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_limits() {
        let mut cfg = Config::default();
        cfg.max_daily_loss = dec!(1.5);
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.default_slippage_bps = 5000;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.follow_window_seconds = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn list_parsing() {
        assert_eq!(parse_list("0xabc, 0xdef,"), vec!["0xabc", "0xdef"]);
        assert!(parse_list("  ").is_empty());
    }

    #[test]
    fn chain_urls() {
        assert_eq!(Chain::Testnet.api_url(), "https://api.hyperliquid-testnet.xyz");
        let cfg = Config::default();
        assert_eq!(cfg.public_api_url(), "https://api.hyperliquid.xyz");
        assert!(cfg.ws_url().starts_with("wss://"));
    }
}
