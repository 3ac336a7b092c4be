//! Leader model: a tracked exchange account whose trades are mirrored.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a leader. Transitions are one-directional toward
/// `Banned`/`Suspended`: an account that was banned or suspended never
/// silently becomes active again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderStatus {
    Active,
    Inactive,
    Banned,
    Suspended,
}

impl LeaderStatus {
    /// Whether a transition to `next` is permitted.
    pub fn can_transition_to(&self, next: LeaderStatus) -> bool {
        use LeaderStatus::*;
        match (self, next) {
            (Active, _) => true,
            (Inactive, Active) | (Inactive, Banned) | (Inactive, Suspended) => true,
            (Inactive, Inactive) => true,
            // Terminal-ish states never revert.
            (Banned, Banned) | (Suspended, Suspended) => true,
            (Banned, _) | (Suspended, _) => false,
        }
    }

    /// Only active leaders are candidates for the follow set.
    pub fn is_followable(&self) -> bool {
        matches!(self, LeaderStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaderStatus::Active => "active",
            LeaderStatus::Inactive => "inactive",
            LeaderStatus::Banned => "banned",
            LeaderStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(LeaderStatus::Active),
            "inactive" => Some(LeaderStatus::Inactive),
            "banned" => Some(LeaderStatus::Banned),
            "suspended" => Some(LeaderStatus::Suspended),
            _ => None,
        }
    }
}

/// Performance metrics for a leader over the lookback window.
///
/// A metrics value is stamped once per ranking cycle and replaced wholesale
/// on the next cycle; it is never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderMetrics {
    pub address: String,

    pub total_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub weekly_pnl: Decimal,
    pub monthly_pnl: Decimal,

    /// Annualized risk-adjusted return.
    pub sharpe_ratio: f64,

    /// Maximum drawdown as a fraction of peak equity (0-1).
    pub max_drawdown: f64,

    /// Fraction of closed trades that were profitable (0-1).
    pub win_rate: f64,

    pub total_trades: u32,
    pub avg_trade_size: Decimal,

    /// Standard deviation of per-trade returns.
    pub volatility: f64,

    pub last_updated: DateTime<Utc>,
}

impl LeaderMetrics {
    pub fn empty(address: String) -> Self {
        Self {
            address,
            total_pnl: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            weekly_pnl: Decimal::ZERO,
            monthly_pnl: Decimal::ZERO,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            win_rate: 0.0,
            total_trades: 0,
            avg_trade_size: Decimal::ZERO,
            volatility: 0.0,
            last_updated: Utc::now(),
        }
    }
}

/// A tracked leader account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leader {
    /// On-chain address, the unique identifier.
    pub address: String,

    pub status: LeaderStatus,

    /// Account equity at last poll.
    pub equity: Decimal,

    /// Operator-set sizing weight override in [0, 1]. None means the
    /// ranker derives the weight from relative score.
    pub weight: Option<f64>,

    pub metrics: Option<LeaderMetrics>,

    pub last_activity: Option<DateTime<Utc>>,
}

impl Leader {
    pub fn new(address: String) -> Self {
        Self {
            address,
            status: LeaderStatus::Active,
            equity: Decimal::ZERO,
            weight: None,
            metrics: None,
            last_activity: None,
        }
    }

    /// Apply a status transition, rejecting reverts out of Banned/Suspended.
    pub fn set_status(&mut self, next: LeaderStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Truncated address for display.
    pub fn display_name(&self) -> String {
        if self.address.len() > 10 {
            format!(
                "{}...{}",
                &self.address[..6],
                &self.address[self.address.len() - 4..]
            )
        } else {
            self.address.clone()
        }
    }
}
