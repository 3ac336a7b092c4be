//! Point-in-time leader state used for diffing.
//!
//! Snapshots are held in memory only: the tracker keeps at most one prior
//! snapshot per leader and replaces it after each successful poll.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::OrderSide;

/// A single open position, keyed by asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub asset: String,

    /// Signed size: positive long, negative short.
    pub size: Decimal,

    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A single resting order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: u64,
    pub asset: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub limit_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Full observed state of a leader at one poll.
#[derive(Debug, Clone, Default)]
pub struct LeaderSnapshot {
    /// Positions by asset.
    pub positions: HashMap<String, PositionSnapshot>,

    /// Open orders by order id.
    pub orders: HashMap<u64, OrderSnapshot>,

    pub equity: Decimal,

    /// Monotonic per-leader sequence; responses that do not advance it
    /// are discarded as out-of-order.
    pub sequence: u64,

    pub polled_at: Option<DateTime<Utc>>,
}

impl LeaderSnapshot {
    pub fn new(
        positions: Vec<PositionSnapshot>,
        orders: Vec<OrderSnapshot>,
        equity: Decimal,
        sequence: u64,
    ) -> Self {
        Self {
            positions: positions.into_iter().map(|p| (p.asset.clone(), p)).collect(),
            orders: orders.into_iter().map(|o| (o.order_id, o)).collect(),
            equity,
            sequence,
            polled_at: Some(Utc::now()),
        }
    }

    /// Position size for an asset, zero when flat.
    pub fn position_size(&self, asset: &str) -> Decimal {
        self.positions
            .get(asset)
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO)
    }
}
