//! Trade signals: normalized, sized trade intents derived from leader deltas.

use std::collections::HashMap;

use alloy_primitives::keccak256;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" | "b" => Some(OrderSide::Buy),
            "sell" | "a" | "s" => Some(OrderSide::Sell),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// What kind of leader state change produced the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    NewOrder,
    ModifyOrder,
    CancelOrder,
    PositionUpdate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::NewOrder => "new_order",
            SignalKind::ModifyOrder => "modify_order",
            SignalKind::CancelOrder => "cancel_order",
            SignalKind::PositionUpdate => "position_update",
        }
    }
}

/// A normalized trade intent. Immutable once created; consumed exactly once
/// by the risk gate and execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Deterministic id: re-deriving from the same delta yields the same id,
    /// which is what makes replays and retries safe to de-duplicate.
    pub id: String,

    pub leader_address: String,
    pub kind: SignalKind,
    pub asset: String,
    pub side: OrderSide,

    /// Follower-sized quantity, always positive.
    pub size: Decimal,

    /// Reference price for slippage accounting; None for market-style intents.
    pub price: Option<Decimal>,

    pub timestamp: DateTime<Utc>,

    /// Leader order id for order-derived signals.
    pub order_id: Option<u64>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Signal {
    /// Derive the deterministic signal id from the triggering delta.
    ///
    /// `fingerprint` pins the id to the specific observed change: the
    /// snapshot sequence plus the raw delta quantity for position moves, or
    /// the leader order id for order events.
    pub fn derive_id(
        leader: &str,
        asset: &str,
        kind: SignalKind,
        fingerprint: &str,
    ) -> String {
        let preimage = format!("{leader}|{asset}|{}|{fingerprint}", kind.as_str());
        hex::encode(keccak256(preimage.as_bytes()))
    }

    /// Age of the signal relative to `now`.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_deterministic() {
        let a = Signal::derive_id("0xabc", "ETH", SignalKind::PositionUpdate, "17|2.5");
        let b = Signal::derive_id("0xabc", "ETH", SignalKind::PositionUpdate, "17|2.5");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn id_distinguishes_deltas() {
        let base = Signal::derive_id("0xabc", "ETH", SignalKind::PositionUpdate, "17|2.5");
        assert_ne!(
            base,
            Signal::derive_id("0xdef", "ETH", SignalKind::PositionUpdate, "17|2.5")
        );
        assert_ne!(
            base,
            Signal::derive_id("0xabc", "BTC", SignalKind::PositionUpdate, "17|2.5")
        );
        assert_ne!(
            base,
            Signal::derive_id("0xabc", "ETH", SignalKind::NewOrder, "17|2.5")
        );
        assert_ne!(
            base,
            Signal::derive_id("0xabc", "ETH", SignalKind::PositionUpdate, "18|2.5")
        );
    }

    #[test]
    fn side_parsing() {
        assert_eq!(OrderSide::parse("B"), Some(OrderSide::Buy));
        assert_eq!(OrderSide::parse("A"), Some(OrderSide::Sell));
        assert_eq!(OrderSide::parse("sell"), Some(OrderSide::Sell));
        assert_eq!(OrderSide::parse("hold"), None);
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
    }
}
