//! Wire types for the Hyperliquid /info endpoint.
//!
//! Requests are JSON bodies of the form `{"type": <query-kind>, ...}`;
//! responses are either a bare object or `{"data": [...]}`. Numeric fields
//! arrive as strings and are decoded into `Decimal`.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{OrderSide, OrderSnapshot, PositionSnapshot};

/// Query kinds the pipeline consumes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InfoRequest {
    #[serde(rename_all = "camelCase")]
    ClearinghouseState { user: String },
    #[serde(rename_all = "camelCase")]
    OpenOrders { user: String },
    #[serde(rename_all = "camelCase")]
    UserFills {
        user: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<i64>,
    },
    AllMids,
    #[serde(rename_all = "camelCase")]
    L2Book { coin: String },
    Meta,
}

impl InfoRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            InfoRequest::ClearinghouseState { .. } => "clearinghouseState",
            InfoRequest::OpenOrders { .. } => "openOrders",
            InfoRequest::UserFills { .. } => "userFills",
            InfoRequest::AllMids => "allMids",
            InfoRequest::L2Book { .. } => "l2Book",
            InfoRequest::Meta => "meta",
        }
    }
}

/// Clearinghouse state response: margin summary plus open positions.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub margin_summary: MarginSummary,
    #[serde(default)]
    pub asset_positions: Vec<AssetPosition>,
    /// Server timestamp in milliseconds; doubles as the poll sequence.
    #[serde(default)]
    pub time: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    #[serde(with = "rust_decimal::serde::str")]
    pub account_value: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub total_ntl_pos: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPosition {
    pub position: RawPosition,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPosition {
    pub coin: String,
    /// Signed size ("szi"): positive long, negative short.
    #[serde(rename = "szi", with = "rust_decimal::serde::str")]
    pub size: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub entry_px: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub position_value: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub unrealized_pnl: Option<Decimal>,
}

impl RawPosition {
    pub fn into_snapshot(self, at: DateTime<Utc>) -> PositionSnapshot {
        let mark = match (self.position_value, self.size.is_zero()) {
            (Some(value), false) => (value / self.size).abs(),
            _ => self.entry_px.unwrap_or(Decimal::ZERO),
        };
        PositionSnapshot {
            asset: self.coin,
            size: self.size,
            entry_price: self.entry_px.unwrap_or(Decimal::ZERO),
            mark_price: mark,
            unrealized_pnl: self.unrealized_pnl.unwrap_or(Decimal::ZERO),
            timestamp: at,
        }
    }
}

/// One resting order from the openOrders query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOpenOrder {
    pub coin: String,
    /// "B" for bid, "A" for ask.
    pub side: String,
    #[serde(rename = "limitPx", with = "rust_decimal::serde::str")]
    pub limit_px: Decimal,
    #[serde(rename = "sz", with = "rust_decimal::serde::str")]
    pub size: Decimal,
    pub oid: u64,
    #[serde(default)]
    pub timestamp: i64,
}

impl RawOpenOrder {
    pub fn into_snapshot(self) -> Option<OrderSnapshot> {
        let side = OrderSide::parse(&self.side)?;
        let timestamp = Utc
            .timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or_else(Utc::now);
        Some(OrderSnapshot {
            order_id: self.oid,
            asset: self.coin,
            side,
            size: self.size,
            limit_price: self.limit_px,
            timestamp,
        })
    }
}

/// One historical fill from the userFills query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFill {
    pub coin: String,
    #[serde(rename = "px", with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(rename = "sz", with = "rust_decimal::serde::str")]
    pub size: Decimal,
    pub side: String,
    /// Milliseconds.
    pub time: i64,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub closed_pnl: Option<Decimal>,
    #[serde(default)]
    pub oid: u64,
}

impl RawFill {
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.time)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Exchange metadata (perp universe).
#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub universe: Vec<AssetMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMeta {
    pub name: String,
    #[serde(default)]
    pub sz_decimals: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn request_serializes_with_type_tag() {
        let req = InfoRequest::UserFills {
            user: "0xabc".to_string(),
            start_time: Some(1_700_000_000_000),
            end_time: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "userFills");
        assert_eq!(json["user"], "0xabc");
        assert_eq!(json["startTime"], 1_700_000_000_000i64);
        assert!(json.get("endTime").is_none());
    }

    #[test]
    fn user_state_parses_string_decimals() {
        let raw = serde_json::json!({
            "marginSummary": {"accountValue": "50000.5", "totalNtlPos": "12000"},
            "assetPositions": [
                {"position": {"coin": "ETH", "szi": "-2.5", "entryPx": "3000",
                              "positionValue": "7500", "unrealizedPnl": "-12.5"}}
            ],
            "time": 1700000000000i64
        });
        let state: UserState = serde_json::from_value(raw).unwrap();
        assert_eq!(state.margin_summary.account_value, dec!(50000.5));
        let snap = state.asset_positions[0]
            .position
            .clone()
            .into_snapshot(Utc::now());
        assert_eq!(snap.size, dec!(-2.5));
        assert_eq!(snap.mark_price, dec!(3000));
    }

    #[test]
    fn open_order_side_mapping() {
        let raw = serde_json::json!({
            "coin": "BTC", "side": "A", "limitPx": "64000", "sz": "0.1",
            "oid": 42u64, "timestamp": 1700000000000i64
        });
        let order: RawOpenOrder = serde_json::from_value(raw).unwrap();
        let snap = order.into_snapshot().unwrap();
        assert_eq!(snap.side, OrderSide::Sell);
        assert_eq!(snap.order_id, 42);
    }
}
