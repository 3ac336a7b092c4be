//! Order placement against the /exchange endpoint.
//!
//! Every order carries a client order id (cloid). The venue deduplicates
//! on it, so resubmitting after an ambiguous failure can never double an
//! order. In dry-run mode nothing leaves the process; orders fill
//! immediately at their limit price.

use std::future::Future;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::api::info_client::InfoClient;
use crate::error::{CopyError, Result};
use crate::models::OrderSide;

/// Order placement seam. `ExchangeClient` is the live implementation;
/// the execution engine is generic over this so its retry loop can run
/// against scripted venues in tests.
pub trait OrderVenue {
    fn place_order(&self, order: &OrderRequest) -> impl Future<Output = Result<OrderStatus>> + Send;

    fn cancel_order(&self, coin: &str, cloid: &str) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub coin: String,
    pub is_buy: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub limit_px: Decimal,
    #[serde(rename = "sz", with = "rust_decimal::serde::str")]
    pub size: Decimal,
    pub reduce_only: bool,
    pub cloid: String,
}

impl OrderRequest {
    pub fn new(
        coin: &str,
        side: OrderSide,
        limit_px: Decimal,
        size: Decimal,
        cloid: String,
    ) -> Self {
        Self {
            coin: coin.to_string(),
            is_buy: side == OrderSide::Buy,
            limit_px,
            size,
            reduce_only: false,
            cloid,
        }
    }
}

/// Terminal state of one submitted order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    Filled {
        #[serde(rename = "totalSz", with = "rust_decimal::serde::str")]
        total_size: Decimal,
        #[serde(rename = "avgPx", with = "rust_decimal::serde::str")]
        avg_px: Decimal,
        oid: u64,
    },
    Resting {
        oid: u64,
    },
    Error(String),
}

#[derive(Debug)]
pub struct ExchangeClient {
    client: InfoClient,
    dry_run: bool,
}

impl ExchangeClient {
    pub fn new(client: InfoClient, dry_run: bool) -> Self {
        Self { client, dry_run }
    }

    /// Submit one IOC order. Idempotent under the request's cloid.
    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderStatus> {
        if self.dry_run {
            info!(
                coin = %order.coin,
                size = %order.size,
                px = %order.limit_px,
                cloid = %order.cloid,
                "dry run: simulating fill"
            );
            return Ok(OrderStatus::Filled {
                total_size: order.size,
                avg_px: order.limit_px,
                oid: 0,
            });
        }

        let body = json!({
            "action": {
                "type": "order",
                "orders": [{
                    "coin": order.coin,
                    "isBuy": order.is_buy,
                    "limitPx": order.limit_px.to_string(),
                    "sz": order.size.to_string(),
                    "reduceOnly": order.reduce_only,
                    "cloid": order.cloid,
                    "tif": "Ioc",
                }],
                "grouping": "na",
            },
            "nonce": Utc::now().timestamp_millis(),
        });

        let response = self.client.exchange(&body).await?;
        Self::parse_status(&response)
    }

    /// Cancel by cloid. Used to drop the unfilled remainder after an
    /// excess-slippage partial fill. Cancelling an already-gone order is
    /// not an error.
    pub async fn cancel_order(&self, coin: &str, cloid: &str) -> Result<()> {
        if self.dry_run {
            info!(coin, cloid, "dry run: simulating cancel");
            return Ok(());
        }
        let body = json!({
            "action": {
                "type": "cancelByCloid",
                "cancels": [{"coin": coin, "cloid": cloid}],
            },
            "nonce": Utc::now().timestamp_millis(),
        });
        self.client.exchange(&body).await?;
        Ok(())
    }

    fn parse_status(response: &Value) -> Result<OrderStatus> {
        if response.get("status").and_then(Value::as_str) != Some("ok") {
            return Err(CopyError::Retryable(format!(
                "exchange rejected request: {response}"
            )));
        }
        let statuses = response
            .pointer("/response/data/statuses")
            .and_then(Value::as_array)
            .ok_or_else(|| CopyError::Fatal("missing order statuses".to_string()))?;
        let first = statuses
            .first()
            .ok_or_else(|| CopyError::Fatal("empty order statuses".to_string()))?;
        serde_json::from_value(first.clone())
            .map_err(|e| CopyError::Fatal(format!("malformed order status: {e}")))
    }
}

impl OrderVenue for ExchangeClient {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderStatus> {
        ExchangeClient::place_order(self, order).await
    }

    async fn cancel_order(&self, coin: &str, cloid: &str) -> Result<()> {
        ExchangeClient::cancel_order(self, coin, cloid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn parses_filled_status() {
        let response = json!({
            "status": "ok",
            "response": {"data": {"statuses": [
                {"filled": {"totalSz": "0.5", "avgPx": "3010.25", "oid": 99u64}}
            ]}}
        });
        match ExchangeClient::parse_status(&response).unwrap() {
            OrderStatus::Filled {
                total_size, avg_px, ..
            } => {
                assert_eq!(total_size, dec!(0.5));
                assert_eq!(avg_px, dec!(3010.25));
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn rejected_request_is_retryable() {
        let response = json!({"status": "err", "response": "rate limited"});
        let err = ExchangeClient::parse_status(&response).unwrap_err();
        assert!(err.is_retryable());
    }
}
