//! Execution records: per-attempt state for idempotent order submission.

use alloy_primitives::keccak256;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Terminal state of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Filled,
    /// Filled but slippage exceeded the configured threshold; the fill
    /// stands, the remainder was cancelled.
    FilledExcessSlippage,
    Failed,
    Cancelled,
    Skipped,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Filled => "filled",
            ExecutionOutcome::FilledExcessSlippage => "filled_excess_slippage",
            ExecutionOutcome::Failed => "failed",
            ExecutionOutcome::Cancelled => "cancelled",
            ExecutionOutcome::Skipped => "skipped",
        }
    }

    pub fn is_fill(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Filled | ExecutionOutcome::FilledExcessSlippage
        )
    }
}

/// One submission attempt for a signal. The client order id is a pure
/// function of (signal id, attempt), so resubmitting the same attempt can
/// never produce a second effective order at the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub signal_id: String,
    pub attempt: u32,
    pub cloid: String,
    pub started_at: DateTime<Utc>,
}

impl ExecutionAttempt {
    pub fn new(signal_id: &str, attempt: u32) -> Self {
        Self {
            signal_id: signal_id.to_string(),
            attempt,
            cloid: Self::derive_cloid(signal_id, attempt),
            started_at: Utc::now(),
        }
    }

    /// 128-bit hex client order id, deterministic per (signal, attempt).
    pub fn derive_cloid(signal_id: &str, attempt: u32) -> String {
        let digest = keccak256(format!("{signal_id}|{attempt}").as_bytes());
        format!("0x{}", hex::encode(&digest[..16]))
    }
}

/// Final result of executing a signal (across all attempts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub signal_id: String,
    pub outcome: ExecutionOutcome,
    pub cloid: Option<String>,
    pub attempts: u32,
    pub filled_size: Option<Decimal>,
    pub filled_price: Option<Decimal>,
    /// Realized slippage against the signal reference price, basis points.
    pub slippage_bps: Option<f64>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn failed(signal_id: &str, attempts: u32, error: String) -> Self {
        Self {
            signal_id: signal_id.to_string(),
            outcome: ExecutionOutcome::Failed,
            cloid: None,
            attempts,
            filled_size: None,
            filled_price: None,
            slippage_bps: None,
            error: Some(error),
            completed_at: Utc::now(),
        }
    }

    pub fn skipped(signal_id: &str, reason: String) -> Self {
        Self {
            signal_id: signal_id.to_string(),
            outcome: ExecutionOutcome::Skipped,
            cloid: None,
            attempts: 0,
            filled_size: None,
            filled_price: None,
            slippage_bps: None,
            error: Some(reason),
            completed_at: Utc::now(),
        }
    }
}

/// Slippage between the reference and fill price, in basis points.
/// Positive means the fill was worse than the reference for the given side.
pub fn slippage_bps(
    side: crate::models::OrderSide,
    reference: Decimal,
    fill: Decimal,
) -> f64 {
    if reference.is_zero() {
        return 0.0;
    }
    let diff = match side {
        crate::models::OrderSide::Buy => fill - reference,
        crate::models::OrderSide::Sell => reference - fill,
    };
    (diff / reference).to_f64().unwrap_or(0.0) * 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;

    #[test]
    fn cloid_deterministic_per_attempt() {
        let a0 = ExecutionAttempt::derive_cloid("sig", 0);
        let a0_again = ExecutionAttempt::derive_cloid("sig", 0);
        let a1 = ExecutionAttempt::derive_cloid("sig", 1);

        assert_eq!(a0, a0_again);
        assert_ne!(a0, a1);
        assert!(a0.starts_with("0x"));
        assert_eq!(a0.len(), 34); // 0x + 32 hex chars
    }

    #[test]
    fn slippage_sign_follows_side() {
        // Buying higher than reference is adverse.
        let bps = slippage_bps(OrderSide::Buy, dec!(100), dec!(100.80));
        assert!((bps - 80.0).abs() < 1e-9);

        // Selling lower than reference is adverse.
        let bps = slippage_bps(OrderSide::Sell, dec!(100), dec!(99.20));
        assert!((bps - 80.0).abs() < 1e-9);

        // Favorable fills come out negative.
        let bps = slippage_bps(OrderSide::Buy, dec!(100), dec!(99.50));
        assert!(bps < 0.0);
    }
}
