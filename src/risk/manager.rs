//! Stateful risk gate: exposure caps, daily loss limit, kill switch.
//!
//! All mutation happens under one mutex. A signal's exposure is first
//! reserved (atomically with re-validating the caps), then either
//! confirmed into open exposure on fill or released on terminal
//! failure. Reservation and release are keyed by signal id, so retries
//! of the same signal can never double-count.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{CopyError, Result};
use crate::models::{OrderSide, Signal};

#[derive(Debug, Clone)]
struct Reservation {
    asset: String,
    notional: Decimal,
}

#[derive(Debug)]
struct RiskState {
    /// Confirmed open notional per asset.
    asset_exposure: HashMap<String, Decimal>,
    /// Pending reservations by signal id.
    reserved: HashMap<String, Reservation>,
    daily_pnl: Decimal,
    day: NaiveDate,
    halted: bool,
    halt_reason: Option<String>,
}

impl RiskState {
    fn new() -> Self {
        Self {
            asset_exposure: HashMap::new(),
            reserved: HashMap::new(),
            daily_pnl: Decimal::ZERO,
            day: Utc::now().date_naive(),
            halted: false,
            halt_reason: None,
        }
    }

    fn total_exposure(&self) -> Decimal {
        let confirmed: Decimal = self.asset_exposure.values().copied().sum();
        let pending: Decimal = self.reserved.values().map(|r| r.notional).sum();
        confirmed + pending
    }

    fn asset_total(&self, asset: &str) -> Decimal {
        let confirmed = self
            .asset_exposure
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let pending: Decimal = self
            .reserved
            .values()
            .filter(|r| r.asset == asset)
            .map(|r| r.notional)
            .sum();
        confirmed + pending
    }

    /// Reset daily counters at the UTC day boundary. A halt survives
    /// the rollover; only an operator clears it.
    fn roll_day(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.day {
            info!(pnl = %self.daily_pnl, day = %self.day, "daily pnl reset at UTC rollover");
            self.day = today;
            self.daily_pnl = Decimal::ZERO;
        }
    }
}

/// Read-only view for status reporting.
#[derive(Debug, Clone)]
pub struct RiskSummary {
    pub total_exposure: Decimal,
    pub daily_pnl: Decimal,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub pending_reservations: usize,
}

pub struct RiskManager {
    max_daily_loss: Decimal,
    max_position_size: Decimal,
    max_total_exposure: Decimal,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_daily_loss: config.max_daily_loss,
            max_position_size: config.max_position_size,
            max_total_exposure: config.max_total_exposure,
            state: Mutex::new(RiskState::new()),
        }
    }

    /// Cheap optimistic pre-check before a signal enters the execution
    /// queue. The commit-check in `try_reserve` re-validates under the
    /// lock, so this can afford to be approximate.
    pub async fn can_execute_signal(&self, signal: &Signal, equity: Decimal) -> Result<()> {
        let mut state = self.state.lock().await;
        state.roll_day();
        if state.halted {
            let reason = state
                .halt_reason
                .clone()
                .unwrap_or_else(|| "trading halted".to_string());
            warn!(signal = %signal.id, asset = %signal.asset, %reason, "pre-check rejected signal");
            return Err(CopyError::RiskHalt(reason));
        }
        if self.daily_loss_breached(&state, equity) {
            warn!(signal = %signal.id, asset = %signal.asset, pnl = %state.daily_pnl, "pre-check rejected signal");
            return Err(CopyError::RiskHalt(format!(
                "daily loss {} breaches limit",
                state.daily_pnl
            )));
        }
        Ok(())
    }

    /// Commit-check: atomically validate both caps and reserve the
    /// signal's notional. Re-reserving the same signal id is a no-op
    /// returning Ok, which makes retry loops safe.
    pub async fn try_reserve(
        &self,
        signal_id: &str,
        asset: &str,
        notional: Decimal,
        equity: Decimal,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.roll_day();

        if state.halted {
            return Err(CopyError::RiskHalt(
                state
                    .halt_reason
                    .clone()
                    .unwrap_or_else(|| "trading halted".to_string()),
            ));
        }
        if state.reserved.contains_key(signal_id) {
            return Ok(());
        }

        let exposure_cap = self.max_total_exposure * equity;
        if state.total_exposure() + notional > exposure_cap {
            return Err(CopyError::Fatal(format!(
                "exposure {} + {} exceeds cap {}",
                state.total_exposure(),
                notional,
                exposure_cap
            )));
        }
        let asset_cap = self.max_position_size * equity;
        if state.asset_total(asset) + notional > asset_cap {
            return Err(CopyError::Fatal(format!(
                "{asset} notional {} + {} exceeds cap {}",
                state.asset_total(asset),
                notional,
                asset_cap
            )));
        }

        state.reserved.insert(
            signal_id.to_string(),
            Reservation {
                asset: asset.to_string(),
                notional,
            },
        );
        Ok(())
    }

    /// Convert a reservation into confirmed exposure. The filled
    /// notional may be smaller than the reservation (partial fill); the
    /// remainder simply evaporates. Buys add open notional, sells
    /// reduce it, floored at zero.
    pub async fn confirm_fill(&self, signal_id: &str, side: OrderSide, filled_notional: Decimal) {
        let mut state = self.state.lock().await;
        let Some(reservation) = state.reserved.remove(signal_id) else {
            warn!(signal = %signal_id, "confirm without reservation, ignoring");
            return;
        };
        let confirmed = filled_notional.min(reservation.notional);
        let open = state
            .asset_exposure
            .entry(reservation.asset)
            .or_insert(Decimal::ZERO);
        match side {
            OrderSide::Buy => *open += confirmed,
            OrderSide::Sell => *open = (*open - confirmed).max(Decimal::ZERO),
        }
    }

    /// Drop a reservation after terminal failure. Releasing twice, or
    /// releasing an unknown id, is harmless.
    pub async fn release(&self, signal_id: &str) {
        let mut state = self.state.lock().await;
        state.reserved.remove(signal_id);
    }

    /// Record realized P&L. Breaching the daily loss limit sets the
    /// sticky halt flag.
    pub async fn record_realized(&self, pnl: Decimal, equity: Decimal) {
        let mut state = self.state.lock().await;
        state.roll_day();
        state.daily_pnl += pnl;
        if !state.halted && self.daily_loss_breached(&state, equity) {
            let reason = format!(
                "daily pnl {} breached -{} * {}",
                state.daily_pnl, self.max_daily_loss, equity
            );
            error!(%reason, "trading halted");
            state.halted = true;
            state.halt_reason = Some(reason);
        }
    }

    /// Kill-switch check polled by the orchestrator each tick. False
    /// means stop the loop.
    pub async fn check_limits(&self, equity: Decimal) -> bool {
        let mut state = self.state.lock().await;
        state.roll_day();
        if state.halted {
            return false;
        }
        if self.daily_loss_breached(&state, equity) {
            let reason = format!("daily pnl {} breached loss limit", state.daily_pnl);
            error!(%reason, "trading halted");
            state.halted = true;
            state.halt_reason = Some(reason);
            return false;
        }
        true
    }

    /// Operator action. The halt flag never clears on its own.
    pub async fn clear_halt(&self) {
        let mut state = self.state.lock().await;
        if state.halted {
            info!("halt cleared by operator");
        }
        state.halted = false;
        state.halt_reason = None;
    }

    pub async fn summary(&self) -> RiskSummary {
        let state = self.state.lock().await;
        RiskSummary {
            total_exposure: state.total_exposure(),
            daily_pnl: state.daily_pnl,
            halted: state.halted,
            halt_reason: state.halt_reason.clone(),
            pending_reservations: state.reserved.len(),
        }
    }

    fn daily_loss_breached(&self, state: &RiskState, equity: Decimal) -> bool {
        state.daily_pnl < -(self.max_daily_loss * equity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalKind;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn signal() -> Signal {
        let id = Signal::derive_id("0xleader", "ETH", SignalKind::PositionUpdate, "t");
        Signal {
            id,
            leader_address: "0xleader".to_string(),
            kind: SignalKind::PositionUpdate,
            asset: "ETH".to_string(),
            side: OrderSide::Buy,
            size: dec!(1),
            price: Some(dec!(3000)),
            timestamp: Utc::now(),
            order_id: None,
            metadata: HashMap::new(),
        }
    }

    fn manager() -> RiskManager {
        let mut config = Config::default();
        config.max_daily_loss = dec!(0.05);
        config.max_position_size = dec!(0.1);
        config.max_total_exposure = dec!(0.5);
        RiskManager::from_config(&config)
    }

    #[tokio::test]
    async fn reserve_respects_total_exposure() {
        let rm = manager();
        let equity = dec!(10000); // caps: 1000/asset, 5000 total
        for i in 0..5 {
            rm.try_reserve(&format!("s{i}"), &format!("A{i}"), dec!(1000), equity)
                .await
                .unwrap();
        }
        let err = rm
            .try_reserve("s5", "A5", dec!(1000), equity)
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::Fatal(_)));
    }

    #[tokio::test]
    async fn reserve_is_idempotent_per_signal() {
        let rm = manager();
        let equity = dec!(10000);
        rm.try_reserve("sig", "ETH", dec!(900), equity).await.unwrap();
        // A retry of the same signal must not double-count.
        rm.try_reserve("sig", "ETH", dec!(900), equity).await.unwrap();
        assert_eq!(rm.summary().await.total_exposure, dec!(900));
    }

    #[tokio::test]
    async fn release_then_confirm_is_harmless() {
        let rm = manager();
        let equity = dec!(10000);
        rm.try_reserve("sig", "ETH", dec!(500), equity).await.unwrap();
        rm.release("sig").await;
        rm.confirm_fill("sig", OrderSide::Buy, dec!(500)).await;
        assert_eq!(rm.summary().await.total_exposure, Decimal::ZERO);
    }

    #[tokio::test]
    async fn confirm_caps_at_reservation() {
        let rm = manager();
        let equity = dec!(10000);
        rm.try_reserve("sig", "ETH", dec!(500), equity).await.unwrap();
        rm.confirm_fill("sig", OrderSide::Buy, dec!(300)).await;
        assert_eq!(rm.summary().await.total_exposure, dec!(300));
    }

    #[tokio::test]
    async fn sell_fill_reduces_open_exposure() {
        let rm = manager();
        let equity = dec!(10000);
        rm.try_reserve("open", "ETH", dec!(800), equity).await.unwrap();
        rm.confirm_fill("open", OrderSide::Buy, dec!(800)).await;
        rm.try_reserve("close", "ETH", dec!(200), equity).await.unwrap();
        rm.confirm_fill("close", OrderSide::Sell, dec!(200)).await;
        assert_eq!(rm.summary().await.total_exposure, dec!(600));
    }

    #[tokio::test]
    async fn daily_loss_halts_and_stays_halted() {
        let rm = manager();
        let equity = dec!(10000); // loss limit: 500
        rm.record_realized(dec!(-600), equity).await;
        assert!(!rm.check_limits(equity).await);
        let err = rm.can_execute_signal(&signal(), equity).await.unwrap_err();
        assert!(matches!(err, CopyError::RiskHalt(_)));
        // No reservation is possible while halted.
        assert!(rm.try_reserve("sig", "ETH", dec!(1), equity).await.is_err());

        rm.clear_halt().await;
        // PnL is still negative, so limits re-trip immediately.
        assert!(!rm.check_limits(equity).await);
    }
}
