//! Idempotent order execution with retry, backoff, and slippage checks.
//!
//! Every attempt at a signal gets a client order id derived from the
//! signal id and the attempt counter, so a resubmission after an
//! ambiguous network failure dedupes at the venue instead of doubling.
//! Exposure is reserved before the first attempt, confirmed once on a
//! fill, and released on terminal failure; retries of the same signal
//! never touch the reservation again.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::api::{ExchangeClient, OrderRequest, OrderStatus, OrderVenue};
use crate::config::Config;
use crate::execution::retry::RetryPolicy;
use crate::models::{slippage_bps, ExecutionAttempt, ExecutionOutcome, ExecutionResult, OrderSide};
use crate::risk::RiskManager;
use crate::signals::SizedSignal;

pub struct ExecutionEngine<V = ExchangeClient> {
    exchange: V,
    policy: RetryPolicy,
    slippage_threshold_bps: f64,
    slippage_allowance: Decimal,
}

impl<V: OrderVenue> ExecutionEngine<V> {
    pub fn new(exchange: V, config: &Config) -> Self {
        Self {
            exchange,
            policy: RetryPolicy::from_config(config),
            slippage_threshold_bps: config.default_slippage_bps as f64,
            slippage_allowance: Decimal::from(config.default_slippage_bps) / Decimal::from(10_000),
        }
    }

    /// Execute one risk-gated signal to a terminal result. The caller
    /// has already passed the pre-check; the commit-check happens here,
    /// atomically with reserving exposure.
    pub async fn execute(
        &self,
        sized: &SizedSignal,
        risk: &RiskManager,
        equity: Decimal,
    ) -> ExecutionResult {
        let signal = &sized.signal;

        if let Err(e) = risk
            .try_reserve(&signal.id, &signal.asset, sized.notional, equity)
            .await
        {
            info!(signal = %signal.id, error = %e, "signal rejected at commit-check");
            return ExecutionResult::skipped(&signal.id, e.to_string());
        }

        let limit_px = self.limit_price(signal.side, sized.reference_price);
        let mut attempt: u32 = 0;
        loop {
            let record = ExecutionAttempt::new(&signal.id, attempt);
            let order = OrderRequest::new(
                &signal.asset,
                signal.side,
                limit_px,
                sized.size,
                record.cloid.clone(),
            );

            match self.exchange.place_order(&order).await {
                Ok(OrderStatus::Filled {
                    total_size,
                    avg_px,
                    ..
                }) => {
                    return self
                        .settle_fill(sized, risk, record, attempt, total_size, avg_px)
                        .await;
                }
                Ok(OrderStatus::Resting { .. }) => {
                    // IOC orders never rest; treat a resting ack as a
                    // venue anomaly and cancel before retrying.
                    warn!(signal = %signal.id, cloid = %record.cloid, "ioc order rested, cancelling");
                    if let Err(e) = self.exchange.cancel_order(&signal.asset, &record.cloid).await {
                        warn!(signal = %signal.id, error = %e, "cancel of anomalous order failed");
                    }
                    if !self.retry_after(&signal.id, attempt, "order rested").await {
                        risk.release(&signal.id).await;
                        return ExecutionResult::failed(
                            &signal.id,
                            attempt + 1,
                            "order rested and retries exhausted".to_string(),
                        );
                    }
                }
                Ok(OrderStatus::Error(message)) => {
                    // Venue-level rejection is fatal for this signal.
                    warn!(signal = %signal.id, attempt, %message, "order rejected");
                    risk.release(&signal.id).await;
                    return ExecutionResult::failed(&signal.id, attempt + 1, message);
                }
                Err(e) if e.is_retryable() => {
                    if !self.retry_after(&signal.id, attempt, &e.to_string()).await {
                        risk.release(&signal.id).await;
                        return ExecutionResult::failed(&signal.id, attempt + 1, e.to_string());
                    }
                }
                Err(e) => {
                    warn!(signal = %signal.id, attempt, error = %e, "fatal execution error");
                    risk.release(&signal.id).await;
                    return ExecutionResult::failed(&signal.id, attempt + 1, e.to_string());
                }
            }
            attempt += 1;
        }
    }

    async fn settle_fill(
        &self,
        sized: &SizedSignal,
        risk: &RiskManager,
        record: ExecutionAttempt,
        attempt: u32,
        filled_size: Decimal,
        fill_price: Decimal,
    ) -> ExecutionResult {
        let signal = &sized.signal;
        let realized_bps = slippage_bps(signal.side, sized.reference_price, fill_price);

        let outcome = self.classify_slippage(realized_bps);
        if outcome == ExecutionOutcome::FilledExcessSlippage {
            warn!(
                signal = %signal.id,
                slippage_bps = realized_bps,
                threshold = self.slippage_threshold_bps,
                "fill exceeded slippage threshold"
            );
            // The fill stands; drop any unfilled remainder instead of
            // chasing the price.
            if filled_size < sized.size {
                if let Err(e) = self.exchange.cancel_order(&signal.asset, &record.cloid).await {
                    warn!(signal = %signal.id, error = %e, "remainder cancel failed");
                }
            }
        }

        risk.confirm_fill(&signal.id, signal.side, filled_size * fill_price)
            .await;
        info!(
            signal = %signal.id,
            cloid = %record.cloid,
            size = %filled_size,
            px = %fill_price,
            slippage_bps = realized_bps,
            outcome = outcome.as_str(),
            "order filled"
        );

        ExecutionResult {
            signal_id: signal.id.clone(),
            outcome,
            cloid: Some(record.cloid),
            attempts: attempt + 1,
            filled_size: Some(filled_size),
            filled_price: Some(fill_price),
            slippage_bps: Some(realized_bps),
            error: None,
            completed_at: chrono::Utc::now(),
        }
    }

    /// Sleep out the backoff if the policy allows another attempt.
    async fn retry_after(&self, signal_id: &str, attempt: u32, reason: &str) -> bool {
        if !self.policy.allows_retry(attempt) {
            return false;
        }
        let delay = self.policy.delay_for(attempt, signal_id);
        warn!(
            signal = %signal_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "retrying after backoff"
        );
        tokio::time::sleep(delay).await;
        true
    }

    /// IOC limit price: the reference shifted by the slippage allowance
    /// in the adverse direction, so fills inside the threshold succeed
    /// and worse prices miss.
    fn limit_price(&self, side: OrderSide, reference: Decimal) -> Decimal {
        match side {
            OrderSide::Buy => reference * (Decimal::ONE + self.slippage_allowance),
            OrderSide::Sell => reference * (Decimal::ONE - self.slippage_allowance),
        }
    }

    /// Fill outcome for a realized slippage measurement.
    fn classify_slippage(&self, bps: f64) -> ExecutionOutcome {
        if bps > self.slippage_threshold_bps {
            ExecutionOutcome::FilledExcessSlippage
        } else {
            ExecutionOutcome::Filled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InfoClient;
    use crate::error::{CopyError, Result};
    use crate::models::{Signal, SignalKind};
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedVenue {
        script: Mutex<VecDeque<Result<OrderStatus>>>,
        placements: AtomicU32,
    }

    impl ScriptedVenue {
        fn new(script: Vec<Result<OrderStatus>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                placements: AtomicU32::new(0),
            }
        }
    }

    impl OrderVenue for ScriptedVenue {
        async fn place_order(&self, _order: &OrderRequest) -> Result<OrderStatus> {
            self.placements.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CopyError::Fatal("script exhausted".to_string())))
        }

        async fn cancel_order(&self, _coin: &str, _cloid: &str) -> Result<()> {
            Ok(())
        }
    }

    fn sized(side: OrderSide, size: Decimal, reference: Decimal) -> SizedSignal {
        let id = Signal::derive_id("0xleader", "ETH", SignalKind::PositionUpdate, "t");
        SizedSignal {
            signal: Signal {
                id,
                leader_address: "0xleader".to_string(),
                kind: SignalKind::PositionUpdate,
                asset: "ETH".to_string(),
                side,
                size,
                price: Some(reference),
                timestamp: chrono::Utc::now(),
                order_id: None,
                metadata: HashMap::new(),
            },
            size,
            reference_price: reference,
            notional: size * reference,
            leader_rank: 0,
        }
    }

    fn engine(dry_run: bool) -> ExecutionEngine {
        let config = Config::default();
        let client = InfoClient::new(
            "http://localhost:1",
            "test",
            Duration::from_secs(1),
        )
        .unwrap();
        ExecutionEngine::new(ExchangeClient::new(client, dry_run), &config)
    }

    #[tokio::test]
    async fn dry_run_fill_confirms_exposure_once() {
        let engine = engine(true);
        let risk = RiskManager::from_config(&Config::default());
        let equity = dec!(10000);
        let s = sized(OrderSide::Buy, dec!(0.1), dec!(3000));

        let result = engine.execute(&s, &risk, equity).await;
        assert_eq!(result.outcome, ExecutionOutcome::Filled);
        assert_eq!(result.attempts, 1);
        assert!(result.cloid.is_some());

        let summary = risk.summary().await;
        assert_eq!(summary.total_exposure, dec!(300));
        assert_eq!(summary.pending_reservations, 0);
    }

    #[tokio::test]
    async fn over_cap_signal_is_skipped_not_submitted() {
        let engine = engine(true);
        let risk = RiskManager::from_config(&Config::default());
        // Notional 6000 against a 5000 total-exposure cap on 10k equity.
        let s = sized(OrderSide::Buy, dec!(2), dec!(3000));
        let result = engine.execute(&s, &risk, dec!(10000)).await;
        assert_eq!(result.outcome, ExecutionOutcome::Skipped);
        assert_eq!(risk.summary().await.total_exposure, Decimal::ZERO);
    }

    #[test]
    fn limit_price_shifts_adversely() {
        let engine = engine(true);
        // 50 bps allowance on the defaults.
        assert_eq!(
            engine.limit_price(OrderSide::Buy, dec!(10000)),
            dec!(10050)
        );
        assert_eq!(
            engine.limit_price(OrderSide::Sell, dec!(10000)),
            dec!(9950)
        );
    }

    #[tokio::test]
    async fn retryable_failure_backs_off_then_fills_on_next_attempt() {
        let mut config = Config::default();
        config.retry_delay_seconds = 0.01;
        let venue = ScriptedVenue::new(vec![
            Err(CopyError::Retryable("timeout".to_string())),
            Ok(OrderStatus::Filled {
                total_size: dec!(0.1),
                avg_px: dec!(3000),
                oid: 1,
            }),
        ]);
        let engine = ExecutionEngine::new(venue, &config);
        let risk = RiskManager::from_config(&config);
        let s = sized(OrderSide::Buy, dec!(0.1), dec!(3000));

        let result = engine.execute(&s, &risk, dec!(10000)).await;
        assert_eq!(result.outcome, ExecutionOutcome::Filled);
        assert_eq!(result.attempts, 2);
        assert_eq!(engine.exchange.placements.load(Ordering::SeqCst), 2);

        // One reservation across both attempts, confirmed exactly once.
        let summary = risk.summary().await;
        assert_eq!(summary.total_exposure, dec!(300));
        assert_eq!(summary.pending_reservations, 0);
    }

    #[tokio::test]
    async fn retries_exhausted_releases_the_reservation() {
        let mut config = Config::default();
        config.retry_delay_seconds = 0.01;
        config.max_retries = 1;
        let venue = ScriptedVenue::new(vec![
            Err(CopyError::Retryable("timeout".to_string())),
            Err(CopyError::Retryable("timeout".to_string())),
        ]);
        let engine = ExecutionEngine::new(venue, &config);
        let risk = RiskManager::from_config(&config);
        let s = sized(OrderSide::Buy, dec!(0.1), dec!(3000));

        let result = engine.execute(&s, &risk, dec!(10000)).await;
        assert_eq!(result.outcome, ExecutionOutcome::Failed);
        assert_eq!(result.attempts, 2);
        let summary = risk.summary().await;
        assert_eq!(summary.total_exposure, Decimal::ZERO);
        assert_eq!(summary.pending_reservations, 0);
    }

    #[tokio::test]
    async fn excess_slippage_fill_stands_and_remainder_is_cancelled() {
        let engine = engine(true);
        let risk = RiskManager::from_config(&Config::default());
        let s = sized(OrderSide::Buy, dec!(0.1), dec!(10000));
        risk.try_reserve(&s.signal.id, "ETH", s.notional, dec!(10000))
            .await
            .unwrap();

        // Partial fill 80 bps above reference against the 50 bps threshold.
        let record = ExecutionAttempt::new(&s.signal.id, 1);
        let result = engine
            .settle_fill(&s, &risk, record, 1, dec!(0.05), dec!(10080))
            .await;

        assert_eq!(result.outcome, ExecutionOutcome::FilledExcessSlippage);
        assert_eq!(result.attempts, 2);
        assert!(result.slippage_bps.unwrap() > 50.0);

        let summary = risk.summary().await;
        assert_eq!(summary.total_exposure, dec!(504));
        assert_eq!(summary.pending_reservations, 0);
    }

    #[test]
    fn slippage_classification_matches_threshold() {
        let engine = engine(true);
        assert_eq!(engine.classify_slippage(49.0), ExecutionOutcome::Filled);
        assert_eq!(
            engine.classify_slippage(80.0),
            ExecutionOutcome::FilledExcessSlippage
        );
    }
}
