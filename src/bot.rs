//! Bot runner: the fixed-cadence orchestration loop.
//!
//! Each tick: check the risk kill-switch, re-rank leaders when due,
//! poll active leaders, size the resulting deltas, gate them, and
//! dispatch. Per-leader and per-signal failures are contained and
//! logged; only a risk halt or a dead data source stops the loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::api::{DataSource, ExchangeClient, InfoClient, StreamClient};
use crate::config::Config;
use crate::db::Database;
use crate::execution::ExecutionEngine;
use crate::leaders::{LeaderRanker, LeaderTracker};
use crate::metrics::MetricsCalculator;
use crate::models::{Leader, LeaderStatus};
use crate::risk::RiskManager;
use crate::signals::{SignalGenerator, SizedSignal};

pub struct Bot {
    config: Config,
    db: Database,
    source: DataSource,
    tracker: LeaderTracker,
    ranker: LeaderRanker,
    generator: SignalGenerator,
    risk: Arc<RiskManager>,
    engine: Arc<ExecutionEngine>,

    follower_equity: Arc<RwLock<Decimal>>,
    last_rerank: Option<tokio::time::Instant>,

    /// Realized follower P&L already fed to the risk gate today.
    synced_pnl: Decimal,
    pnl_day: chrono::NaiveDate,

    /// Push updates from the WebSocket feed, when enabled. Purely a
    /// latency hint: polling remains the source of truth.
    stream_rx: Option<tokio::sync::mpsc::Receiver<serde_json::Value>>,

    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub async fn new(config: Config) -> Result<Self> {
        let db = Database::new(&config.database_url)
            .await
            .context("failed to open database")?;
        let source = DataSource::from_config(&config).context("failed to build data source")?;

        let exchange_http = InfoClient::new(
            &config.public_api_url(),
            "exchange",
            Duration::from_secs(config.poll_timeout_secs),
        )
        .context("failed to build exchange client")?;
        let exchange = ExchangeClient::new(exchange_http, config.dry_run);

        let ranker = LeaderRanker::from_config(&config);
        let generator = SignalGenerator::from_config(&config);
        let risk = Arc::new(RiskManager::from_config(&config));
        let engine = Arc::new(ExecutionEngine::new(exchange, &config));
        let initial_equity = config.initial_equity;

        Ok(Self {
            config,
            db,
            source,
            tracker: LeaderTracker::new(),
            ranker,
            generator,
            risk,
            engine,
            follower_equity: Arc::new(RwLock::new(initial_equity)),
            last_rerank: None,
            synced_pnl: Decimal::ZERO,
            pnl_day: Utc::now().date_naive(),
            stream_rx: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn initialize(&mut self) -> Result<()> {
        info!("initializing bot");

        let reachable = self.source.probe().await;
        info!(
            provider = self.source.primary_name(),
            reachable, "primary provider probed"
        );

        self.refresh_equity().await;
        let equity = *self.follower_equity.read().await;
        self.db.init_bot_state(equity).await?;

        // Seed the leader table from configured overrides so operators
        // can pre-weight leaders before the first ranking cycle.
        for (address, weight) in &self.config.leader_weights {
            self.db.save_leader(address, Some(*weight)).await?;
        }

        let tracked = self.db.get_tracked_leaders().await?;

        if self.config.stream_enabled && !tracked.is_empty() {
            let (tx, rx) = tokio::sync::mpsc::channel(256);
            let mut stream = StreamClient::new(self.config.ws_url(), tx);
            for leader in &tracked {
                stream.subscribe_user(&leader.address);
            }
            tokio::spawn(stream.run());
            self.stream_rx = Some(rx);
        }

        info!(
            equity = %equity,
            tracked = tracked.len(),
            dry_run = self.config.dry_run,
            chain = ?self.config.chain,
            stream = self.config.stream_enabled,
            "bot initialized"
        );
        Ok(())
    }

    /// Main run loop. Exits on shutdown signal or risk halt.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            tick_secs = self.config.tick_interval_secs,
            rerank_secs = self.config.leader_update_interval,
            "starting run loop"
        );

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        let mut ticker = interval(Duration::from_secs(self.config.tick_interval_secs));
        while !self.shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;

            let equity = *self.follower_equity.read().await;
            if !self.risk.check_limits(equity).await {
                let summary = self.risk.summary().await;
                error!(
                    reason = summary.halt_reason.as_deref().unwrap_or("unknown"),
                    "risk halt, stopping orchestrator"
                );
                break;
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "tick failed");
            }
        }

        self.finalize().await
    }

    /// One iteration of the pipeline.
    async fn tick(&mut self) -> Result<()> {
        debug!("tick");
        self.drain_stream();

        if self.rerank_due() {
            if let Err(e) = self.refresh_ranking().await {
                warn!(error = %e, "ranking cycle failed, keeping previous set");
            }
            self.refresh_equity().await;
            self.sync_realized_pnl().await;
            self.log_source_health();
        }

        let active = self.ranker.active().await;
        if active.is_empty() {
            debug!("no active leaders");
            return Ok(());
        }

        let addresses = active.addresses();
        let deltas = self
            .tracker
            .poll_all(
                &self.source,
                &addresses,
                Duration::from_secs(self.config.poll_timeout_secs),
            )
            .await;
        if deltas.is_empty() {
            return Ok(());
        }

        // Persist every delta; ones already seen (replays across
        // restarts) are dropped here.
        let mut fresh = Vec::with_capacity(deltas.len());
        for delta in deltas {
            match self.db.store_signal(&delta).await {
                Ok(true) => fresh.push(delta),
                Ok(false) => debug!(id = %delta.id, "duplicate signal suppressed"),
                Err(e) => {
                    warn!(id = %delta.id, error = %e, "failed to persist signal");
                    fresh.push(delta);
                }
            }
        }
        if fresh.is_empty() {
            return Ok(());
        }

        let mids = match self.source.all_mids().await {
            Ok(mids) => mids,
            Err(e) => {
                warn!(error = %e, "mids unavailable, falling back to book tops");
                let mut mids = HashMap::new();
                let assets: std::collections::HashSet<&str> =
                    fresh.iter().map(|s| s.asset.as_str()).collect();
                for asset in assets {
                    if let Ok(mid) = self.source.mid_from_book(asset).await {
                        mids.insert(asset.to_string(), mid);
                    }
                }
                mids
            }
        };

        let equity = *self.follower_equity.read().await;
        let exposure = self.risk.summary().await.total_exposure;
        let sized = self
            .generator
            .generate(fresh, &active, equity, &mids, exposure);
        if sized.is_empty() {
            return Ok(());
        }
        info!(signals = sized.len(), "dispatching sized signals");

        self.dispatch(sized, equity).await;
        self.persist_state(equity).await
    }

    /// Dispatch concurrently across assets; signals for the same asset
    /// run in observation order on one task.
    async fn dispatch(&self, sized: Vec<SizedSignal>, equity: Decimal) {
        let mut by_asset: HashMap<String, Vec<SizedSignal>> = HashMap::new();
        for s in sized {
            by_asset.entry(s.signal.asset.clone()).or_default().push(s);
        }

        let tasks = by_asset.into_values().map(|group| {
            let risk = Arc::clone(&self.risk);
            let engine = Arc::clone(&self.engine);
            let shutdown = self.shutdown.clone();
            let db = &self.db;
            async move {
                for s in group {
                    if shutdown.load(Ordering::SeqCst) {
                        warn!(id = %s.signal.id, "shutdown in progress, signal not dispatched");
                        continue;
                    }
                    if risk.can_execute_signal(&s.signal, equity).await.is_err() {
                        continue;
                    }
                    let result = engine.execute(&s, &risk, equity).await;
                    if let Err(e) = db.record_execution(&result).await {
                        warn!(id = %s.signal.id, error = %e, "failed to record execution");
                    }
                }
            }
        });
        join_all(tasks).await;
    }

    /// Drain buffered push events. A user event for an active leader
    /// means this tick's poll will almost certainly find a delta, so
    /// the events are only logged, not acted on directly.
    fn drain_stream(&mut self) {
        let Some(rx) = &mut self.stream_rx else { return };
        while let Ok(event) = rx.try_recv() {
            debug!(
                channel = event.get("channel").and_then(|c| c.as_str()).unwrap_or("?"),
                "stream event"
            );
        }
    }

    fn rerank_due(&self) -> bool {
        match self.last_rerank {
            None => true,
            Some(at) => at.elapsed() >= Duration::from_secs(self.config.leader_update_interval),
        }
    }

    /// Ranking cycle: recompute metrics for every tracked leader over
    /// the lookback window, then publish a new active set atomically.
    async fn refresh_ranking(&mut self) -> Result<()> {
        self.last_rerank = Some(tokio::time::Instant::now());

        let tracked = self.db.get_tracked_leaders().await?;
        if tracked.is_empty() {
            debug!("no tracked leaders to rank");
            return Ok(());
        }

        let lookback_ms = (Utc::now()
            - chrono::Duration::days(self.config.performance_lookback_days))
        .timestamp_millis();

        let results = join_all(tracked.iter().map(|stored| {
            let source = &self.source;
            let address = stored.address.clone();
            let status = stored.status.clone();
            let weight = stored.weight;
            async move {
                let mut leader = Leader::new(address.clone());
                leader.weight = weight;
                if let Some(status) = LeaderStatus::parse(&status) {
                    leader.status = status;
                }

                match source.user_state(&address).await {
                    Ok(state) => {
                        leader.equity = state.margin_summary.account_value;
                        leader.last_activity = Some(Utc::now());
                    }
                    Err(e) => {
                        warn!(leader = %leader.display_name(), error = %e, "equity fetch failed");
                        return (leader, false);
                    }
                }
                match source.user_fills(&address, Some(lookback_ms), None).await {
                    Ok(fills) => {
                        leader.metrics = Some(MetricsCalculator::calculate(&address, &fills));
                    }
                    Err(e) => {
                        warn!(leader = %leader.display_name(), error = %e, "fills fetch failed");
                    }
                }
                (leader, true)
            }
        }))
        .await;

        let mut candidates = Vec::with_capacity(results.len());
        for (mut leader, polled) in results {
            if polled {
                // An unreachable leader that comes back gets reactivated;
                // banned and suspended stay where they are.
                if leader.status == LeaderStatus::Inactive
                    && leader.set_status(LeaderStatus::Active)
                {
                    self.db
                        .set_leader_status(&leader.address, LeaderStatus::Active)
                        .await?;
                }
                self.db
                    .update_leader_state(&leader.address, leader.equity)
                    .await?;
                if let Some(metrics) = &leader.metrics {
                    self.db.save_leader_metrics(metrics).await?;
                }
                candidates.push(leader);
            } else if leader.status == LeaderStatus::Active
                && leader.set_status(LeaderStatus::Inactive)
            {
                self.db
                    .set_leader_status(&leader.address, LeaderStatus::Inactive)
                    .await?;
            }
        }

        let set = self.ranker.rerank(&candidates).await;
        self.tracker.retain_active(&set.address_set());
        Ok(())
    }

    /// Refresh follower equity from the venue when an address is
    /// configured.
    async fn refresh_equity(&self) {
        let Some(address) = &self.config.follower_address else {
            return;
        };
        match self.source.user_state(address).await {
            Ok(state) => {
                *self.follower_equity.write().await = state.margin_summary.account_value;
            }
            Err(e) => {
                warn!(error = %e, "follower equity refresh failed, keeping last value");
            }
        }
    }

    /// Feed the follower's realized P&L since UTC midnight into the
    /// risk gate. Only the delta since the last sync is recorded, so
    /// the daily total is never double-counted.
    async fn sync_realized_pnl(&mut self) {
        let Some(address) = &self.config.follower_address else {
            return;
        };
        let today = Utc::now().date_naive();
        if today != self.pnl_day {
            self.pnl_day = today;
            self.synced_pnl = Decimal::ZERO;
        }
        let midnight_ms = today
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc().timestamp_millis())
            .unwrap_or(0);

        let fills = match self.source.user_fills(address, Some(midnight_ms), None).await {
            Ok(fills) => fills,
            Err(e) => {
                warn!(error = %e, "follower fills fetch failed, pnl not synced");
                return;
            }
        };
        let total: Decimal = fills.iter().filter_map(|f| f.closed_pnl).sum();
        let delta = total - self.synced_pnl;
        if !delta.is_zero() {
            let equity = *self.follower_equity.read().await;
            self.risk.record_realized(delta, equity).await;
            self.synced_pnl = total;
            debug!(daily_pnl = %total, "realized pnl synced");
        }
    }

    fn log_source_health(&self) {
        use std::sync::atomic::Ordering::Relaxed;
        let health = self.source.health();
        debug!(
            requests = health.requests.load(Relaxed),
            primary_failures = health.primary_failures.load(Relaxed),
            failovers = health.failovers.load(Relaxed),
            secondary_failures = health.secondary_failures.load(Relaxed),
            "data source health"
        );
    }

    async fn persist_state(&self, equity: Decimal) -> Result<()> {
        let summary = self.risk.summary().await;
        self.db
            .update_bot_state(equity, summary.total_exposure, summary.daily_pnl)
            .await?;
        Ok(())
    }

    /// Graceful shutdown: persist final state within the grace period.
    async fn finalize(&self) -> Result<()> {
        let status = self.status().await;
        info!(
            grace_secs = self.config.shutdown_grace_secs,
            equity = %status.equity,
            exposure = %status.total_exposure,
            daily_pnl = %status.daily_pnl,
            halted = status.halted,
            active_leaders = status.active_leaders,
            provider = %status.primary_provider,
            "shutting down"
        );
        let equity = *self.follower_equity.read().await;
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        match tokio::time::timeout(grace, async {
            self.persist_state(equity).await?;
            self.db.mark_bot_stopped().await?;
            anyhow::Ok(())
        })
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!("shutdown grace period expired before state was persisted");
                Ok(())
            }
        }
    }

    pub async fn status(&self) -> BotStatus {
        let summary = self.risk.summary().await;
        let active = self.ranker.active().await;
        BotStatus {
            equity: *self.follower_equity.read().await,
            total_exposure: summary.total_exposure,
            daily_pnl: summary.daily_pnl,
            halted: summary.halted,
            active_leaders: active.entries.len(),
            primary_provider: self.source.primary_name().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotStatus {
    pub equity: Decimal,
    pub total_exposure: Decimal,
    pub daily_pnl: Decimal,
    pub halted: bool,
    pub active_leaders: usize,
    pub primary_provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaders::{ActiveLeader, ActiveSet};
    use crate::models::{OrderSide, Signal, SignalKind};
    use rust_decimal_macros::dec;

    // The pipeline stages are unit-tested in their own modules; this
    // exercises the generate-gate-execute seam end to end in dry run.
    #[tokio::test]
    async fn sized_signal_flows_through_gate_and_engine() {
        let config = Config::default();
        let risk = RiskManager::from_config(&config);
        let generator = SignalGenerator::from_config(&config);
        let client =
            InfoClient::new("http://localhost:1", "test", Duration::from_secs(1)).unwrap();
        let engine = ExecutionEngine::new(ExchangeClient::new(client, true), &config);

        let active = ActiveSet {
            entries: vec![ActiveLeader {
                address: "0xleader".to_string(),
                score: 1.0,
                weight: 0.5,
                equity: dec!(50000),
            }],
            updated_at: Some(Utc::now()),
        };
        let id = Signal::derive_id("0xleader", "ETH", SignalKind::PositionUpdate, "tick-1");
        let delta = Signal {
            id,
            leader_address: "0xleader".to_string(),
            kind: SignalKind::PositionUpdate,
            asset: "ETH".to_string(),
            side: OrderSide::Buy,
            size: dec!(50),
            price: Some(dec!(100)),
            timestamp: Utc::now(),
            order_id: None,
            metadata: HashMap::new(),
        };

        let equity = dec!(10000);
        let sized = generator.generate(vec![delta], &active, equity, &HashMap::new(), dec!(0));
        assert_eq!(sized.len(), 1);

        risk.can_execute_signal(&sized[0].signal, equity)
            .await
            .unwrap();
        let result = engine.execute(&sized[0], &risk, equity).await;
        assert!(result.outcome.is_fill());
        assert_eq!(risk.summary().await.total_exposure, dec!(500));
    }

    #[tokio::test]
    async fn finalize_persists_and_marks_stopped_within_grace() {
        let mut config = Config::default();
        config.database_url = "sqlite::memory:".to_string();
        let bot = Bot::new(config).await.unwrap();
        bot.db.init_bot_state(dec!(10000)).await.unwrap();

        bot.finalize().await.unwrap();

        let state = bot.db.get_bot_state().await.unwrap();
        assert!(!state.is_running);
        assert!(state.last_tick_at.is_some());
    }
}
