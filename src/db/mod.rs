//! SQLite persistence for durable pipeline state.
//!
//! Stores everything needed to resume after restart:
//! - Bot state (equity, exposure, running flag)
//! - Tracked leaders, their status and weights
//! - Leader metrics history per ranking cycle
//! - Signal records (for duplicate suppression across restarts)
//! - Execution results

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::error::Result;
use crate::models::{ExecutionResult, LeaderMetrics, LeaderStatus, Signal};

pub struct Database {
    pool: SqlitePool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BotState {
    pub id: i64,
    pub equity: f64,
    pub current_exposure: f64,
    pub daily_pnl: f64,
    pub is_running: bool,
    pub last_tick_at: Option<String>,
    pub started_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredLeader {
    pub address: String,
    pub status: String,
    pub equity: f64,
    /// Operator weight override; None derives from score.
    pub weight: Option<f64>,
    pub is_tracked: bool,
    pub last_activity: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSignal {
    pub id: String,
    pub leader_address: String,
    pub kind: String,
    pub asset: String,
    pub side: String,
    pub size: f64,
    pub price: Option<f64>,
    pub created_at: String,
}

impl StoredSignal {
    /// Price column for display; cancels and untagged deltas have none.
    pub fn price_display(&self) -> String {
        self.price.map_or("-".to_string(), |p| format!("{p:.4}"))
    }
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                equity REAL NOT NULL DEFAULT 0,
                current_exposure REAL NOT NULL DEFAULT 0,
                daily_pnl REAL NOT NULL DEFAULT 0,
                is_running INTEGER NOT NULL DEFAULT 0,
                last_tick_at TEXT,
                started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS leaders (
                address TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'active',
                equity REAL NOT NULL DEFAULT 0,
                weight REAL,
                is_tracked INTEGER NOT NULL DEFAULT 1,
                last_activity TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS leader_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                calculated_at TEXT NOT NULL,
                total_pnl REAL NOT NULL,
                daily_pnl REAL NOT NULL DEFAULT 0,
                weekly_pnl REAL NOT NULL DEFAULT 0,
                monthly_pnl REAL NOT NULL DEFAULT 0,
                sharpe_ratio REAL NOT NULL,
                max_drawdown REAL NOT NULL,
                win_rate REAL NOT NULL,
                total_trades INTEGER NOT NULL,
                avg_trade_size REAL NOT NULL DEFAULT 0,
                volatility REAL NOT NULL DEFAULT 0,
                FOREIGN KEY (address) REFERENCES leaders(address)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                leader_address TEXT NOT NULL,
                kind TEXT NOT NULL,
                asset TEXT NOT NULL,
                side TEXT NOT NULL,
                size REAL NOT NULL,
                price REAL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                signal_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                cloid TEXT,
                attempts INTEGER NOT NULL,
                filled_size REAL,
                filled_price REAL,
                slippage_bps REAL,
                error_message TEXT,
                completed_at TEXT NOT NULL,
                FOREIGN KEY (signal_id) REFERENCES signals(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_leader ON signals(leader_address)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_created ON signals(created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_signal ON executions(signal_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_metrics_address ON leader_metrics(address)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Bot State ====================

    pub async fn init_bot_state(&self, equity: Decimal) -> Result<BotState> {
        sqlx::query(
            r#"
            INSERT INTO bot_state (id, equity, is_running, started_at, updated_at)
            VALUES (1, ?, 1, datetime('now'), datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                equity = excluded.equity,
                is_running = 1,
                updated_at = datetime('now')
            "#,
        )
        .bind(equity.to_f64().unwrap_or(0.0))
        .execute(&self.pool)
        .await?;

        self.get_bot_state().await
    }

    pub async fn get_bot_state(&self) -> Result<BotState> {
        let state = sqlx::query_as::<_, BotState>("SELECT * FROM bot_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(state)
    }

    pub async fn update_bot_state(
        &self,
        equity: Decimal,
        exposure: Decimal,
        daily_pnl: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bot_state SET
                equity = ?,
                current_exposure = ?,
                daily_pnl = ?,
                last_tick_at = datetime('now'),
                updated_at = datetime('now')
            WHERE id = 1
            "#,
        )
        .bind(equity.to_f64().unwrap_or(0.0))
        .bind(exposure.to_f64().unwrap_or(0.0))
        .bind(daily_pnl.to_f64().unwrap_or(0.0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_bot_stopped(&self) -> Result<()> {
        sqlx::query("UPDATE bot_state SET is_running = 0, updated_at = datetime('now') WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Leaders ====================

    pub async fn save_leader(&self, address: &str, weight: Option<f64>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO leaders (address, weight)
            VALUES (?, ?)
            ON CONFLICT(address) DO UPDATE SET
                weight = excluded.weight,
                is_tracked = 1,
                updated_at = datetime('now')
            "#,
        )
        .bind(address)
        .bind(weight)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_leader(&self, address: &str) -> Result<Option<StoredLeader>> {
        let row = sqlx::query_as::<_, StoredLeader>(
            "SELECT address, status, equity, weight, is_tracked, last_activity FROM leaders WHERE address = ?",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_tracked_leaders(&self) -> Result<Vec<StoredLeader>> {
        let rows = sqlx::query_as::<_, StoredLeader>(
            "SELECT address, status, equity, weight, is_tracked, last_activity FROM leaders WHERE is_tracked = 1",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn untrack_leader(&self, address: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE leaders SET is_tracked = 0, updated_at = datetime('now') WHERE address = ?",
        )
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_leader_status(&self, address: &str, status: LeaderStatus) -> Result<()> {
        sqlx::query(
            "UPDATE leaders SET status = ?, updated_at = datetime('now') WHERE address = ?",
        )
        .bind(status.as_str())
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_leader_state(&self, address: &str, equity: Decimal) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE leaders SET
                equity = ?,
                last_activity = datetime('now'),
                updated_at = datetime('now')
            WHERE address = ?
            "#,
        )
        .bind(equity.to_f64().unwrap_or(0.0))
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Metrics ====================

    /// Append one metrics row. History is append-only: each ranking
    /// cycle adds a row rather than mutating the last one.
    pub async fn save_leader_metrics(&self, metrics: &LeaderMetrics) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO leader_metrics (
                address, calculated_at, total_pnl, daily_pnl, weekly_pnl, monthly_pnl,
                sharpe_ratio, max_drawdown, win_rate, total_trades, avg_trade_size, volatility
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&metrics.address)
        .bind(metrics.last_updated.to_rfc3339())
        .bind(metrics.total_pnl.to_f64().unwrap_or(0.0))
        .bind(metrics.daily_pnl.to_f64().unwrap_or(0.0))
        .bind(metrics.weekly_pnl.to_f64().unwrap_or(0.0))
        .bind(metrics.monthly_pnl.to_f64().unwrap_or(0.0))
        .bind(metrics.sharpe_ratio)
        .bind(metrics.max_drawdown)
        .bind(metrics.win_rate)
        .bind(metrics.total_trades as i64)
        .bind(metrics.avg_trade_size.to_f64().unwrap_or(0.0))
        .bind(metrics.volatility)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_latest_metrics(&self, address: &str) -> Result<Option<(f64, f64, f64)>> {
        let row: Option<(f64, f64, f64)> = sqlx::query_as(
            r#"
            SELECT sharpe_ratio, max_drawdown, win_rate
            FROM leader_metrics WHERE address = ?
            ORDER BY calculated_at DESC LIMIT 1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ==================== Signals ====================

    /// Persist a signal. The deterministic id makes this naturally
    /// idempotent: replaying the same delta inserts nothing.
    pub async fn store_signal(&self, signal: &Signal) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO signals (id, leader_address, kind, asset, side, size, price, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.id)
        .bind(&signal.leader_address)
        .bind(signal.kind.as_str())
        .bind(&signal.asset)
        .bind(signal.side.as_str())
        .bind(signal.size.to_f64().unwrap_or(0.0))
        .bind(signal.price.and_then(|p| p.to_f64()))
        .bind(signal.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn has_signal(&self, signal_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM signals WHERE id = ?")
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get_recent_signals(&self, limit: i64) -> Result<Vec<StoredSignal>> {
        let rows = sqlx::query_as::<_, StoredSignal>(
            "SELECT * FROM signals ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ==================== Executions ====================

    pub async fn record_execution(&self, result: &ExecutionResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executions (
                signal_id, outcome, cloid, attempts, filled_size, filled_price,
                slippage_bps, error_message, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.signal_id)
        .bind(result.outcome.as_str())
        .bind(&result.cloid)
        .bind(result.attempts as i64)
        .bind(result.filled_size.and_then(|s| s.to_f64()))
        .bind(result.filled_price.and_then(|p| p.to_f64()))
        .bind(result.slippage_bps)
        .bind(&result.error)
        .bind(result.completed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn execution_count_today(&self) -> Result<i64> {
        let today = Utc::now().date_naive().to_string();
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM executions WHERE completed_at >= ?",
        )
        .bind(today)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Executions that ended without a fill today. Surfaced by the
    /// status command as the unresolved error count.
    pub async fn failed_execution_count_today(&self) -> Result<i64> {
        let today = Utc::now().date_naive().to_string();
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM executions WHERE completed_at >= ? AND outcome IN ('failed', 'skipped')",
        )
        .bind(today)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}
