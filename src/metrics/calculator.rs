//! Calculator for leader performance metrics: Sharpe, drawdown, win rate.

use chrono::{Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::api::types::RawFill;
use crate::models::LeaderMetrics;

/// Calculator for computing leader performance metrics from fill history.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate comprehensive metrics from a leader's fills.
    ///
    /// Only fills that carry a realized P&L contribute to win/loss and
    /// ratio statistics; open increases count toward volume and trade
    /// counts only.
    pub fn calculate(address: &str, fills: &[RawFill]) -> LeaderMetrics {
        let mut metrics = LeaderMetrics::empty(address.to_string());

        if fills.is_empty() {
            return metrics;
        }

        metrics.total_trades = fills.len() as u32;
        let notional: Decimal = fills.iter().map(|f| f.price * f.size.abs()).sum();
        metrics.avg_trade_size = notional / Decimal::from(fills.len() as u32);

        let pnls: Vec<Decimal> = fills
            .iter()
            .filter_map(|f| f.closed_pnl)
            .filter(|p| !p.is_zero())
            .collect();
        if !pnls.is_empty() {
            Self::calculate_pnl_metrics(&mut metrics, &pnls);
        }

        Self::calculate_window_pnl(&mut metrics, fills);

        metrics.last_updated = Utc::now();
        metrics
    }

    fn calculate_pnl_metrics(metrics: &mut LeaderMetrics, pnls: &[Decimal]) {
        let wins = pnls.iter().filter(|&&p| p > Decimal::ZERO).count();

        metrics.total_pnl = pnls.iter().copied().sum();
        metrics.win_rate = wins as f64 / pnls.len() as f64;

        Self::calculate_drawdown(metrics, pnls);
        Self::calculate_sharpe(metrics, pnls);
    }

    /// Maximum drawdown as a fraction of the running equity peak.
    fn calculate_drawdown(metrics: &mut LeaderMetrics, pnls: &[Decimal]) {
        let mut equity = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        let mut max_dd_pct = 0.0f64;

        for pnl in pnls {
            equity += pnl;
            if equity > peak {
                peak = equity;
            }
            if peak > Decimal::ZERO {
                let dd = peak - equity;
                let dd_pct = dd.to_f64().unwrap_or(0.0) / peak.to_f64().unwrap_or(1.0);
                if dd_pct > max_dd_pct {
                    max_dd_pct = dd_pct;
                }
            }
        }

        metrics.max_drawdown = max_dd_pct;
    }

    /// Sharpe ratio over the per-trade P&L series, annualized assuming
    /// daily returns and a 0% risk-free rate.
    fn calculate_sharpe(metrics: &mut LeaderMetrics, pnls: &[Decimal]) {
        if pnls.len() < 2 {
            return;
        }

        let returns: Vec<f64> = pnls.iter().filter_map(|p| p.to_f64()).collect();
        if returns.len() < 2 {
            return;
        }

        let mean = returns.clone().mean();
        let std_dev = returns.clone().std_dev();
        metrics.volatility = std_dev;

        if std_dev > 0.0 {
            metrics.sharpe_ratio = (mean / std_dev) * (365.0_f64).sqrt();
        }
    }

    /// Realized P&L over the trailing day, week, and month, bucketed by
    /// fill timestamp in UTC.
    fn calculate_window_pnl(metrics: &mut LeaderMetrics, fills: &[RawFill]) {
        let now = Utc::now();
        let day_ago = now - Duration::days(1);
        let week_ago = now - Duration::days(7);
        let month_ago = now - Duration::days(30);

        for fill in fills {
            let Some(pnl) = fill.closed_pnl else { continue };
            let at = fill.timestamp();
            if at >= day_ago {
                metrics.daily_pnl += pnl;
            }
            if at >= week_ago {
                metrics.weekly_pnl += pnl;
            }
            if at >= month_ago {
                metrics.monthly_pnl += pnl;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(pnl: Option<Decimal>, minutes_ago: i64) -> RawFill {
        let raw = serde_json::json!({
            "coin": "ETH",
            "px": "3000",
            "sz": "1",
            "side": "B",
            "time": (Utc::now() - Duration::minutes(minutes_ago)).timestamp_millis(),
            "closedPnl": pnl.map(|p| p.to_string()),
            "oid": 1u64,
        });
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn win_rate_from_realized_fills() {
        let fills = vec![
            fill(Some(dec!(100)), 10),
            fill(Some(dec!(-50)), 20),
            fill(Some(dec!(200)), 30),
            fill(None, 40),
        ];
        let metrics = MetricsCalculator::calculate("0x123", &fills);
        assert_eq!(metrics.total_trades, 4);
        assert_eq!(metrics.total_pnl, dec!(250));
        assert!((metrics.win_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_tracks_peak() {
        let fills = vec![
            fill(Some(dec!(100)), 50),
            fill(Some(dec!(50)), 40),
            fill(Some(dec!(-80)), 30),
            fill(Some(dec!(-20)), 20),
            fill(Some(dec!(150)), 10),
        ];
        let metrics = MetricsCalculator::calculate("0x123", &fills);
        // Peak 150, trough 50: drawdown 100/150.
        assert!(metrics.max_drawdown > 0.65 && metrics.max_drawdown < 0.68);
    }

    #[test]
    fn window_pnl_buckets_by_age() {
        let fills = vec![
            fill(Some(dec!(10)), 60),            // within a day
            fill(Some(dec!(20)), 60 * 24 * 3),   // within a week
            fill(Some(dec!(40)), 60 * 24 * 20),  // within a month
        ];
        let metrics = MetricsCalculator::calculate("0x123", &fills);
        assert_eq!(metrics.daily_pnl, dec!(10));
        assert_eq!(metrics.weekly_pnl, dec!(30));
        assert_eq!(metrics.monthly_pnl, dec!(70));
    }
}
