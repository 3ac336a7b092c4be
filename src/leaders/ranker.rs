//! Risk-adjusted leader scoring and active set selection.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::Config;
use crate::models::Leader;

/// One ranked, followed leader. Entries are ordered by rank (best
/// first).
#[derive(Debug, Clone)]
pub struct ActiveLeader {
    pub address: String,
    pub score: f64,
    pub weight: f64,
    pub equity: Decimal,
}

/// The published ranking. Immutable once built; readers hold an `Arc`
/// to a consistent set and are never exposed to a half-applied update.
#[derive(Debug, Default)]
pub struct ActiveSet {
    pub entries: Vec<ActiveLeader>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ActiveSet {
    pub fn addresses(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.address.clone()).collect()
    }

    pub fn address_set(&self) -> HashSet<String> {
        self.entries.iter().map(|e| e.address.clone()).collect()
    }

    /// Rank position, 0 is best.
    pub fn rank_of(&self, address: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.address == address)
    }

    pub fn weight_of(&self, address: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.address == address)
            .map(|e| e.weight)
    }

    pub fn equity_of(&self, address: &str) -> Option<Decimal> {
        self.entries
            .iter()
            .find(|e| e.address == address)
            .map(|e| e.equity)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct LeaderRanker {
    banned: HashSet<String>,
    allowed: HashSet<String>,
    min_equity: Decimal,
    max_leaders: usize,
    sharpe_weight: f64,
    drawdown_weight: f64,
    win_rate_weight: f64,
    active: Arc<RwLock<Arc<ActiveSet>>>,
}

impl LeaderRanker {
    pub fn from_config(config: &Config) -> Self {
        Self {
            banned: config.banned_leaders.iter().cloned().collect(),
            allowed: config.allowed_leaders.iter().cloned().collect(),
            min_equity: config.min_leader_equity,
            max_leaders: config.max_leaders_to_follow,
            sharpe_weight: config.score_sharpe_weight,
            drawdown_weight: config.score_drawdown_weight,
            win_rate_weight: config.score_win_rate_weight,
            active: Arc::new(RwLock::new(Arc::new(ActiveSet::default()))),
        }
    }

    pub async fn active(&self) -> Arc<ActiveSet> {
        Arc::clone(&*self.active.read().await)
    }

    /// Score, sort, select, and publish in one atomic swap.
    pub async fn rerank(&self, candidates: &[Leader]) -> Arc<ActiveSet> {
        let set = Arc::new(self.build(candidates));
        info!(
            leaders = set.entries.len(),
            top = set.entries.first().map(|e| e.address.as_str()).unwrap_or("-"),
            "ranking published"
        );
        *self.active.write().await = Arc::clone(&set);
        set
    }

    /// Pure ranking: filter, score, sort deterministically, take the
    /// top slots, assign weights.
    pub fn build(&self, candidates: &[Leader]) -> ActiveSet {
        let mut scored: Vec<(f64, &Leader)> = candidates
            .iter()
            .filter(|l| self.eligible(l))
            .map(|l| (self.score(l), l))
            .collect();

        // Descending score, ties broken by higher equity, then address.
        scored.sort_by(|(sa, la), (sb, lb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| lb.equity.cmp(&la.equity))
                .then_with(|| la.address.cmp(&lb.address))
        });
        scored.truncate(self.max_leaders);

        let top_score = scored.first().map(|(s, _)| *s).unwrap_or(0.0);
        let entries = scored
            .into_iter()
            .map(|(score, leader)| {
                let derived = if top_score > 0.0 {
                    (score / top_score).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                // Explicit operator override wins over the derived weight.
                let weight = leader.weight.unwrap_or(derived).clamp(0.0, 1.0);
                ActiveLeader {
                    address: leader.address.clone(),
                    score,
                    weight,
                    equity: leader.equity,
                }
            })
            .collect();

        ActiveSet {
            entries,
            updated_at: Some(Utc::now()),
        }
    }

    fn eligible(&self, leader: &Leader) -> bool {
        if self.banned.contains(&leader.address) {
            return false;
        }
        if !self.allowed.is_empty() && !self.allowed.contains(&leader.address) {
            return false;
        }
        if leader.equity < self.min_equity {
            return false;
        }
        leader.status.is_followable()
    }

    /// Weighted blend of risk-adjusted terms, each squashed into a
    /// comparable range: tanh(sharpe/3), drawdown as a penalty, win
    /// rate as-is.
    fn score(&self, leader: &Leader) -> f64 {
        let Some(metrics) = &leader.metrics else {
            return 0.0;
        };
        let sharpe_term = (metrics.sharpe_ratio / 3.0).tanh();
        self.sharpe_weight * sharpe_term - self.drawdown_weight * metrics.max_drawdown
            + self.win_rate_weight * metrics.win_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LeaderMetrics, LeaderStatus};
    use rust_decimal_macros::dec;

    fn leader(address: &str, equity: Decimal, sharpe: f64, dd: f64, wr: f64) -> Leader {
        let mut l = Leader::new(address.to_string());
        l.equity = equity;
        l.status = LeaderStatus::Active;
        let mut m = LeaderMetrics::empty(address.to_string());
        m.sharpe_ratio = sharpe;
        m.max_drawdown = dd;
        m.win_rate = wr;
        l.metrics = Some(m);
        l
    }

    fn ranker(config: &mut Config) -> LeaderRanker {
        config.min_leader_equity = dec!(10000);
        config.max_leaders_to_follow = 2;
        LeaderRanker::from_config(config)
    }

    #[test]
    fn banned_leaders_never_ranked() {
        let mut config = Config::default();
        config.banned_leaders = vec!["0xbad".to_string()];
        let ranker = ranker(&mut config);
        let set = ranker.build(&[
            leader("0xbad", dec!(100000), 5.0, 0.0, 1.0),
            leader("0xgood", dec!(50000), 1.0, 0.1, 0.5),
        ]);
        assert_eq!(set.addresses(), vec!["0xgood".to_string()]);
    }

    #[test]
    fn low_equity_filtered_and_top_n_kept() {
        let mut config = Config::default();
        let ranker = ranker(&mut config);
        let set = ranker.build(&[
            leader("0xaaa", dec!(50000), 2.0, 0.1, 0.6),
            leader("0xbbb", dec!(50000), 1.0, 0.3, 0.4),
            leader("0xccc", dec!(50000), 3.0, 0.05, 0.7),
            leader("0xtiny", dec!(500), 9.0, 0.0, 1.0),
        ]);
        assert_eq!(set.entries.len(), 2);
        assert_eq!(set.entries[0].address, "0xccc");
        assert_eq!(set.entries[1].address, "0xaaa");
    }

    #[test]
    fn ties_break_by_equity_then_address() {
        let mut config = Config::default();
        let ranker = ranker(&mut config);
        let set = ranker.build(&[
            leader("0xbbb", dec!(50000), 1.0, 0.1, 0.5),
            leader("0xaaa", dec!(50000), 1.0, 0.1, 0.5),
            leader("0xrich", dec!(90000), 1.0, 0.1, 0.5),
        ]);
        assert_eq!(set.entries[0].address, "0xrich");
        assert_eq!(set.entries[1].address, "0xaaa");
    }

    #[test]
    fn weight_override_wins_over_derived() {
        let mut config = Config::default();
        let ranker = ranker(&mut config);
        let mut pinned = leader("0xaaa", dec!(50000), 3.0, 0.0, 0.9);
        pinned.weight = Some(0.25);
        let set = ranker.build(&[
            pinned,
            leader("0xbbb", dec!(50000), 1.0, 0.2, 0.5),
        ]);
        assert_eq!(set.weight_of("0xaaa"), Some(0.25));
        let derived = set.weight_of("0xbbb").unwrap();
        assert!(derived > 0.0 && derived < 1.0);
    }
}
