//! Converts leader deltas into equity-scaled trade intents.
//!
//! Only `PositionUpdate` deltas are sized into trades: order-level
//! events (new, fill, cancel) are informational, and a fill already
//! surfaces as a position delta in the same tick, so trading both would
//! double the copy. Conflicting signals for the same asset resolve by
//! leader rank: the higher-ranked leader's side proceeds and the
//! opposing side is dropped and logged.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::leaders::ActiveSet;
use crate::models::{Signal, SignalKind};

/// A signal sized for the follower account, ready for the risk gate.
#[derive(Debug, Clone)]
pub struct SizedSignal {
    pub signal: Signal,
    /// Follower size in asset units.
    pub size: Decimal,
    /// Price used for sizing and later slippage measurement.
    pub reference_price: Decimal,
    pub notional: Decimal,
    /// Rank of the originating leader, 0 is best.
    pub leader_rank: usize,
}

pub struct SignalGenerator {
    max_position_size: Decimal,
    max_total_exposure: Decimal,
    follow_window_seconds: i64,
}

impl SignalGenerator {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_position_size: config.max_position_size,
            max_total_exposure: config.max_total_exposure,
            follow_window_seconds: config.follow_window_seconds,
        }
    }

    /// Size one tick's deltas against the current ranking and equity.
    ///
    /// `current_exposure` is the follower's open notional before this
    /// batch; room under the total-exposure cap is allocated in rank
    /// order so the best leaders are clamped last.
    pub fn generate(
        &self,
        deltas: Vec<Signal>,
        active: &ActiveSet,
        follower_equity: Decimal,
        mids: &HashMap<String, Decimal>,
        current_exposure: Decimal,
    ) -> Vec<SizedSignal> {
        if follower_equity <= Decimal::ZERO {
            warn!("follower equity is zero, skipping signal generation");
            return Vec::new();
        }

        let now = Utc::now();
        let mut candidates: Vec<SizedSignal> = Vec::new();

        for signal in deltas {
            if signal.kind != SignalKind::PositionUpdate {
                debug!(id = %signal.id, kind = signal.kind.as_str(), "order event, not traded");
                continue;
            }
            if signal.age_seconds(now) > self.follow_window_seconds {
                info!(
                    id = %signal.id,
                    age = signal.age_seconds(now),
                    "discarding stale signal"
                );
                continue;
            }
            let Some(rank) = active.rank_of(&signal.leader_address) else {
                debug!(leader = %signal.leader_address, "leader left active set, dropping");
                continue;
            };
            let weight = active.weight_of(&signal.leader_address).unwrap_or(0.0);
            let leader_equity = active
                .equity_of(&signal.leader_address)
                .unwrap_or(Decimal::ZERO);
            if leader_equity <= Decimal::ZERO || weight <= 0.0 {
                continue;
            }
            let Some(price) = signal
                .price
                .or_else(|| mids.get(&signal.asset).copied())
                .filter(|p| *p > Decimal::ZERO)
            else {
                warn!(id = %signal.id, asset = %signal.asset, "no reference price, dropping");
                continue;
            };

            let weight = Decimal::try_from(weight).unwrap_or(Decimal::ZERO);
            let scaled = signal.size * (follower_equity / leader_equity) * weight;
            if scaled <= Decimal::ZERO {
                continue;
            }

            candidates.push(SizedSignal {
                signal,
                size: scaled,
                reference_price: price,
                notional: scaled * price,
                leader_rank: rank,
            });
        }

        self.resolve_conflicts(&mut candidates);
        self.clamp(&mut candidates, follower_equity, current_exposure);
        candidates
    }

    /// Opposite sides on the same asset within one window: the best
    /// (lowest) rank wins, opposing signals are dropped.
    fn resolve_conflicts(&self, candidates: &mut Vec<SizedSignal>) {
        let mut winning_side: HashMap<String, (usize, crate::models::OrderSide)> = HashMap::new();
        for c in candidates.iter() {
            winning_side
                .entry(c.signal.asset.clone())
                .and_modify(|(rank, side)| {
                    if c.leader_rank < *rank {
                        *rank = c.leader_rank;
                        *side = c.signal.side;
                    }
                })
                .or_insert((c.leader_rank, c.signal.side));
        }
        candidates.retain(|c| {
            let (rank, side) = winning_side[&c.signal.asset];
            if c.signal.side == side {
                true
            } else {
                info!(
                    id = %c.signal.id,
                    asset = %c.signal.asset,
                    loser_rank = c.leader_rank,
                    winner_rank = rank,
                    "conflicting signal dropped by rank"
                );
                false
            }
        });
    }

    /// Enforce the per-asset cap and allocate total-exposure room in
    /// rank order.
    fn clamp(
        &self,
        candidates: &mut Vec<SizedSignal>,
        follower_equity: Decimal,
        current_exposure: Decimal,
    ) {
        candidates.sort_by_key(|c| c.leader_rank);

        let per_asset_cap = self.max_position_size * follower_equity;
        let mut room = (self.max_total_exposure * follower_equity - current_exposure)
            .max(Decimal::ZERO);

        candidates.retain_mut(|c| {
            let cap = per_asset_cap.min(room);
            if c.notional > cap {
                debug!(
                    id = %c.signal.id,
                    notional = %c.notional,
                    cap = %cap,
                    "clamping signal"
                );
                c.notional = cap;
                c.size = if c.reference_price > Decimal::ZERO {
                    cap / c.reference_price
                } else {
                    Decimal::ZERO
                };
            }
            if c.size <= Decimal::ZERO {
                return false;
            }
            room -= c.notional;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaders::ActiveLeader;
    use crate::models::{OrderSide, SignalKind};
    use rust_decimal_macros::dec;

    const LEADER_A: &str = "0xaaaa";
    const LEADER_B: &str = "0xbbbb";

    fn active(entries: Vec<(&str, f64, Decimal)>) -> ActiveSet {
        ActiveSet {
            entries: entries
                .into_iter()
                .map(|(address, weight, equity)| ActiveLeader {
                    address: address.to_string(),
                    score: 1.0,
                    weight,
                    equity,
                })
                .collect(),
            updated_at: Some(Utc::now()),
        }
    }

    fn delta(leader: &str, asset: &str, side: OrderSide, size: Decimal) -> Signal {
        let id = Signal::derive_id(leader, asset, SignalKind::PositionUpdate, "t");
        Signal {
            id,
            leader_address: leader.to_string(),
            kind: SignalKind::PositionUpdate,
            asset: asset.to_string(),
            side,
            size,
            price: Some(dec!(100)),
            timestamp: Utc::now(),
            order_id: None,
            metadata: HashMap::new(),
        }
    }

    fn generator() -> SignalGenerator {
        SignalGenerator::from_config(&Config::default())
    }

    #[test]
    fn proportional_sizing() {
        // Leader with $50k opens a $5k long (50 units at $100); follower
        // has $10k at weight 0.5, so the copy is $500 of notional.
        let set = active(vec![(LEADER_A, 0.5, dec!(50000))]);
        let deltas = vec![delta(LEADER_A, "ETH", OrderSide::Buy, dec!(50))];
        let sized = generator().generate(
            deltas,
            &set,
            dec!(10000),
            &HashMap::new(),
            Decimal::ZERO,
        );
        assert_eq!(sized.len(), 1);
        assert_eq!(sized[0].size, dec!(5));
        assert_eq!(sized[0].notional, dec!(500));
    }

    #[test]
    fn per_asset_cap_clamps_notional() {
        // Same trade at weight 1.0 would be $1000; the 5% cap on $10k
        // equity clamps it to $500.
        let mut config = Config::default();
        config.max_position_size = dec!(0.05);
        let generator = SignalGenerator::from_config(&config);
        let set = active(vec![(LEADER_A, 1.0, dec!(50000))]);
        let deltas = vec![delta(LEADER_A, "ETH", OrderSide::Buy, dec!(100))];
        let sized =
            generator.generate(deltas, &set, dec!(10000), &HashMap::new(), Decimal::ZERO);
        assert_eq!(sized[0].notional, dec!(500));
        assert_eq!(sized[0].size, dec!(5));
    }

    #[test]
    fn exposure_room_is_shared_across_batch() {
        let mut config = Config::default();
        config.max_total_exposure = dec!(0.1); // $1000 of room on $10k
        let generator = SignalGenerator::from_config(&config);
        let set = active(vec![
            (LEADER_A, 1.0, dec!(10000)),
            (LEADER_B, 1.0, dec!(10000)),
        ]);
        let deltas = vec![
            delta(LEADER_A, "ETH", OrderSide::Buy, dec!(8)),
            delta(LEADER_B, "BTC", OrderSide::Buy, dec!(8)),
        ];
        let sized =
            generator.generate(deltas, &set, dec!(10000), &HashMap::new(), Decimal::ZERO);
        let total: Decimal = sized.iter().map(|s| s.notional).sum();
        assert!(total <= dec!(1000));
        // The higher-ranked leader got full size first.
        assert_eq!(sized[0].signal.leader_address, LEADER_A);
        assert_eq!(sized[0].notional, dec!(800));
        assert_eq!(sized[1].notional, dec!(200));
    }

    #[test]
    fn opposing_signals_resolve_by_rank() {
        let set = active(vec![
            (LEADER_A, 1.0, dec!(10000)),
            (LEADER_B, 1.0, dec!(10000)),
        ]);
        let deltas = vec![
            delta(LEADER_B, "ETH", OrderSide::Sell, dec!(1)),
            delta(LEADER_A, "ETH", OrderSide::Buy, dec!(1)),
        ];
        let sized = generator().generate(
            deltas,
            &set,
            dec!(10000),
            &HashMap::new(),
            Decimal::ZERO,
        );
        assert_eq!(sized.len(), 1);
        assert_eq!(sized[0].signal.leader_address, LEADER_A);
        assert_eq!(sized[0].signal.side, OrderSide::Buy);
    }

    #[test]
    fn stale_and_non_position_deltas_dropped() {
        let set = active(vec![(LEADER_A, 1.0, dec!(10000))]);
        let mut stale = delta(LEADER_A, "ETH", OrderSide::Buy, dec!(1));
        stale.timestamp = Utc::now() - chrono::Duration::seconds(120);
        let mut order_event = delta(LEADER_A, "ETH", OrderSide::Buy, dec!(1));
        order_event.kind = SignalKind::NewOrder;
        let sized = generator().generate(
            vec![stale, order_event],
            &set,
            dec!(10000),
            &HashMap::new(),
            Decimal::ZERO,
        );
        assert!(sized.is_empty());
    }
}
