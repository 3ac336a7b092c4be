//! Snapshot tracking and diffing for followed leaders.
//!
//! The tracker holds at most one prior snapshot per leader. Each tick it
//! polls every active leader concurrently, diffs the fresh snapshot
//! against the stored one, and emits discrete deltas. A failed poll
//! retains the old snapshot untouched so a missing observation is never
//! misread as a position close.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::api::{DataSource, InfoProvider};
use crate::error::{CopyError, Result};
use crate::models::{LeaderSnapshot, OrderSide, OrderSnapshot, Signal, SignalKind};

pub struct LeaderTracker {
    snapshots: HashMap<String, LeaderSnapshot>,
}

impl LeaderTracker {
    pub fn new() -> Self {
        Self {
            snapshots: HashMap::new(),
        }
    }

    pub fn snapshot(&self, address: &str) -> Option<&LeaderSnapshot> {
        self.snapshots.get(address)
    }

    /// Drop state for leaders no longer in the active set.
    pub fn retain_active(&mut self, active: &HashSet<String>) {
        self.snapshots.retain(|address, _| active.contains(address));
    }

    /// Poll every active leader concurrently and return the combined
    /// deltas. Each fetch is bounded by `timeout` and isolated: one
    /// leader failing or hanging never blocks the others.
    pub async fn poll_all<P: InfoProvider>(
        &mut self,
        source: &DataSource<P>,
        active: &[String],
        timeout: Duration,
    ) -> Vec<Signal> {
        let fetches = active.iter().map(|address| async move {
            let result = tokio::time::timeout(timeout, source.leader_snapshot(address)).await;
            let result = match result {
                Ok(inner) => inner,
                Err(_) => Err(CopyError::DataUnavailable(format!(
                    "poll timed out after {}s",
                    timeout.as_secs()
                ))),
            };
            (address.clone(), result)
        });

        let mut signals = Vec::new();
        for (address, result) in join_all(fetches).await {
            match result {
                Ok(snapshot) => match self.apply(&address, snapshot) {
                    Ok(deltas) => signals.extend(deltas),
                    Err(CopyError::StaleData(reason)) => {
                        debug!(leader = %address, %reason, "discarding stale snapshot");
                    }
                    Err(e) => warn!(leader = %address, error = %e, "diff failed"),
                },
                Err(e) => {
                    // Previous snapshot stays in place; no deltas this tick.
                    warn!(leader = %address, error = %e, "poll skipped");
                }
            }
        }
        signals
    }

    /// Accept a fresh snapshot for one leader, returning the deltas
    /// against the stored one. The first snapshot for a leader is the
    /// baseline and produces no deltas.
    pub fn apply(&mut self, address: &str, new: LeaderSnapshot) -> Result<Vec<Signal>> {
        let Some(prev) = self.snapshots.get(address) else {
            debug!(leader = %address, sequence = new.sequence, "baseline snapshot");
            self.snapshots.insert(address.to_string(), new);
            return Ok(Vec::new());
        };

        if new.sequence <= prev.sequence {
            return Err(CopyError::StaleData(format!(
                "sequence {} is not newer than {}",
                new.sequence, prev.sequence
            )));
        }

        let signals = Self::diff(address, prev, &new);
        self.snapshots.insert(address.to_string(), new);
        Ok(signals)
    }

    fn diff(address: &str, prev: &LeaderSnapshot, new: &LeaderSnapshot) -> Vec<Signal> {
        let mut signals = Vec::new();
        let now = Utc::now();

        // Position deltas across the union of assets.
        let assets: HashSet<&String> = prev
            .positions
            .keys()
            .chain(new.positions.keys())
            .collect();
        for asset in assets {
            let before = prev.position_size(asset);
            let after = new.position_size(asset);
            let delta = after - before;
            if delta.is_zero() {
                continue;
            }
            let side = if delta > Decimal::ZERO {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            };
            let price = new
                .positions
                .get(asset)
                .map(|p| p.mark_price)
                .filter(|p| !p.is_zero());
            let fingerprint = format!("{}|{}|{}", new.sequence, before, after);
            let id = Signal::derive_id(address, asset, SignalKind::PositionUpdate, &fingerprint);
            signals.push(Signal {
                id,
                leader_address: address.to_string(),
                kind: SignalKind::PositionUpdate,
                asset: asset.clone(),
                side,
                size: delta.abs(),
                price,
                timestamp: now,
                order_id: None,
                metadata: HashMap::new(),
            });
        }

        // Orders that appeared since the last snapshot.
        for (oid, order) in &new.orders {
            if prev.orders.contains_key(oid) {
                continue;
            }
            let fingerprint = format!("{}|{}", new.sequence, oid);
            let id = Signal::derive_id(address, &order.asset, SignalKind::NewOrder, &fingerprint);
            signals.push(Signal {
                id,
                leader_address: address.to_string(),
                kind: SignalKind::NewOrder,
                asset: order.asset.clone(),
                side: order.side,
                size: order.size,
                price: Some(order.limit_price),
                timestamp: now,
                order_id: Some(*oid),
                metadata: HashMap::new(),
            });
        }

        // Orders that vanished: a consistent position move means a fill,
        // otherwise it was cancelled.
        for (oid, order) in &prev.orders {
            if new.orders.contains_key(oid) {
                continue;
            }
            let before = prev.position_size(&order.asset);
            let after = new.position_size(&order.asset);
            let moved = after - before;
            let filled = Self::fill_consistent(order, moved);

            let (kind, size) = if let Some(filled_size) = filled {
                (SignalKind::ModifyOrder, filled_size)
            } else {
                (SignalKind::CancelOrder, order.size)
            };
            let fingerprint = format!("{}|{}", new.sequence, oid);
            let id = Signal::derive_id(address, &order.asset, kind, &fingerprint);
            signals.push(Signal {
                id,
                leader_address: address.to_string(),
                kind,
                asset: order.asset.clone(),
                side: order.side,
                size,
                price: Some(order.limit_price),
                timestamp: now,
                order_id: Some(*oid),
                metadata: HashMap::new(),
            });
        }

        signals
    }

    /// A vanished order counts as filled when the position moved in the
    /// order's direction. Returns the filled size, capped at the order
    /// size.
    fn fill_consistent(order: &OrderSnapshot, moved: Decimal) -> Option<Decimal> {
        let aligned = match order.side {
            OrderSide::Buy => moved > Decimal::ZERO,
            OrderSide::Sell => moved < Decimal::ZERO,
        };
        if aligned {
            Some(moved.abs().min(order.size))
        } else {
            None
        }
    }
}

impl Default for LeaderTracker {
    fn default() -> Self {
        Self::new()
    }
}
