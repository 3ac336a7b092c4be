//! Data models for leaders, snapshots, signals, and executions.

mod execution;
mod leader;
mod signal;
mod snapshot;

pub use execution::{slippage_bps, ExecutionAttempt, ExecutionOutcome, ExecutionResult};
pub use leader::{Leader, LeaderMetrics, LeaderStatus};
pub use signal::{OrderSide, Signal, SignalKind};
pub use snapshot::{LeaderSnapshot, OrderSnapshot, PositionSnapshot};
