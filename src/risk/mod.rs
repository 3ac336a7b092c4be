pub mod manager;

pub use manager::{RiskManager, RiskSummary};
