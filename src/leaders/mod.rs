pub mod ranker;
pub mod tracker;

pub use ranker::{ActiveLeader, ActiveSet, LeaderRanker};
pub use tracker::LeaderTracker;
