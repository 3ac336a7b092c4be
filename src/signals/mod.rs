pub mod generator;

pub use generator::{SignalGenerator, SizedSignal};
