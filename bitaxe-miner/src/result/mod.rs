//! Scoring chip results and keeping the numbers.

pub mod difficulty;
pub mod processor;
pub mod stats;

pub use difficulty::{DIFF1, network_difficulty, share_difficulty};
pub use processor::{ResultProcessor, ShareResult};
pub use stats::{MiningStats, suffix_string};
