//! Unit types shared across the miner.

mod frequency;
mod hash_rate;

pub use frequency::Frequency;
pub use hash_rate::HashRate;
