//! Mining statistics.
//!
//! The result processor is the only writer. Everything else reads through
//! the atomic getters and may see one counter updated before another.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::types::HashRate;

/// Samples kept for the rolling hashrate.
pub const HISTORY_LENGTH: usize = 100;

const HASHES_PER_DIFF1: f64 = 4_294_967_296.0;

/// Rolling hashrate over the last [`HISTORY_LENGTH`] results.
///
/// Every result stands for `difficulty * 2^32` hashes. Until the ring fills
/// the span runs from when mining started; afterwards it runs from the
/// oldest kept sample and the estimate is smoothed as
/// `(current * 9 + rolling) / 10`.
#[derive(Debug)]
pub struct HashrateRing {
    samples: VecDeque<(Instant, f64)>,
    started: Instant,
    current_ghs: f64,
}

impl HashrateRing {
    pub fn new(started: Instant) -> Self {
        Self {
            samples: VecDeque::with_capacity(HISTORY_LENGTH),
            started,
            current_ghs: 0.0,
        }
    }

    /// Forgets all samples and starts timing again from `at`.
    pub fn restart(&mut self, at: Instant) {
        self.samples.clear();
        self.started = at;
        self.current_ghs = 0.0;
    }

    /// Adds a result of `difficulty` seen at `at` and returns GH/s.
    pub fn record_at(&mut self, at: Instant, difficulty: f64) -> f64 {
        let was_full = self.samples.len() == HISTORY_LENGTH;
        if was_full {
            self.samples.pop_front();
        }
        self.samples.push_back((at, difficulty));

        let since = match self.samples.front() {
            Some(&(oldest, _)) if was_full => oldest,
            _ => self.started,
        };
        let duration = at.saturating_duration_since(since).as_secs_f64();
        if duration <= 0.0 {
            return self.current_ghs;
        }

        let sum: f64 = self.samples.iter().map(|&(_, d)| d).sum();
        let rolling = sum * HASHES_PER_DIFF1 / (duration * 1e9);

        self.current_ghs = if self.samples.len() < HISTORY_LENGTH {
            rolling
        } else {
            (self.current_ghs * 9.0 + rolling) / 10.0
        };
        self.current_ghs
    }

    pub fn gigahashes(&self) -> f64 {
        self.current_ghs
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// What a share did to the best-difficulty records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BestUpdate {
    pub session: bool,
    pub all_time: bool,
}

#[derive(Debug)]
pub struct MiningStats {
    shares_accepted: AtomicU64,
    shares_rejected: AtomicU64,
    best_session_diff: AtomicU64,
    best_diff: AtomicU64,
    blocks_found: AtomicU64,
    hashrate_ghs: AtomicU64,
    ring: Mutex<HashrateRing>,
}

impl Default for MiningStats {
    fn default() -> Self {
        Self {
            shares_accepted: AtomicU64::new(0),
            shares_rejected: AtomicU64::new(0),
            best_session_diff: AtomicU64::new(0),
            best_diff: AtomicU64::new(0),
            blocks_found: AtomicU64::new(0),
            hashrate_ghs: AtomicU64::new(0f64.to_bits()),
            ring: Mutex::new(HashrateRing::new(Instant::now())),
        }
    }
}

impl MiningStats {
    /// Seeds the all-time best from persisted state.
    pub fn with_best_diff(best_diff: u64) -> Self {
        let stats = Self::default();
        stats.best_diff.store(best_diff, Ordering::Relaxed);
        stats
    }

    /// Marks the start of hashing for the rolling hashrate.
    pub fn mining_started(&self, at: Instant) {
        self.ring.lock().restart(at);
        self.hashrate_ghs.store(0f64.to_bits(), Ordering::Relaxed);
    }

    /// Folds one chip result of `asic_difficulty` into the hashrate.
    pub fn record_result(&self, at: Instant, asic_difficulty: f64) -> f64 {
        let ghs = self.ring.lock().record_at(at, asic_difficulty);
        self.hashrate_ghs.store(ghs.to_bits(), Ordering::Relaxed);
        ghs
    }

    /// Updates the best-difficulty records with a share of `difficulty`.
    pub fn record_difficulty(&self, difficulty: f64) -> BestUpdate {
        let diff = difficulty as u64;
        BestUpdate {
            session: self.best_session_diff.fetch_max(diff, Ordering::Relaxed) < diff,
            all_time: self.best_diff.fetch_max(diff, Ordering::Relaxed) < diff,
        }
    }

    pub fn record_block(&self) {
        self.blocks_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submit_result(&self, accepted: bool) {
        let counter = if accepted {
            &self.shares_accepted
        } else {
            &self.shares_rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn shares_accepted(&self) -> u64 {
        self.shares_accepted.load(Ordering::Relaxed)
    }

    pub fn shares_rejected(&self) -> u64 {
        self.shares_rejected.load(Ordering::Relaxed)
    }

    pub fn best_session_diff(&self) -> u64 {
        self.best_session_diff.load(Ordering::Relaxed)
    }

    pub fn best_diff(&self) -> u64 {
        self.best_diff.load(Ordering::Relaxed)
    }

    pub fn blocks_found(&self) -> u64 {
        self.blocks_found.load(Ordering::Relaxed)
    }

    pub fn hashrate(&self) -> HashRate {
        HashRate::from_gigahashes(f64::from_bits(self.hashrate_ghs.load(Ordering::Relaxed)))
    }
}

/// Formats `value` with an SI suffix to three significant digits.
///
/// Values below 1000 print as plain integers.
pub fn suffix_string(value: u64) -> String {
    const KILO: u64 = 1_000;
    const MEGA: u64 = 1_000_000;
    const GIGA: u64 = 1_000_000_000;
    const TERA: u64 = 1_000_000_000_000;
    const PETA: u64 = 1_000_000_000_000_000;
    const EXA: u64 = 1_000_000_000_000_000_000;

    const SCALES: [(u64, u64, &str); 6] = [
        (EXA, PETA, "E"),
        (PETA, TERA, "P"),
        (TERA, GIGA, "T"),
        (GIGA, MEGA, "G"),
        (MEGA, KILO, "M"),
        (KILO, 1, "k"),
    ];

    for (threshold, divisor, suffix) in SCALES {
        if value >= threshold {
            let scaled = (value / divisor) as f64 / 1000.0;
            return format!("{}{}", three_significant(scaled), suffix);
        }
    }
    value.to_string()
}

fn three_significant(value: f64) -> String {
    let decimals = if value >= 100.0 {
        0
    } else if value >= 10.0 {
        1
    } else {
        2
    };
    let text = format!("{:.*}", decimals, value);
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}
