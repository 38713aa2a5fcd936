//! Clock frequencies.
//!
//! ```
//! use bitaxe_miner::types::Frequency;
//!
//! let freq = Frequency::from_mhz(56.25);
//! assert_eq!(freq.hz(), 56_250_000);
//! assert_eq!(freq.to_string(), "56.25 MHz");
//! ```

use std::fmt;

/// A frequency, stored in whole hertz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Frequency {
    hz: u64,
}

impl Frequency {
    pub fn from_hz(hz: u64) -> Self {
        Self { hz }
    }

    /// Rounds to the nearest hertz.
    pub fn from_mhz(mhz: f32) -> Self {
        Self {
            hz: (f64::from(mhz) * 1e6).round() as u64,
        }
    }

    pub fn hz(&self) -> u64 {
        self.hz
    }

    pub fn mhz(&self) -> f32 {
        (self.hz as f64 / 1e6) as f32
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} MHz", self.hz as f64 / 1e6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(25.0, 25_000_000)]
    #[test_case(56.25, 56_250_000)]
    #[test_case(68.75, 68_750_000)]
    #[test_case(485.0, 485_000_000)]
    fn mhz_round_trip(mhz: f32, hz: u64) {
        let freq = Frequency::from_mhz(mhz);
        assert_eq!(freq.hz(), hz);
        assert_eq!(freq.mhz(), mhz);
    }

    #[test]
    fn ordering() {
        assert!(Frequency::from_mhz(56.25) < Frequency::from_mhz(485.0));
    }

    #[test]
    fn display() {
        assert_eq!(Frequency::from_hz(485_000_000).to_string(), "485.00 MHz");
    }
}
