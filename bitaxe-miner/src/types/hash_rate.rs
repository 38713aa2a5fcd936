//! Hashrate.

use std::fmt;

/// Hashes per second.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HashRate(pub u64);

impl HashRate {
    pub fn from_gigahashes(gh: f64) -> Self {
        Self((gh * 1e9) as u64)
    }

    pub fn as_gigahashes(&self) -> f64 {
        self.0 as f64 / 1e9
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hs = self.0 as f64;
        if hs >= 1e12 {
            write!(f, "{:.2} TH/s", hs / 1e12)
        } else if hs >= 1e9 {
            write!(f, "{:.2} GH/s", hs / 1e9)
        } else if hs >= 1e6 {
            write!(f, "{:.2} MH/s", hs / 1e6)
        } else {
            write!(f, "{} H/s", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(HashRate(0), "0 H/s")]
    #[test_case(HashRate::from_gigahashes(0.5), "500.00 MH/s")]
    #[test_case(HashRate::from_gigahashes(1099.51), "1.10 TH/s")]
    #[test_case(HashRate::from_gigahashes(485.0), "485.00 GH/s")]
    fn display(rate: HashRate, expect: &str) {
        assert_eq!(rate.to_string(), expect);
    }

    #[test]
    fn gigahashes_round_trip() {
        assert_eq!(HashRate::from_gigahashes(1.5).as_gigahashes(), 1.5);
    }
}
