//! PLL divider search for the hash clock.
//!
//! The chip derives its hash clock from the 25 MHz crystal:
//!
//! ```text
//! f = 25 MHz * fb_div / (ref_div * post_div1 * post_div2)
//! ```
//!
//! BM1366 accepts `fb_div` in 144..=235 and requires `post_div1 > post_div2`.

use crate::tracing::prelude::*;
use crate::types::Frequency;

const CRYSTAL_MHZ: f32 = 25.0;
const FB_DIV_RANGE: std::ops::RangeInclusive<u16> = 144..=235;

/// Candidates further than this from the target are never selected.
pub const MAX_ERROR_MHZ: f32 = 10.0;

/// VCO frequency at or above which the high-range flag must be set.
const VCO_HIGH_MHZ: f32 = 2400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllConfig {
    pub fb_div: u8,
    pub ref_div: u8,
    pub post_div1: u8,
    pub post_div2: u8,
}

impl PllConfig {
    /// Used when no divider combination reaches the target.
    pub const FALLBACK: PllConfig = PllConfig {
        fb_div: 0xa0,
        ref_div: 2,
        post_div1: 5,
        post_div2: 2,
    };

    /// Searches for the dividers closest to `target`.
    ///
    /// Iterates `ref_div` descending, then `post_div1` descending, then
    /// `post_div2` ascending; only a strictly smaller error replaces the
    /// current best, so the first combination in that order wins ties.
    pub fn search(target: Frequency) -> Option<PllConfig> {
        let target_mhz = target.mhz();
        let mut best: Option<(f32, PllConfig)> = None;

        for ref_div in (1..=2u8).rev() {
            for post_div1 in (1..=7u8).rev() {
                for post_div2 in 1..post_div1 {
                    let divisor = f32::from(post_div1) * f32::from(post_div2);
                    let fb_div = (divisor * target_mhz * f32::from(ref_div) / CRYSTAL_MHZ).round();
                    if !(f32::from(*FB_DIV_RANGE.start())..=f32::from(*FB_DIV_RANGE.end()))
                        .contains(&fb_div)
                    {
                        continue;
                    }

                    let candidate = PllConfig {
                        fb_div: fb_div as u8,
                        ref_div,
                        post_div1,
                        post_div2,
                    };
                    let error = (target_mhz - candidate.output_mhz()).abs();
                    let bound = best.map_or(MAX_ERROR_MHZ, |(e, _)| e);
                    if error < bound {
                        best = Some((error, candidate));
                    }
                }
            }
        }

        best.map(|(_, config)| config)
    }

    /// Like [`search`](Self::search), but falls back to a safe default.
    pub fn for_frequency(target: Frequency) -> PllConfig {
        match Self::search(target) {
            Some(config) => config,
            None => {
                error!(
                    target_mhz = target.mhz(),
                    "Finding dividers failed, using default value ({:.2} MHz)",
                    Self::FALLBACK.output_mhz()
                );
                Self::FALLBACK
            }
        }
    }

    pub fn output_mhz(&self) -> f32 {
        CRYSTAL_MHZ * f32::from(self.fb_div)
            / (f32::from(self.ref_div) * f32::from(self.post_div1) * f32::from(self.post_div2))
    }

    fn vco_mhz(&self) -> f32 {
        f32::from(self.fb_div) * CRYSTAL_MHZ / f32::from(self.ref_div)
    }

    /// Value for the PLL0 parameter register.
    pub fn register_value(&self) -> [u8; 4] {
        let flag = if self.vco_mhz() >= VCO_HIGH_MHZ {
            0x50
        } else {
            0x40
        };
        let post = ((self.post_div1 - 1) << 4) | (self.post_div2 - 1);
        [flag, self.fb_div, self.ref_div, post]
    }
}
