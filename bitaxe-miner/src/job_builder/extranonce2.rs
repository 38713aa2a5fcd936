//! Miner-chosen extranonce2 values.

use std::fmt;

/// A 32-bit counter rendered at the width the pool asked for.
///
/// The counter's little-endian bytes fill the field; wider fields are
/// zero-padded on the right, narrower ones keep only the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extranonce2 {
    counter: u32,
    width: usize,
}

impl Extranonce2 {
    pub fn new(counter: u32, width: usize) -> Self {
        Self { counter, width }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Field width in bytes.
    pub fn width(&self) -> usize {
        self.width
    }

    /// The following value, wrapping at `u32::MAX`.
    pub fn next(&self) -> Self {
        Self {
            counter: self.counter.wrapping_add(1),
            width: self.width,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.width];
        let counter = self.counter.to_le_bytes();
        let n = self.width.min(counter.len());
        bytes[..n].copy_from_slice(&counter[..n]);
        bytes
    }
}

impl fmt::Display for Extranonce2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}
