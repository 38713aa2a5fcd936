//! Hashing ASIC drivers.

pub mod bm1366;
