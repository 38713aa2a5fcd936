//! Mining firmware core for BM1366-based Bitaxe boards.
//!
//! Work flows from a Stratum v1 pool through the job builder to the chip
//! over its serial link; nonces come back through the result processor and
//! the good ones go back to the pool as shares. See [`pipeline`] for how the
//! stages connect and [`daemon`] for how they are run.

pub mod asic;
pub mod config;
pub mod context;
pub mod daemon;
pub mod job_builder;
pub mod pipeline;
pub mod result;
pub mod store;
pub mod stratum_v1;
pub mod tracing;
pub mod transport;
pub mod types;
