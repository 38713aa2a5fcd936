//! Stratum v1 mining protocol client.
//!
//! The protocol is JSON-RPC over TCP with newline-delimited messages:
//!
//! - **Client requests**: subscribe, configure, authorize, suggest_difficulty,
//!   submit
//! - **Server notifications**: mining.notify (new work), mining.set_difficulty,
//!   mining.set_version_mask, client.reconnect
//! - **Server responses**: boolean results or error arrays, correlated only by
//!   request id
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut client = PoolClient::connect("public-pool.io", 21496).await?;
//! client.handshake("bc1q...", "x", 1000).await?;
//!
//! loop {
//!     match client.receive_message().await? {
//!         StratumEvent::Notify(template) => { /* build jobs */ }
//!         StratumEvent::SetDifficulty(d) => { /* update session */ }
//!         _ => {}
//!     }
//! }
//! ```

mod client;
mod connection;
mod error;
mod messages;

pub use client::{DEFAULT_IDLE_TIMEOUT, PoolClient, StratumClient, user_agent};
pub use connection::{Connection, MAX_LINE_LENGTH, Transport};
#[cfg(test)]
pub(crate) use connection::{MockTransport, MockTransportHandle};
pub use error::{StratumError, StratumResult};
pub use messages::{
    MAX_EXTRANONCE2_LEN, MAX_MERKLE_BRANCHES, MiningTemplate, StratumEvent, SubmitParams,
    Subscription, classify,
};
