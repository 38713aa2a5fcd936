//! BM1366 support.
//!
//! The BM1366 takes a header template and rolls nonce and version bits
//! itself, reporting any nonce that beats its ticket mask.

pub mod crc;
pub mod driver;
pub mod error;
pub mod pll;
pub mod protocol;
pub mod sequence;

pub use driver::{
    ASIC_DIFFICULTY, Bm1366, DriverState, JOB_INTERVAL, MAX_CHIPS, ResultReceiver, WorkSender,
};
pub use error::{DriverError, DriverResult, ProtocolError};
pub use pll::PllConfig;
pub use protocol::AsicResult;
