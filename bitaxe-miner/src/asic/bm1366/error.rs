use thiserror::Error;

/// A chip response that doesn't look like one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("expected {expected} byte frame, got {actual}")]
    BadLength { expected: usize, actual: usize },

    #[error("bad preamble {:02x} {:02x}", .0[0], .0[1])]
    BadPreamble([u8; 2]),
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no chips responded to discovery")]
    NoChips,

    #[error("operation requires state {expected:?}, driver is in {actual:?}")]
    WrongState {
        expected: super::driver::DriverState,
        actual: super::driver::DriverState,
    },
}

pub type DriverResult<T> = Result<T, DriverError>;
