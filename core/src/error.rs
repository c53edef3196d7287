//! Error types for the request processor.
//!
//! # Design
//! Failures fall into two families. `ProcessorError` is returned
//! synchronously from `acquire`/`configure`/`submit` and from processor
//! creation. `TransportError` is never returned; it only reaches the caller
//! through a slot's error callback. Both map onto the small integer codes
//! used by the C boundary.

use std::io;

use crate::pool::Handle;

/// Status codes shared with the C boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    ObjectBusy = 1,
    UnknownObject = 2,
    NotEnoughMemory = 3,
    Timeout = 4,
    UnknownError = 5,
}

impl Status {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Errors returned synchronously by the processor API.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The slot is currently owned by the transport driver.
    #[error("slot {handle} is busy")]
    ObjectBusy { handle: Handle },

    /// The handle is out of range or the slot is in the wrong state.
    #[error("slot {handle} is unknown or not in a usable state")]
    UnknownObject { handle: Handle },

    /// Every slot in the pool is in use.
    #[error("no free request slot")]
    NotEnoughMemory,

    /// A header table is full or an entry is over its length bound.
    #[error("header table capacity exceeded")]
    CapacityExceeded,

    #[error("invalid header: {0:?}")]
    InvalidHeader(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("request body of {len} bytes exceeds the {max} byte limit")]
    BodyTooLarge { len: usize, max: usize },

    /// The processor is not running, either not yet started or already stopped.
    #[error("processor is not running")]
    NotStarted,

    /// The transport driver could not be constructed.
    #[error("transport driver initialization failed")]
    InitializationFailed(#[source] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ProcessorError {
    /// The wire status code for this error.
    pub fn status(&self) -> Status {
        match self {
            ProcessorError::ObjectBusy { .. } => Status::ObjectBusy,
            ProcessorError::UnknownObject { .. } => Status::UnknownObject,
            ProcessorError::NotEnoughMemory | ProcessorError::CapacityExceeded => {
                Status::NotEnoughMemory
            }
            ProcessorError::InvalidHeader(_)
            | ProcessorError::InvalidUrl(_)
            | ProcessorError::BodyTooLarge { .. }
            | ProcessorError::NotStarted
            | ProcessorError::InitializationFailed(_)
            | ProcessorError::Config(_) => Status::UnknownError,
        }
    }
}

/// Transport-level failures delivered through the error callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The exchange did not finish within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// DNS resolution or the TCP connection failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The connection broke or the peer spoke invalid HTTP.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The processor was stopped while the request was in flight.
    #[error("request cancelled by processor shutdown")]
    Cancelled,
}

impl TransportError {
    /// Integer code passed to C error callbacks.
    ///
    /// `Timeout` shares its value with `Status::Timeout`.
    pub fn code(&self) -> u32 {
        match self {
            TransportError::Timeout => Status::Timeout.code(),
            TransportError::Protocol(_) => Status::UnknownError.code(),
            TransportError::Cancelled => 6,
            TransportError::Connect(_) => 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_wire_values() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::ObjectBusy.code(), 1);
        assert_eq!(Status::UnknownObject.code(), 2);
        assert_eq!(Status::NotEnoughMemory.code(), 3);
        assert_eq!(Status::Timeout.code(), 4);
        assert_eq!(Status::UnknownError.code(), 5);
    }

    #[test]
    fn usage_errors_map_to_status() {
        assert_eq!(ProcessorError::ObjectBusy { handle: 0 }.status(), Status::ObjectBusy);
        assert_eq!(
            ProcessorError::UnknownObject { handle: 3 }.status(),
            Status::UnknownObject
        );
        assert_eq!(ProcessorError::NotEnoughMemory.status(), Status::NotEnoughMemory);
        assert_eq!(ProcessorError::CapacityExceeded.status(), Status::NotEnoughMemory);
        assert_eq!(ProcessorError::NotStarted.status(), Status::UnknownError);
    }

    #[test]
    fn timeout_shares_code_with_status() {
        assert_eq!(TransportError::Timeout.code(), Status::Timeout.code());
        assert_ne!(TransportError::Cancelled.code(), TransportError::Timeout.code());
    }

    #[test]
    fn display_includes_handle() {
        let msg = ProcessorError::ObjectBusy { handle: 7 }.to_string();
        assert_eq!(msg, "slot 7 is busy");
    }
}
