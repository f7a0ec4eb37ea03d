//! Transport and device error types.
//!
//! `StackerError` is the single error type returned by every driver and
//! controller operation. Its variants are kept distinguishable so callers can
//! tell a communication timeout from a mechanical stall:
//!
//! - **`Timeout`**: no confirmation line arrived within the response window.
//! - **`MalformedResponse`**: a line arrived but did not match the command it
//!   answers (wrong echo, missing `ok`, unparsable field).
//! - **`StallOrCollision`**: the motor driver reported an obstruction. Names
//!   the axis and the unit's serial number for field diagnosis.
//! - **`Firmware`**: any other `ERR<code>` line from the firmware.
//! - **`NotConnected`**: the driver was used before `connect()` or after
//!   `disconnect()`.
//! - **`HopperDoorOpen`** / **`InvalidParameter`**: preconditions of a
//!   labware transfer that failed before any motion.
//! - **`Io`**: the underlying port failed.
//!
//! No variant is retried inside this workspace. Retry policy belongs to the
//! caller.

use crate::types::StackerAxis;
use thiserror::Error;

/// Convenience alias for results using the stacker error type.
pub type StackerResult<T> = std::result::Result<T, StackerError>;

/// Primary error type for Flex Stacker transport and motion.
#[derive(Error, Debug)]
pub enum StackerError {
    /// The device did not answer within the response timeout.
    #[error("Flex Stacker timed out after {timeout_ms} ms waiting for response to '{command}'")]
    Timeout { command: String, timeout_ms: u64 },

    /// The response line did not match the expected shape.
    #[error("Malformed response to '{command}': '{response}'")]
    MalformedResponse { command: String, response: String },

    /// The motor driver detected a stall or collision during motion.
    #[error("Flex Stacker {serial_number} stall or collision detected on {axis} axis")]
    StallOrCollision {
        axis: StackerAxis,
        serial_number: String,
    },

    /// The firmware rejected the command with an error code.
    #[error("Flex Stacker firmware error {code} for '{command}': {message}")]
    Firmware {
        command: String,
        code: u16,
        message: String,
    },

    /// The serial connection is not open.
    #[error("Flex Stacker serial port not connected")]
    NotConnected,

    /// The hopper door must be closed before labware can move.
    #[error("Flex Stacker {serial_number} hopper door is open")]
    HopperDoorOpen { serial_number: String },

    /// A motion request was outside the axis or labware limits.
    #[error("Invalid Flex Stacker motion request: {0}")]
    InvalidParameter(String),

    /// The serial port closed mid-response.
    #[error("Unexpected EOF from Flex Stacker serial port")]
    UnexpectedEof,

    /// Standard I/O failure on the port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StackerError {
    /// Whether this error came from the motor driver's stall detection.
    pub fn is_stall(&self) -> bool {
        matches!(self, StackerError::StallOrCollision { .. })
    }

    /// Whether this error is a response timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StackerError::Timeout { .. })
    }

    /// Build a `MalformedResponse` for `command`.
    pub fn malformed(command: &str, response: &str) -> Self {
        StackerError::MalformedResponse {
            command: command.to_string(),
            response: response.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stall_error_names_axis_and_serial() {
        let err = StackerError::StallOrCollision {
            axis: StackerAxis::Z,
            serial_number: "FSV01020240101A01".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Z axis"));
        assert!(msg.contains("FSV01020240101A01"));
        assert!(err.is_stall());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_timeout_is_distinct_from_stall() {
        let err = StackerError::Timeout {
            command: "G28 X:0".into(),
            timeout_ms: 500,
        };
        assert!(err.is_timeout());
        assert!(!err.is_stall());
        assert!(err.to_string().contains("500 ms"));
    }
}
