//! Core library for the Flex Stacker workspace.
//!
//! This crate holds the pieces shared by the driver and engine crates: the
//! hardware vocabulary (axes, directions, sensor maps), the transport error
//! type, async serial helpers, configuration loading and tracing setup.

pub mod config;
pub mod error;
pub mod logging;
pub mod serial;
pub mod types;

pub use error::{StackerError, StackerResult};
pub use types::{
    Direction, HardwareRevision, LedColor, LimitSwitchStatus, MoveParams, PlatformStatus,
    StackerAxis, StackerIdentity, StackerInfo,
};
