//! Command-level errors.
//!
//! Precondition failures carry the module's deck location so the message is
//! actionable for an operator. Device and state errors pass through unchanged.

use crate::labware::LabwareError;
use crate::run_control::RunControlError;
use crate::store::StateError;
use stacker_core::StackerError;
use thiserror::Error;

pub type CommandResult<T> = Result<T, CommandError>;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Module {module_id} is not loaded")]
    ModuleNotLoaded { module_id: String },

    #[error("The Flex Stacker in {location} has no labware pool defined. Set its stored labware first.")]
    LabwarePoolNotYetDefined { location: String },

    #[error("Cannot perform action on the Flex Stacker in {location}: {reason}")]
    CannotPerformModuleAction { location: String, reason: String },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error(transparent)]
    Device(#[from] StackerError),

    #[error(transparent)]
    Labware(#[from] LabwareError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    RunControl(#[from] RunControlError),
}

impl CommandError {
    pub fn cannot_perform(location: &str, reason: impl Into<String>) -> Self {
        CommandError::CannotPerformModuleAction {
            location: location.to_string(),
            reason: reason.into(),
        }
    }
}
