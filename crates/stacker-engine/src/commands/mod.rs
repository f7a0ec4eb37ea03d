//! Flex Stacker module commands.
//!
//! Each handler validates its params against a state snapshot, drives the
//! device if needed, and returns a [`CommandOutcome`] describing the state
//! change. Handlers never write state; the executor applies the outcome.

pub mod configure;
pub mod empty;
pub mod fill;
pub mod retrieve;
pub mod set_stored_labware;
pub mod store;

use crate::error::{CommandError, CommandResult};
use crate::labware::LabwareResolver;
use crate::state::FlexStackerSubState;
use crate::store::{EngineState, ModuleId, StateUpdate};
use serde::{Deserialize, Serialize};
use stacker_driver::FlexStacker;
use std::collections::HashMap;
use std::sync::Arc;

pub use configure::{ConfigureParams, ConfigureResult};
pub use empty::{EmptyParams, EmptyResult};
pub use fill::{FillParams, FillResult};
pub use retrieve::{RetrieveParams, RetrieveResult};
pub use set_stored_labware::{SetStoredLabwareParams, SetStoredLabwareResult};
pub use store::{StoreParams, StoreResult};

/// How a fill or empty reaches the physical hopper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FillEmptyStrategy {
    /// Update the count only; the operator keeps the hopper in sync.
    Logical,
    /// Update the count, then pause until the operator resumes.
    ManualWithPause,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "commandType", content = "params")]
pub enum StackerCommand {
    #[serde(rename = "flexStacker/setStoredLabware")]
    SetStoredLabware(SetStoredLabwareParams),
    #[serde(rename = "flexStacker/fill")]
    Fill(FillParams),
    #[serde(rename = "flexStacker/empty")]
    Empty(EmptyParams),
    #[serde(rename = "flexStacker/store")]
    Store(StoreParams),
    #[serde(rename = "flexStacker/retrieve")]
    Retrieve(RetrieveParams),
    #[serde(rename = "flexStacker/configure")]
    Configure(ConfigureParams),
}

impl StackerCommand {
    pub fn command_type(&self) -> &'static str {
        match self {
            StackerCommand::SetStoredLabware(_) => "flexStacker/setStoredLabware",
            StackerCommand::Fill(_) => "flexStacker/fill",
            StackerCommand::Empty(_) => "flexStacker/empty",
            StackerCommand::Store(_) => "flexStacker/store",
            StackerCommand::Retrieve(_) => "flexStacker/retrieve",
            StackerCommand::Configure(_) => "flexStacker/configure",
        }
    }

    pub fn module_id(&self) -> &str {
        match self {
            StackerCommand::SetStoredLabware(p) => &p.module_id,
            StackerCommand::Fill(p) => &p.module_id,
            StackerCommand::Empty(p) => &p.module_id,
            StackerCommand::Store(p) => &p.module_id,
            StackerCommand::Retrieve(p) => &p.module_id,
            StackerCommand::Configure(p) => &p.module_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "commandType", content = "result")]
pub enum StackerCommandResult {
    #[serde(rename = "flexStacker/setStoredLabware")]
    SetStoredLabware(SetStoredLabwareResult),
    #[serde(rename = "flexStacker/fill")]
    Fill(FillResult),
    #[serde(rename = "flexStacker/empty")]
    Empty(EmptyResult),
    #[serde(rename = "flexStacker/store")]
    Store(StoreResult),
    #[serde(rename = "flexStacker/retrieve")]
    Retrieve(RetrieveResult),
    #[serde(rename = "flexStacker/configure")]
    Configure(ConfigureResult),
}

/// Operator pause requested after the update is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseRequest {
    pub message: Option<String>,
}

/// What a handler produced.
#[derive(Debug, Clone)]
pub struct CommandOutcome<R> {
    pub result: R,
    pub update: StateUpdate,
    pub pause: Option<PauseRequest>,
}

impl<R> CommandOutcome<R> {
    pub fn new(result: R, update: StateUpdate) -> Self {
        Self {
            result,
            update,
            pause: None,
        }
    }

    pub fn with_pause(mut self, pause: Option<PauseRequest>) -> Self {
        self.pause = pause;
        self
    }
}

/// Read-only view handed to handlers.
pub struct CommandContext<'a> {
    pub state: Arc<EngineState>,
    pub stackers: &'a HashMap<ModuleId, Arc<FlexStacker>>,
    pub resolver: &'a dyn LabwareResolver,
}

impl CommandContext<'_> {
    pub fn sub_state(&self, module_id: &str) -> CommandResult<&FlexStackerSubState> {
        self.state
            .stacker(module_id)
            .ok_or_else(|| CommandError::ModuleNotLoaded {
                module_id: module_id.to_string(),
            })
    }

    pub fn stacker(&self, module_id: &str) -> CommandResult<&FlexStacker> {
        self.stackers
            .get(module_id)
            .map(Arc::as_ref)
            .ok_or_else(|| CommandError::ModuleNotLoaded {
                module_id: module_id.to_string(),
            })
    }

    /// Human-readable location for error messages.
    pub fn location(&self, module_id: &str) -> String {
        match self.state.module_slot(module_id) {
            Some(slot) => format!("slot {slot}"),
            None => format!("module {module_id}"),
        }
    }

    /// Sub-state of a stacker whose pool has been defined.
    pub fn constrained_pool(&self, module_id: &str) -> CommandResult<&FlexStackerSubState> {
        let sub_state = self.sub_state(module_id)?;
        if !sub_state.pool_is_constrained() {
            return Err(CommandError::LabwarePoolNotYetDefined {
                location: self.location(module_id),
            });
        }
        Ok(sub_state)
    }
}

/// Pause message for a manual fill or empty.
pub(crate) fn pause_for(
    strategy: FillEmptyStrategy,
    message: &Option<String>,
    default_message: impl FnOnce() -> String,
) -> Option<PauseRequest> {
    match strategy {
        FillEmptyStrategy::Logical => None,
        FillEmptyStrategy::ManualWithPause => Some(PauseRequest {
            message: Some(message.clone().unwrap_or_else(default_message)),
        }),
    }
}
