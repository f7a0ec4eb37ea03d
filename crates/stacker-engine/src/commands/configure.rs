//! `flexStacker/configure`: toggle static mode.
//!
//! In static mode the hopper is a fixed labware holder and the stacker does
//! not store or retrieve.

use super::{CommandContext, CommandOutcome};
use crate::error::CommandResult;
use crate::state::StackerPoolUpdate;
use crate::store::StateUpdate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureParams {
    pub module_id: String,
    #[serde(rename = "static")]
    pub static_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureResult {}

pub async fn execute(
    params: &ConfigureParams,
    ctx: &CommandContext<'_>,
) -> CommandResult<CommandOutcome<ConfigureResult>> {
    ctx.sub_state(&params.module_id)?;

    Ok(CommandOutcome::new(
        ConfigureResult {},
        StateUpdate::pool(
            params.module_id.clone(),
            StackerPoolUpdate::Configure {
                static_mode: params.static_mode,
            },
        ),
    ))
}
