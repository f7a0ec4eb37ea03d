//! `flexStacker/fill`: set the hopper count up to a target.

use super::{pause_for, CommandContext, CommandOutcome, FillEmptyStrategy};
use crate::error::CommandResult;
use crate::state::{fill_count, StackerPoolUpdate};
use crate::store::StateUpdate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillParams {
    pub module_id: String,
    /// Target count; the hopper's capacity when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub strategy: FillEmptyStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillResult {
    pub count: u32,
}

pub async fn execute(
    params: &FillParams,
    ctx: &CommandContext<'_>,
) -> CommandResult<CommandOutcome<FillResult>> {
    let sub_state = ctx.constrained_pool(&params.module_id)?;
    let count = fill_count(params.count, sub_state.max_pool_count);

    let location = ctx.location(&params.module_id);
    let pause = pause_for(params.strategy, &params.message, || {
        format!("Fill the Flex Stacker in {location} to {count} labware, then resume.")
    });

    Ok(CommandOutcome::new(
        FillResult { count },
        StateUpdate::pool(params.module_id.clone(), StackerPoolUpdate::Fill { count }),
    )
    .with_pause(pause))
}
