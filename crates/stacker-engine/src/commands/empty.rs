//! `flexStacker/empty`: lower the hopper count to a target.

use super::{pause_for, CommandContext, CommandOutcome, FillEmptyStrategy};
use crate::error::CommandResult;
use crate::state::{empty_count, StackerPoolUpdate};
use crate::store::StateUpdate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyParams {
    pub module_id: String,
    /// Target count; zero when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub strategy: FillEmptyStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyResult {
    pub count: u32,
}

pub async fn execute(
    params: &EmptyParams,
    ctx: &CommandContext<'_>,
) -> CommandResult<CommandOutcome<EmptyResult>> {
    let sub_state = ctx.constrained_pool(&params.module_id)?;
    let count = empty_count(sub_state.pool_count, params.count);

    let location = ctx.location(&params.module_id);
    let pause = pause_for(params.strategy, &params.message, || {
        format!("Empty the Flex Stacker in {location} down to {count} labware, then resume.")
    });

    Ok(CommandOutcome::new(
        EmptyResult { count },
        StateUpdate::pool(params.module_id.clone(), StackerPoolUpdate::Empty { count }),
    )
    .with_pause(pause))
}
