//! `flexStacker/setStoredLabware`: define what the hopper holds.
//!
//! Replaces the pool definition wholesale. Lid and adapter are only part of
//! the pool when given; omitting them removes them.

use super::{CommandContext, CommandOutcome};
use crate::error::{CommandError, CommandResult};
use crate::labware::{LabwareDefinition, LabwareLoadParams};
use crate::state::{PoolDefinition, StackerPoolUpdate};
use crate::store::StateUpdate;
use serde::{Deserialize, Serialize};
use stacker_driver::motion::Z_MAX_TRAVEL_MM;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStoredLabwareParams {
    pub module_id: String,
    /// Labware already in the hopper; full when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_count: Option<u32>,
    pub primary_labware: LabwareLoadParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid_labware: Option<LabwareLoadParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_labware: Option<LabwareLoadParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStoredLabwareResult {
    pub primary_labware_definition: LabwareDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid_labware_definition: Option<LabwareDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_labware_definition: Option<LabwareDefinition>,
    pub count: u32,
}

pub async fn execute(
    params: &SetStoredLabwareParams,
    ctx: &CommandContext<'_>,
) -> CommandResult<CommandOutcome<SetStoredLabwareResult>> {
    ctx.sub_state(&params.module_id)?;

    let primary = ctx.resolver.resolve(&params.primary_labware)?;
    let lid = params
        .lid_labware
        .as_ref()
        .map(|p| ctx.resolver.resolve(p))
        .transpose()?;
    let adapter = params
        .adapter_labware
        .as_ref()
        .map(|p| ctx.resolver.resolve(p))
        .transpose()?;

    let pool = PoolDefinition {
        primary,
        lid,
        adapter,
    };
    let unit_height = pool.unit_height();
    if !(unit_height > 0.0 && unit_height <= Z_MAX_TRAVEL_MM) {
        return Err(CommandError::cannot_perform(
            &ctx.location(&params.module_id),
            format!(
                "{} units are {unit_height} mm tall, outside the (0, {Z_MAX_TRAVEL_MM}] mm the stacker can transfer",
                pool.primary.uri()
            ),
        ));
    }
    let max_count = pool.max_count();
    let initial_count = params.initial_count.map_or(max_count, |c| c.min(max_count));

    tracing::info!(
        module_id = %params.module_id,
        primary = %pool.primary.uri(),
        max_count,
        initial_count,
        "Setting Flex Stacker stored labware"
    );

    let result = SetStoredLabwareResult {
        primary_labware_definition: pool.primary.clone(),
        lid_labware_definition: pool.lid.clone(),
        adapter_labware_definition: pool.adapter.clone(),
        count: initial_count,
    };
    let update = StateUpdate::pool(
        params.module_id.clone(),
        StackerPoolUpdate::SetStoredLabware {
            pool,
            max_count,
            initial_count,
        },
    );

    Ok(CommandOutcome::new(result, update))
}
