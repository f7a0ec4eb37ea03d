//! `flexStacker/retrieve`: release the bottom labware onto the platform.

use super::{CommandContext, CommandOutcome};
use crate::error::{CommandError, CommandResult};
use crate::labware::{LabwareId, LabwareLocation};
use crate::state::StackerPoolUpdate;
use crate::store::{LabwareMove, StateUpdate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveParams {
    pub module_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveResult {
    pub labware_id: LabwareId,
}

pub async fn execute(
    params: &RetrieveParams,
    ctx: &CommandContext<'_>,
) -> CommandResult<CommandOutcome<RetrieveResult>> {
    let module_id = &params.module_id;
    let location = ctx.location(module_id);
    let sub_state = ctx.sub_state(module_id)?;

    if sub_state.in_static_mode {
        return Err(CommandError::cannot_perform(
            &location,
            "cannot retrieve labware while in static mode",
        ));
    }
    let pool = sub_state.pool.as_ref().ok_or_else(|| {
        CommandError::LabwarePoolNotYetDefined {
            location: location.clone(),
        }
    })?;
    if sub_state.is_empty() {
        return Err(CommandError::cannot_perform(
            &location,
            "there is no labware in the hopper to retrieve",
        ));
    }

    let platform = LabwareLocation::OnModule {
        module_id: module_id.clone(),
    };
    if let Some(occupant) = ctx.state.labware_at(&platform) {
        return Err(CommandError::cannot_perform(
            &location,
            format!("labware {} is already on the platform", occupant.id),
        ));
    }

    // Labware added by a fill has no id yet.
    let labware_id = sub_state
        .bottom_labware_id()
        .cloned()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    ctx.stacker(module_id)?
        .dispense_labware(pool.unit_height())
        .await?;

    let update = StateUpdate::pool(
        module_id.clone(),
        StackerPoolUpdate::Retrieve {
            labware_id: labware_id.clone(),
        },
    )
    .with_move(LabwareMove {
        labware_id: labware_id.clone(),
        definition: Some(pool.primary.clone()),
        new_location: platform,
    });

    Ok(CommandOutcome::new(RetrieveResult { labware_id }, update))
}
