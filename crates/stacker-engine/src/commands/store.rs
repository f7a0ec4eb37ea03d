//! `flexStacker/store`: move the labware on the platform into the hopper.

use super::{CommandContext, CommandOutcome};
use crate::error::{CommandError, CommandResult};
use crate::labware::LabwareLocation;
use crate::state::StackerPoolUpdate;
use crate::store::{LabwareMove, StateUpdate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreParams {
    pub module_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreResult {}

pub async fn execute(
    params: &StoreParams,
    ctx: &CommandContext<'_>,
) -> CommandResult<CommandOutcome<StoreResult>> {
    let module_id = &params.module_id;
    let location = ctx.location(module_id);
    let sub_state = ctx.sub_state(module_id)?;

    if sub_state.in_static_mode {
        return Err(CommandError::cannot_perform(
            &location,
            "cannot store labware while in static mode",
        ));
    }
    let pool = sub_state.pool.as_ref().ok_or_else(|| {
        CommandError::LabwarePoolNotYetDefined {
            location: location.clone(),
        }
    })?;
    if sub_state.is_full() {
        return Err(CommandError::cannot_perform(
            &location,
            format!("the hopper is full ({} labware)", sub_state.max_pool_count),
        ));
    }

    let platform = LabwareLocation::OnModule {
        module_id: module_id.clone(),
    };
    let labware = ctx.state.labware_at(&platform).ok_or_else(|| {
        CommandError::cannot_perform(&location, "there is no labware on the platform to store")
    })?;
    if labware.definition.uri() != pool.primary.uri() {
        return Err(CommandError::cannot_perform(
            &location,
            format!(
                "labware {} is {}, but the hopper holds {}",
                labware.id,
                labware.definition.uri(),
                pool.primary.uri()
            ),
        ));
    }

    // Measured from the labware itself; lid and adapter come from the pool.
    let height = labware.definition.height() + pool.accessory_height();
    ctx.stacker(module_id)?.store_labware(height).await?;

    let update = StateUpdate::pool(
        module_id.clone(),
        StackerPoolUpdate::Store {
            labware_id: labware.id.clone(),
        },
    )
    .with_move(LabwareMove {
        labware_id: labware.id.clone(),
        definition: None,
        new_location: LabwareLocation::InStackerHopper {
            module_id: module_id.clone(),
        },
    });

    Ok(CommandOutcome::new(StoreResult {}, update))
}
