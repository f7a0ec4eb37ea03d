//! Flex Stacker pool sub-state.
//!
//! The hopper is modelled as a stack with index 0 at the bottom, the end the
//! stacker dispenses from and stores into. `hopper_labware_ids` only lists
//! labware whose identity is known (stored through the stacker); labware
//! added by a fill counts toward `pool_count` without an id and sits above
//! the known ids.
//!
//! [`FlexStackerSubState::apply`] is the only way to change a sub-state. It is
//! pure: handlers clamp counts before building an update, so an out-of-range
//! count here is a bug and panics.

use crate::labware::{LabwareDefinition, LabwareId};
use serde::Serialize;
use thiserror::Error;

/// Tallest stack the hopper holds, in mm.
pub const STACKER_MAX_STACK_HEIGHT_MM: f64 = 402.0;

/// Labware kinds stored in one hopper, stacked as adapter, primary, lid.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolDefinition {
    pub primary: LabwareDefinition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lid: Option<LabwareDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<LabwareDefinition>,
}

impl PoolDefinition {
    /// Height of one pool unit with its adapter and lid.
    pub fn unit_height(&self) -> f64 {
        self.primary.height() + self.accessory_height()
    }

    /// Lid plus adapter height; zero when the pool has neither.
    pub fn accessory_height(&self) -> f64 {
        self.adapter.as_ref().map_or(0.0, LabwareDefinition::height)
            + self.lid.as_ref().map_or(0.0, LabwareDefinition::height)
    }

    /// How many units fit in the hopper.
    pub fn max_count(&self) -> u32 {
        let unit = self.unit_height();
        if unit <= 0.0 {
            return 0;
        }
        (STACKER_MAX_STACK_HEIGHT_MM / unit).floor() as u32
    }
}

/// Count a fill ends at: the target capped by capacity, or full when omitted.
pub fn fill_count(target: Option<u32>, max_count: u32) -> u32 {
    target.map_or(max_count, |t| t.min(max_count))
}

/// Count an empty ends at: the target capped by what is present, or zero when
/// omitted.
pub fn empty_count(current: u32, target: Option<u32>) -> u32 {
    target.map_or(0, |t| t.min(current))
}

/// A validated change to one stacker's pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StackerPoolUpdate {
    SetStoredLabware {
        pool: PoolDefinition,
        max_count: u32,
        initial_count: u32,
    },
    Fill {
        count: u32,
    },
    Empty {
        count: u32,
    },
    Store {
        labware_id: LabwareId,
    },
    Retrieve {
        labware_id: LabwareId,
    },
    Configure {
        static_mode: bool,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolUpdateError {
    #[error("Flex Stacker {module_id} is in static mode")]
    StaticMode { module_id: String },

    #[error("Flex Stacker {module_id} has no labware pool defined")]
    PoolNotDefined { module_id: String },
}

/// Pool state of one Flex Stacker module.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlexStackerSubState {
    pub module_id: String,
    pub in_static_mode: bool,
    /// Known labware in the hopper, bottom first.
    pub hopper_labware_ids: Vec<LabwareId>,
    pub pool: Option<PoolDefinition>,
    pub pool_count: u32,
    pub max_pool_count: u32,
}

impl FlexStackerSubState {
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            in_static_mode: false,
            hopper_labware_ids: Vec::new(),
            pool: None,
            pool_count: 0,
            max_pool_count: 0,
        }
    }

    /// Whether a primary labware has been set for the pool.
    pub fn pool_is_constrained(&self) -> bool {
        self.pool.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.pool_count >= self.max_pool_count
    }

    pub fn is_empty(&self) -> bool {
        self.pool_count == 0
    }

    /// The labware the next retrieve releases, if its id is known.
    pub fn bottom_labware_id(&self) -> Option<&LabwareId> {
        self.hopper_labware_ids.first()
    }

    /// Return the state after `update`. `self` is never modified.
    pub fn apply(&self, update: &StackerPoolUpdate) -> Result<Self, PoolUpdateError> {
        let mut next = self.clone();

        match update {
            StackerPoolUpdate::SetStoredLabware {
                pool,
                max_count,
                initial_count,
            } => {
                next.pool = Some(pool.clone());
                next.max_pool_count = *max_count;
                next.pool_count = *initial_count;
                next.hopper_labware_ids.clear();
            }
            StackerPoolUpdate::Fill { count } | StackerPoolUpdate::Empty { count } => {
                self.require_pool()?;
                next.pool_count = *count;
                // Only the bottom `count` units survive.
                next.hopper_labware_ids.truncate(*count as usize);
            }
            StackerPoolUpdate::Store { labware_id } => {
                self.require_active()?;
                self.require_pool()?;
                next.hopper_labware_ids.insert(0, labware_id.clone());
                next.pool_count = self.pool_count + 1;
            }
            StackerPoolUpdate::Retrieve { labware_id } => {
                self.require_active()?;
                self.require_pool()?;
                assert!(
                    self.pool_count > 0,
                    "retrieve from empty Flex Stacker {}",
                    self.module_id
                );
                if let Some(pos) = next.hopper_labware_ids.iter().position(|id| id == labware_id) {
                    next.hopper_labware_ids.remove(pos);
                }
                next.pool_count = self.pool_count - 1;
            }
            StackerPoolUpdate::Configure { static_mode } => {
                next.in_static_mode = *static_mode;
            }
        }

        assert!(
            next.pool_count <= next.max_pool_count,
            "Flex Stacker {} pool count {} exceeds max {}",
            next.module_id,
            next.pool_count,
            next.max_pool_count
        );
        assert!(
            next.hopper_labware_ids.len() <= next.pool_count as usize,
            "Flex Stacker {} tracks {} labware ids for a pool of {}",
            next.module_id,
            next.hopper_labware_ids.len(),
            next.pool_count
        );
        Ok(next)
    }

    fn require_active(&self) -> Result<(), PoolUpdateError> {
        if self.in_static_mode {
            return Err(PoolUpdateError::StaticMode {
                module_id: self.module_id.clone(),
            });
        }
        Ok(())
    }

    fn require_pool(&self) -> Result<(), PoolUpdateError> {
        if self.pool.is_none() {
            return Err(PoolUpdateError::PoolNotDefined {
                module_id: self.module_id.clone(),
            });
        }
        Ok(())
    }
}
