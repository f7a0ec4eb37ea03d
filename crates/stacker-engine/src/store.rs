//! Engine state and its single-writer store.
//!
//! [`EngineState`] is immutable once published. [`StateStore::apply`] builds
//! the next state from a [`StateUpdate`] and swaps the `Arc` under a write
//! lock, so a reader holding a snapshot always sees a whole state.

use crate::labware::{LabwareDefinition, LabwareId, LabwareLocation};
use crate::state::{FlexStackerSubState, PoolUpdateError, StackerPoolUpdate};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub type ModuleId = String;

/// A labware instance known to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabwareRecord {
    pub id: LabwareId,
    pub definition: LabwareDefinition,
    pub location: LabwareLocation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub stackers: HashMap<ModuleId, FlexStackerSubState>,
    pub labware: HashMap<LabwareId, LabwareRecord>,
    /// Deck slot of each loaded module.
    pub module_slots: HashMap<ModuleId, String>,
}

impl EngineState {
    pub fn stacker(&self, module_id: &str) -> Option<&FlexStackerSubState> {
        self.stackers.get(module_id)
    }

    pub fn module_slot(&self, module_id: &str) -> Option<&str> {
        self.module_slots.get(module_id).map(String::as_str)
    }

    pub fn labware(&self, labware_id: &str) -> Option<&LabwareRecord> {
        self.labware.get(labware_id)
    }

    /// Labware currently at `location`.
    pub fn labware_at(&self, location: &LabwareLocation) -> Option<&LabwareRecord> {
        self.labware.values().find(|record| &record.location == location)
    }
}

/// Relocation of one labware. A `definition` creates the record if missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabwareMove {
    pub labware_id: LabwareId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<LabwareDefinition>,
    pub new_location: LabwareLocation,
}

/// Everything one command changes, applied as a unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    pub module_id: ModuleId,
    pub pool: Option<StackerPoolUpdate>,
    pub labware_moves: Vec<LabwareMove>,
}

impl StateUpdate {
    pub fn pool(module_id: impl Into<ModuleId>, update: StackerPoolUpdate) -> Self {
        Self {
            module_id: module_id.into(),
            pool: Some(update),
            labware_moves: Vec::new(),
        }
    }

    pub fn with_move(mut self, labware_move: LabwareMove) -> Self {
        self.labware_moves.push(labware_move);
        self
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Module {0} is not loaded")]
    UnknownModule(ModuleId),

    #[error("Labware {0} is not known and no definition was given")]
    UnknownLabware(LabwareId),

    #[error(transparent)]
    Pool(#[from] PoolUpdateError),
}

#[derive(Debug, Default)]
pub struct StateStore {
    state: RwLock<Arc<EngineState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state. Cheap; later updates do not affect it.
    pub fn snapshot(&self) -> Arc<EngineState> {
        self.state.read().clone()
    }

    /// Register a stacker module in `slot` with an empty pool.
    pub fn add_module(&self, module_id: &str, slot: &str) {
        self.modify(|next| {
            next.stackers
                .entry(module_id.to_string())
                .or_insert_with(|| FlexStackerSubState::new(module_id));
            next.module_slots
                .insert(module_id.to_string(), slot.to_string());
        });
    }

    /// Record a labware instance at `location`, replacing any previous record.
    pub fn place_labware(&self, id: &str, definition: LabwareDefinition, location: LabwareLocation) {
        self.modify(|next| {
            next.labware.insert(
                id.to_string(),
                LabwareRecord {
                    id: id.to_string(),
                    definition,
                    location,
                },
            );
        });
    }

    fn modify(&self, f: impl FnOnce(&mut EngineState)) {
        let mut guard = self.state.write();
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }

    /// Apply `update` atomically. On error the state is unchanged.
    pub fn apply(&self, update: &StateUpdate) -> Result<Arc<EngineState>, StateError> {
        let mut guard = self.state.write();
        let mut next = (**guard).clone();

        if let Some(pool_update) = &update.pool {
            let current = next
                .stackers
                .get(&update.module_id)
                .ok_or_else(|| StateError::UnknownModule(update.module_id.clone()))?;
            let updated = current.apply(pool_update)?;

            // Labware the pool no longer tracks has left the hopper.
            let hopper = LabwareLocation::InStackerHopper {
                module_id: update.module_id.clone(),
            };
            for record in next.labware.values_mut() {
                if record.location == hopper && !updated.hopper_labware_ids.contains(&record.id) {
                    record.location = LabwareLocation::OffDeck;
                }
            }
            next.stackers.insert(update.module_id.clone(), updated);
        }

        for labware_move in &update.labware_moves {
            match next.labware.get_mut(&labware_move.labware_id) {
                Some(record) => record.location = labware_move.new_location.clone(),
                None => {
                    let definition = labware_move
                        .definition
                        .clone()
                        .ok_or_else(|| StateError::UnknownLabware(labware_move.labware_id.clone()))?;
                    next.labware.insert(
                        labware_move.labware_id.clone(),
                        LabwareRecord {
                            id: labware_move.labware_id.clone(),
                            definition,
                            location: labware_move.new_location.clone(),
                        },
                    );
                }
            }
        }

        let next = Arc::new(next);
        *guard = next.clone();
        Ok(next)
    }
}
