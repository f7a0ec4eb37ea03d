//! End-to-end command execution against simulated stackers.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use stacker_core::types::StackerAxis;
use stacker_driver::{FlexStacker, FlexStackerDriver, SimulatingDriver, StackerStatus};
use stacker_engine::commands::{
    ConfigureParams, EmptyParams, FillParams, RetrieveParams, SetStoredLabwareParams,
    StoreParams,
};
use stacker_engine::{
    CommandError, CommandExecutor, FillEmptyStrategy, InMemoryLabwareResolver,
    LabwareDefinition, LabwareLoadParams, LabwareLocation, PauseGate, RunControl,
    RunControlError, StackerCommand, StackerCommandResult, StateStore,
};
use std::sync::Arc;
use std::time::Duration;

const MODULE: &str = "flexStackerModuleV1-D4";

fn definition(load_name: &str, height: f64) -> LabwareDefinition {
    serde_json::from_value(json!({
        "namespace": "opentrons",
        "version": 1,
        "parameters": {"loadName": load_name},
        "metadata": {"displayName": load_name},
        "dimensions": {"xDimension": 127.76, "yDimension": 85.48, "zDimension": height}
    }))
    .unwrap()
}

fn resolver() -> Arc<InMemoryLabwareResolver> {
    Arc::new(
        InMemoryLabwareResolver::new()
            // 402 mm / 80 mm = 5 per hopper
            .with_definition(definition("deep_well_plate", 80.0))
            .with_definition(definition("flat_plate", 14.0))
            .with_definition(definition("flat_plate_lid", 6.0))
            .with_definition(definition("flat_plate_adapter", 10.0))
            .with_definition(definition("giant_plate", 150.0))
            .with_definition(definition("riser_adapter", 130.0)),
    )
}

/// Run control that records the pool count seen at each pause.
struct RecordingRunControl {
    store: Arc<StateStore>,
    seen_counts: Mutex<Vec<u32>>,
}

#[async_trait]
impl RunControl for RecordingRunControl {
    async fn wait_for_resume(&self, _message: Option<&str>) -> Result<(), RunControlError> {
        let count = self
            .store
            .snapshot()
            .stacker(MODULE)
            .map(|s| s.pool_count)
            .unwrap_or_default();
        self.seen_counts.lock().push(count);
        Ok(())
    }
}

struct Harness {
    executor: Arc<CommandExecutor>,
    sim: Arc<SimulatingDriver>,
}

async fn harness_with(run_control: Arc<dyn RunControl>, store: Arc<StateStore>) -> Harness {
    let executor = Arc::new(CommandExecutor::with_store(store, resolver(), run_control));
    let sim = Arc::new(SimulatingDriver::new());
    let driver: Arc<dyn FlexStackerDriver> = sim.clone();
    let stacker = Arc::new(FlexStacker::new(MODULE, driver, Duration::from_millis(20)));
    executor.load_module(stacker, "D4").await.unwrap();
    sim.clear_command_log();
    Harness { executor, sim }
}

async fn harness() -> Harness {
    harness_with(Arc::new(PauseGate::new()), Arc::new(StateStore::new())).await
}

fn set_stored(load_name: &str, initial_count: Option<u32>) -> StackerCommand {
    StackerCommand::SetStoredLabware(SetStoredLabwareParams {
        module_id: MODULE.into(),
        initial_count,
        primary_labware: LabwareLoadParams::new(load_name),
        lid_labware: None,
        adapter_labware: None,
    })
}

fn fill(count: Option<u32>, strategy: FillEmptyStrategy) -> StackerCommand {
    StackerCommand::Fill(FillParams {
        module_id: MODULE.into(),
        count,
        message: None,
        strategy,
    })
}

fn empty(count: Option<u32>) -> StackerCommand {
    StackerCommand::Empty(EmptyParams {
        module_id: MODULE.into(),
        count,
        message: None,
        strategy: FillEmptyStrategy::Logical,
    })
}

fn retrieve() -> StackerCommand {
    StackerCommand::Retrieve(RetrieveParams {
        module_id: MODULE.into(),
    })
}

fn store() -> StackerCommand {
    StackerCommand::Store(StoreParams {
        module_id: MODULE.into(),
    })
}

fn pool_count(h: &Harness) -> u32 {
    h.executor.state().stacker(MODULE).unwrap().pool_count
}

fn fill_result(result: StackerCommandResult) -> u32 {
    match result {
        StackerCommandResult::Fill(r) => r.count,
        StackerCommandResult::Empty(r) => r.count,
        other => panic!("unexpected result {other:?}"),
    }
}

fn retrieved_id(result: StackerCommandResult) -> String {
    match result {
        StackerCommandResult::Retrieve(r) => r.labware_id,
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn set_empty_fill_round_trip() {
    let h = harness().await;

    h.executor
        .execute(set_stored("deep_well_plate", Some(5)))
        .await
        .unwrap();
    assert_eq!(pool_count(&h), 5);

    let emptied = h.executor.execute(empty(Some(0))).await.unwrap();
    assert_eq!(fill_result(emptied), 0);

    let filled = h
        .executor
        .execute(fill(None, FillEmptyStrategy::Logical))
        .await
        .unwrap();
    assert_eq!(fill_result(filled), 5);
    assert_eq!(pool_count(&h), 5);
    // Logical fill and empty never move the device.
    assert!(h.sim.command_log().is_empty());
}

#[tokio::test]
async fn fill_and_empty_clamp() {
    let h = harness().await;
    h.executor
        .execute(set_stored("deep_well_plate", Some(0)))
        .await
        .unwrap();

    let r = h
        .executor
        .execute(fill(Some(0), FillEmptyStrategy::Logical))
        .await
        .unwrap();
    assert_eq!(fill_result(r), 0);

    h.executor
        .execute(fill(Some(4), FillEmptyStrategy::Logical))
        .await
        .unwrap();
    let r = h
        .executor
        .execute(fill(Some(6), FillEmptyStrategy::Logical))
        .await
        .unwrap();
    assert_eq!(fill_result(r), 5);

    let r = h.executor.execute(empty(Some(9))).await.unwrap();
    assert_eq!(fill_result(r), 5);
    let r = h.executor.execute(empty(None)).await.unwrap();
    assert_eq!(fill_result(r), 0);
}

#[tokio::test]
async fn initial_count_defaults_to_and_clamps_at_capacity() {
    let h = harness().await;

    h.executor
        .execute(set_stored("deep_well_plate", None))
        .await
        .unwrap();
    assert_eq!(pool_count(&h), 5);

    h.executor
        .execute(set_stored("deep_well_plate", Some(99)))
        .await
        .unwrap();
    assert_eq!(pool_count(&h), 5);

    let result = h
        .executor
        .execute(StackerCommand::SetStoredLabware(SetStoredLabwareParams {
            module_id: MODULE.into(),
            initial_count: Some(2),
            primary_labware: LabwareLoadParams::new("flat_plate"),
            lid_labware: Some(LabwareLoadParams::new("flat_plate_lid")),
            adapter_labware: Some(LabwareLoadParams::new("flat_plate_adapter")),
        }))
        .await
        .unwrap();
    match result {
        StackerCommandResult::SetStoredLabware(r) => {
            assert_eq!(r.count, 2);
            assert!(r.lid_labware_definition.is_some());
        }
        other => panic!("unexpected result {other:?}"),
    }
    // (14 + 6 + 10) mm per unit
    assert_eq!(h.executor.state().stacker(MODULE).unwrap().max_pool_count, 13);
}

#[tokio::test]
async fn pool_must_be_defined_first() {
    let h = harness().await;

    for command in [fill(None, FillEmptyStrategy::Logical), empty(None), retrieve()] {
        let err = h.executor.execute(command).await.unwrap_err();
        match &err {
            CommandError::LabwarePoolNotYetDefined { location } => {
                assert_eq!(location, "slot D4");
            }
            other => panic!("expected pool error, got {other:?}"),
        }
        assert!(err.to_string().contains("slot D4"));
    }
}

#[tokio::test]
async fn unknown_module_is_not_loaded() {
    let h = harness().await;
    let err = h
        .executor
        .execute(StackerCommand::Fill(FillParams {
            module_id: "missing".into(),
            count: None,
            message: None,
            strategy: FillEmptyStrategy::Logical,
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::ModuleNotLoaded { .. }));
}

#[tokio::test]
async fn unknown_labware_propagates_resolver_error() {
    let h = harness().await;
    let err = h
        .executor
        .execute(set_stored("no_such_plate", None))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Labware(_)));
    assert!(!h.executor.state().stacker(MODULE).unwrap().pool_is_constrained());
}

#[tokio::test]
async fn static_mode_blocks_store_and_retrieve() {
    let h = harness().await;
    h.executor
        .execute(set_stored("deep_well_plate", Some(3)))
        .await
        .unwrap();
    h.executor
        .execute(StackerCommand::Configure(ConfigureParams {
            module_id: MODULE.into(),
            static_mode: true,
        }))
        .await
        .unwrap();
    let before = h.executor.state();

    for command in [store(), retrieve()] {
        let err = h.executor.execute(command).await.unwrap_err();
        match err {
            CommandError::CannotPerformModuleAction { location, reason } => {
                assert_eq!(location, "slot D4");
                assert!(reason.contains("static mode"));
            }
            other => panic!("expected static mode error, got {other:?}"),
        }
    }

    assert_eq!(*h.executor.state(), *before);
    assert!(h.sim.command_log().is_empty());
}

#[tokio::test]
async fn retrieve_then_store_tracks_labware() {
    let h = harness().await;
    h.executor
        .execute(set_stored("deep_well_plate", Some(2)))
        .await
        .unwrap();

    let labware_id = retrieved_id(h.executor.execute(retrieve()).await.unwrap());
    let state = h.executor.state();
    assert_eq!(state.stacker(MODULE).unwrap().pool_count, 1);
    assert_eq!(
        state.labware(&labware_id).unwrap().location,
        LabwareLocation::OnModule {
            module_id: MODULE.into()
        }
    );
    assert!(h.sim.command_log().iter().any(|c| c.starts_with("G0 Z:-80.000")));

    h.executor.execute(store()).await.unwrap();
    let state = h.executor.state();
    let sub_state = state.stacker(MODULE).unwrap();
    assert_eq!(sub_state.pool_count, 2);
    assert_eq!(sub_state.hopper_labware_ids, vec![labware_id.clone()]);
    assert_eq!(
        state.labware(&labware_id).unwrap().location,
        LabwareLocation::InStackerHopper {
            module_id: MODULE.into()
        }
    );

    // The stored labware is at the bottom, so it comes out next.
    let again = retrieved_id(h.executor.execute(retrieve()).await.unwrap());
    assert_eq!(again, labware_id);
}

#[tokio::test]
async fn retrieve_and_store_check_hopper_and_platform() {
    let h = harness().await;
    h.executor
        .execute(set_stored("deep_well_plate", Some(0)))
        .await
        .unwrap();

    let err = h.executor.execute(retrieve()).await.unwrap_err();
    assert!(matches!(err, CommandError::CannotPerformModuleAction { .. }));

    let err = h.executor.execute(store()).await.unwrap_err();
    assert!(err.to_string().contains("no labware on the platform"));

    h.executor
        .execute(fill(Some(1), FillEmptyStrategy::Logical))
        .await
        .unwrap();
    h.executor.execute(retrieve()).await.unwrap();
    h.executor
        .execute(fill(None, FillEmptyStrategy::Logical))
        .await
        .unwrap();

    // The platform is now occupied.
    let err = h.executor.execute(retrieve()).await.unwrap_err();
    assert!(err.to_string().contains("already on the platform"));

    let err = h.executor.execute(store()).await.unwrap_err();
    assert!(err.to_string().contains("hopper is full"));
}

#[tokio::test]
async fn store_rejects_labware_outside_pool() {
    let h = harness().await;
    h.executor
        .execute(set_stored("deep_well_plate", Some(0)))
        .await
        .unwrap();
    h.executor.store().place_labware(
        "foreign",
        definition("flat_plate", 14.0),
        LabwareLocation::OnModule {
            module_id: MODULE.into(),
        },
    );

    let err = h.executor.execute(store()).await.unwrap_err();
    assert!(matches!(err, CommandError::CannotPerformModuleAction { .. }));
    assert!(h.sim.command_log().is_empty());
}

#[tokio::test]
async fn stall_during_retrieve_applies_no_update() {
    let h = harness().await;
    h.executor
        .execute(set_stored("deep_well_plate", Some(3)))
        .await
        .unwrap();
    let before = h.executor.state();
    h.sim.inject_stall(StackerAxis::Z);

    let err = h.executor.execute(retrieve()).await.unwrap_err();
    match &err {
        CommandError::Device(e) => assert!(e.is_stall()),
        other => panic!("expected stall, got {other:?}"),
    }
    assert_eq!(*h.executor.state(), *before);

    let stacker = h.executor.stacker(MODULE).unwrap();
    assert_eq!(stacker.status(), StackerStatus::Error);
    assert!(stacker.axis_state(StackerAxis::Z).stalled);
}

#[tokio::test]
async fn manual_fill_pauses_once_after_update() {
    let store = Arc::new(StateStore::new());
    let run_control = Arc::new(RecordingRunControl {
        store: store.clone(),
        seen_counts: Mutex::new(Vec::new()),
    });
    let h = harness_with(run_control.clone(), store).await;
    h.executor
        .execute(set_stored("deep_well_plate", Some(0)))
        .await
        .unwrap();

    h.executor
        .execute(fill(Some(3), FillEmptyStrategy::ManualWithPause))
        .await
        .unwrap();
    assert_eq!(*run_control.seen_counts.lock(), vec![3]);

    h.executor
        .execute(fill(Some(4), FillEmptyStrategy::Logical))
        .await
        .unwrap();
    assert_eq!(run_control.seen_counts.lock().len(), 1);
}

#[tokio::test]
async fn cancel_during_pause_keeps_update() {
    let gate = Arc::new(PauseGate::new());
    let h = harness_with(gate.clone(), Arc::new(StateStore::new())).await;
    h.executor
        .execute(set_stored("deep_well_plate", Some(5)))
        .await
        .unwrap();

    let task = tokio::spawn({
        let executor = h.executor.clone();
        async move {
            executor
                .execute(StackerCommand::Empty(EmptyParams {
                    module_id: MODULE.into(),
                    count: Some(1),
                    message: Some("Remove all but one plate".into()),
                    strategy: FillEmptyStrategy::ManualWithPause,
                }))
                .await
        }
    });

    let message = gate.paused().await;
    assert_eq!(message.as_deref(), Some("Remove all but one plate"));
    assert_eq!(pool_count(&h), 1);

    gate.cancel();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        CommandError::RunControl(RunControlError::Cancelled)
    ));
    assert_eq!(pool_count(&h), 1);
}

#[tokio::test]
async fn resume_completes_manual_fill() {
    let gate = Arc::new(PauseGate::new());
    let h = harness_with(gate.clone(), Arc::new(StateStore::new())).await;
    h.executor
        .execute(set_stored("deep_well_plate", Some(0)))
        .await
        .unwrap();

    let task = tokio::spawn({
        let executor = h.executor.clone();
        async move {
            executor
                .execute(fill(None, FillEmptyStrategy::ManualWithPause))
                .await
        }
    });

    let message = gate.paused().await.unwrap_or_default();
    assert!(message.contains("slot D4"));
    gate.resume();

    assert_eq!(fill_result(task.await.unwrap().unwrap()), 5);
}

#[tokio::test]
async fn json_commands() {
    let h = harness().await;

    h.executor
        .execute_json(json!({
            "commandType": "flexStacker/setStoredLabware",
            "params": {
                "moduleId": MODULE,
                "initialCount": 2,
                "primaryLabware": {"loadName": "deep_well_plate"}
            }
        }))
        .await
        .unwrap();

    let result = h
        .executor
        .execute_json(json!({
            "commandType": "flexStacker/fill",
            "params": {"moduleId": MODULE, "count": 4, "strategy": "logical"}
        }))
        .await
        .unwrap();
    assert_eq!(
        result,
        json!({"commandType": "flexStacker/fill", "result": {"count": 4}})
    );

    let err = h
        .executor
        .execute_json(json!({"commandType": "flexStacker/explode", "params": {}}))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::InvalidCommand(_)));
}

#[tokio::test]
async fn pool_too_tall_to_transfer_is_rejected() {
    let h = harness().await;

    let err = h
        .executor
        .execute(set_stored("giant_plate", None))
        .await
        .unwrap_err();
    match err {
        CommandError::CannotPerformModuleAction { location, reason } => {
            assert_eq!(location, "slot D4");
            assert!(reason.contains("giant_plate"));
        }
        other => panic!("expected pool rejection, got {other:?}"),
    }

    // 14 mm plate on a 130 mm adapter is also taller than Z travel.
    let err = h
        .executor
        .execute(StackerCommand::SetStoredLabware(SetStoredLabwareParams {
            module_id: MODULE.into(),
            initial_count: None,
            primary_labware: LabwareLoadParams::new("flat_plate"),
            lid_labware: None,
            adapter_labware: Some(LabwareLoadParams::new("riser_adapter")),
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::CannotPerformModuleAction { .. }));
    assert!(!h.executor.state().stacker(MODULE).unwrap().pool_is_constrained());
}

#[tokio::test]
async fn store_uses_platform_labware_height() {
    let h = harness().await;
    h.executor
        .execute(set_stored("deep_well_plate", Some(0)))
        .await
        .unwrap();
    // Same labware type, measured at 70 mm rather than the pool's 80 mm.
    h.executor.store().place_labware(
        "measured",
        definition("deep_well_plate", 70.0),
        LabwareLocation::OnModule {
            module_id: MODULE.into(),
        },
    );

    h.executor.execute(store()).await.unwrap();
    // Approach is Z travel minus height minus latch clearance.
    let log = h.sim.command_log();
    assert!(log.iter().any(|c| c.starts_with("G0 Z:64.500")), "{log:?}");
    assert!(!log.iter().any(|c| c.starts_with("G0 Z:54.500")));
}

#[tokio::test]
async fn emptied_labware_moves_off_deck() {
    let h = harness().await;
    h.executor
        .execute(set_stored("deep_well_plate", Some(1)))
        .await
        .unwrap();
    let labware_id = retrieved_id(h.executor.execute(retrieve()).await.unwrap());
    h.executor.execute(store()).await.unwrap();

    h.executor.execute(empty(Some(0))).await.unwrap();

    let state = h.executor.state();
    assert!(state.stacker(MODULE).unwrap().hopper_labware_ids.is_empty());
    assert_eq!(
        state.labware(&labware_id).unwrap().location,
        LabwareLocation::OffDeck
    );
    assert!(state
        .labware_at(&LabwareLocation::InStackerHopper {
            module_id: MODULE.into()
        })
        .is_none());
}
