//! High-level Flex Stacker device controller.
//!
//! `FlexStacker` owns one driver and turns single-axis commands into the
//! labware transfer sequences. It keeps per-axis state that is only updated
//! after the device confirms a command, and runs a telemetry poller between
//! `connect()` and `disconnect()`.
//!
//! # Axis layout
//!
//! - `X` retracted: carriage under the hopper. Extended: carriage at the
//!   platform where labware is handed off.
//! - `Z` retracted: elevator at the bottom. Extended: elevator at the hopper
//!   opening.
//! - `L` retracted: latch closed, holding the stack. Extended: latch open.

use crate::driver::FlexStackerDriver;
use crate::factory::create_driver;
use crate::motion::{max_travel, AxisMotionConfig, LATCH_CLEARANCE_MM, Z_MAX_TRAVEL_MM};
use crate::poller::Poller;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use stacker_core::config::StackerConfig;
use stacker_core::error::{StackerError, StackerResult};
use stacker_core::types::{
    Direction, LedColor, LimitSwitchStatus, PlatformStatus, StackerAxis, StackerIdentity,
    StackerInfo,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

const TELEMETRY_CHANNEL_CAPACITY: usize = 16;

// =============================================================================
// State Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StackerStatus {
    Idle,
    Dispensing,
    Storing,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LatchState {
    Closed,
    Open,
    Unknown,
}

impl LatchState {
    fn from_switches(switches: &LimitSwitchStatus) -> Self {
        match (
            switches.get(StackerAxis::L, Direction::Retract),
            switches.get(StackerAxis::L, Direction::Extend),
        ) {
            (true, false) => LatchState::Closed,
            (false, true) => LatchState::Open,
            _ => LatchState::Unknown,
        }
    }
}

/// Last confirmed state of one axis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisState {
    /// mm from the retract switch, `None` until homed or after a failure.
    pub position: Option<f64>,
    /// Configured run current in amps.
    pub current: Option<f64>,
    pub direction: Option<Direction>,
    pub stalled: bool,
}

/// Sensor readings returned by [`FlexStacker::get_sensor_states`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorStates {
    pub limit_switches: LimitSwitchStatus,
    pub hopper_door_closed: bool,
    pub install_detected: bool,
}

/// Snapshot published to telemetry subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackerLiveData {
    pub status: StackerStatus,
    pub latch: LatchState,
    pub platform: PlatformStatus,
    pub limit_switches: LimitSwitchStatus,
    pub hopper_door_closed: bool,
    pub install_detected: bool,
}

impl Default for StackerLiveData {
    fn default() -> Self {
        Self {
            status: StackerStatus::Idle,
            latch: LatchState::Unknown,
            platform: PlatformStatus::default(),
            limit_switches: LimitSwitchStatus::default(),
            hopper_door_closed: false,
            install_detected: false,
        }
    }
}

// =============================================================================
// FlexStacker
// =============================================================================

pub struct FlexStacker {
    module_id: String,
    driver: Arc<dyn FlexStackerDriver>,
    poll_interval: Duration,
    motion: HashMap<StackerAxis, AxisMotionConfig>,
    identity: RwLock<Option<StackerIdentity>>,
    device_info: RwLock<Option<StackerInfo>>,
    axes: RwLock<HashMap<StackerAxis, AxisState>>,
    live: Arc<RwLock<StackerLiveData>>,
    telemetry_tx: broadcast::Sender<StackerLiveData>,
    poller: Mutex<Option<Poller>>,
}

impl FlexStacker {
    pub fn new(
        module_id: impl Into<String>,
        driver: Arc<dyn FlexStackerDriver>,
        poll_interval: Duration,
    ) -> Self {
        let (telemetry_tx, _) = broadcast::channel(TELEMETRY_CHANNEL_CAPACITY);
        let motion = StackerAxis::ALL
            .iter()
            .map(|axis| (*axis, AxisMotionConfig::for_axis(*axis)))
            .collect();

        Self {
            module_id: module_id.into(),
            driver,
            poll_interval,
            motion,
            identity: RwLock::new(None),
            device_info: RwLock::new(None),
            axes: RwLock::new(HashMap::new()),
            live: Arc::new(RwLock::new(StackerLiveData::default())),
            telemetry_tx,
            poller: Mutex::new(None),
        }
    }

    /// Controller with the driver selected by `config.simulating`.
    pub fn from_config(module_id: impl Into<String>, config: &StackerConfig) -> Self {
        Self::new(module_id, create_driver(config), config.poll_interval())
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn is_simulated(&self) -> bool {
        self.driver.is_simulated()
    }

    /// Identity captured on first connect.
    pub fn identity(&self) -> Option<StackerIdentity> {
        self.identity.read().clone()
    }

    pub fn serial_number(&self) -> String {
        self.identity
            .read()
            .as_ref()
            .map(|id| id.serial_number.clone())
            .unwrap_or_default()
    }

    pub fn status(&self) -> StackerStatus {
        self.live.read().status
    }

    pub fn latch_state(&self) -> LatchState {
        self.live.read().latch
    }

    pub fn live_data(&self) -> StackerLiveData {
        self.live.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StackerLiveData> {
        self.telemetry_tx.subscribe()
    }

    pub fn axis_state(&self, axis: StackerAxis) -> AxisState {
        self.axes.read().get(&axis).copied().unwrap_or_default()
    }

    pub fn motion_config(&self, axis: StackerAxis) -> AxisMotionConfig {
        self.motion
            .get(&axis)
            .copied()
            .unwrap_or_else(|| AxisMotionConfig::for_axis(axis))
    }

    pub fn is_polling(&self) -> bool {
        self.poller.lock().as_ref().is_some_and(Poller::is_running)
    }

    // =========================================================================
    // Connection Lifecycle
    // =========================================================================

    #[instrument(skip(self), fields(module_id = %self.module_id), err)]
    pub async fn connect(&self) -> StackerResult<()> {
        self.driver.connect().await?;

        let info = self.driver.get_device_info().await?;
        {
            let mut identity = self.identity.write();
            match identity.as_ref() {
                Some(existing) if existing.serial_number != info.sn => {
                    warn!(
                        expected = %existing.serial_number,
                        reported = %info.sn,
                        "Serial number changed after reconnect; keeping original identity"
                    );
                }
                Some(_) => {}
                None => {
                    *identity = Some(StackerIdentity {
                        module_id: self.module_id.clone(),
                        serial_number: info.sn.clone(),
                    });
                }
            }
        }
        info!(fw = %info.fw, hw = ?info.hw, sn = %info.sn, "Flex Stacker connected");
        *self.device_info.write() = Some(info);

        self.reset_axes();
        self.apply_motion_config().await?;
        self.set_status(StackerStatus::Idle);
        refresh_live_data(self.driver.as_ref(), &self.live, &self.telemetry_tx).await?;
        self.start_poller();
        Ok(())
    }

    /// Stop polling and close the driver. Safe when never connected.
    #[instrument(skip(self), fields(module_id = %self.module_id), err)]
    pub async fn disconnect(&self) -> StackerResult<()> {
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            poller.stop().await;
        }
        self.driver.disconnect().await?;
        self.reset_axes();
        Ok(())
    }

    fn start_poller(&self) {
        let mut slot = self.poller.lock();
        if slot.as_ref().is_some_and(Poller::is_running) {
            return;
        }

        let driver = self.driver.clone();
        let live = self.live.clone();
        let tx = self.telemetry_tx.clone();
        *slot = Some(Poller::spawn(
            format!("flex-stacker-{}", self.module_id),
            self.poll_interval,
            move || {
                let driver = driver.clone();
                let live = live.clone();
                let tx = tx.clone();
                async move { refresh_live_data(driver.as_ref(), &live, &tx).await }.boxed()
            },
        ));
    }

    async fn apply_motion_config(&self) -> StackerResult<()> {
        self.driver.enable_motors(&StackerAxis::ALL).await?;
        for axis in StackerAxis::ALL {
            let config = self.motion_config(axis);
            self.driver.set_run_current(axis, config.run_current).await?;
            self.driver
                .set_ihold_current(axis, config.hold_current)
                .await?;
            self.axes.write().entry(axis).or_default().current = Some(config.run_current);
        }
        Ok(())
    }

    fn reset_axes(&self) {
        self.axes.write().clear();
    }

    fn set_status(&self, status: StackerStatus) {
        let snapshot = {
            let mut live = self.live.write();
            live.status = status;
            live.clone()
        };
        let _ = self.telemetry_tx.send(snapshot);
    }

    fn set_latch(&self, latch: LatchState) {
        self.live.write().latch = latch;
    }

    // =========================================================================
    // Single-Axis Motion
    // =========================================================================

    /// Record the outcome of a motion command on `axis`.
    fn finish_motion(
        &self,
        axis: StackerAxis,
        direction: Direction,
        result: &StackerResult<()>,
        position: impl FnOnce(Option<f64>) -> Option<f64>,
    ) {
        let mut axes = self.axes.write();
        let state = axes.entry(axis).or_default();
        state.direction = Some(direction);
        match result {
            Ok(()) => {
                state.stalled = false;
                state.position = position(state.position);
            }
            Err(e) => {
                if e.is_stall() {
                    state.stalled = true;
                }
                state.position = None;
            }
        }
    }

    /// Home `axis` against the switch in `direction`. Clears a stall flag.
    #[instrument(skip(self), fields(module_id = %self.module_id, axis = %axis, direction = %direction), err)]
    pub async fn home_axis(&self, axis: StackerAxis, direction: Direction) -> StackerResult<()> {
        let result = self.driver.home_axis(axis, direction).await;
        self.finish_motion(axis, direction, &result, |_| {
            Some(switch_position(axis, direction))
        });
        result
    }

    /// Move `axis` until its limit switch in `direction` triggers.
    #[instrument(skip(self), fields(module_id = %self.module_id, axis = %axis, direction = %direction), err)]
    pub async fn move_to_limit_switch(
        &self,
        axis: StackerAxis,
        direction: Direction,
    ) -> StackerResult<()> {
        let params = self.motion_config(axis).home_params;
        let result = self
            .driver
            .move_to_limit_switch(axis, direction, Some(params))
            .await;
        self.finish_motion(axis, direction, &result, |_| {
            Some(switch_position(axis, direction))
        });
        result
    }

    /// Relative move of `distance` mm in `direction`.
    #[instrument(skip(self), fields(module_id = %self.module_id, axis = %axis, direction = %direction, distance), err)]
    pub async fn move_axis(
        &self,
        axis: StackerAxis,
        direction: Direction,
        distance: f64,
    ) -> StackerResult<()> {
        if !distance.is_finite() || distance < 0.0 || distance > max_travel(axis) {
            return Err(StackerError::InvalidParameter(format!(
                "{axis} move of {distance} mm is outside 0..={} mm",
                max_travel(axis)
            )));
        }

        let signed = direction.signed(distance);
        let params = self.motion_config(axis).move_params;
        let result = self.driver.move_in_mm(axis, signed, Some(params)).await;
        self.finish_motion(axis, direction, &result, |position| {
            position.map(|p| (p + signed).clamp(0.0, max_travel(axis)))
        });
        result
    }

    /// Open the hopper latch. No motion if it is already open.
    #[instrument(skip(self), fields(module_id = %self.module_id), err)]
    pub async fn open_latch(&self) -> StackerResult<()> {
        self.move_latch(Direction::Extend, LatchState::Open).await
    }

    /// Close the hopper latch. No motion if it is already closed.
    #[instrument(skip(self), fields(module_id = %self.module_id), err)]
    pub async fn close_latch(&self) -> StackerResult<()> {
        self.move_latch(Direction::Retract, LatchState::Closed).await
    }

    async fn move_latch(&self, direction: Direction, target: LatchState) -> StackerResult<()> {
        if self
            .driver
            .get_limit_switch(StackerAxis::L, direction)
            .await?
        {
            self.set_latch(target);
            return Ok(());
        }

        match self.move_to_limit_switch(StackerAxis::L, direction).await {
            Ok(()) => {
                self.set_latch(target);
                Ok(())
            }
            Err(e) => {
                self.set_latch(LatchState::Unknown);
                Err(e)
            }
        }
    }

    /// Home every axis to its resting position with the latch closed.
    #[instrument(skip(self), fields(module_id = %self.module_id), err)]
    pub async fn home_all(&self) -> StackerResult<()> {
        self.home_axis(StackerAxis::Z, Direction::Retract).await?;
        self.home_axis(StackerAxis::X, Direction::Extend).await?;
        self.close_latch().await?;
        self.set_status(StackerStatus::Idle);
        Ok(())
    }

    // =========================================================================
    // Labware Transfer
    // =========================================================================

    /// Move the labware on the platform into the bottom of the hopper.
    #[instrument(skip(self), fields(module_id = %self.module_id, labware_height), err)]
    pub async fn store_labware(&self, labware_height: f64) -> StackerResult<()> {
        self.check_transfer(labware_height).await?;
        self.set_status(StackerStatus::Storing);
        let result = self.store_sequence(labware_height).await;
        self.finish_transfer(&result);
        result
    }

    /// Release the bottom labware of the hopper onto the platform.
    #[instrument(skip(self), fields(module_id = %self.module_id, labware_height), err)]
    pub async fn dispense_labware(&self, labware_height: f64) -> StackerResult<()> {
        self.check_transfer(labware_height).await?;
        self.set_status(StackerStatus::Dispensing);
        let result = self.dispense_sequence(labware_height).await;
        self.finish_transfer(&result);
        result
    }

    async fn check_transfer(&self, labware_height: f64) -> StackerResult<()> {
        if !labware_height.is_finite() || labware_height <= 0.0 || labware_height > Z_MAX_TRAVEL_MM
        {
            return Err(StackerError::InvalidParameter(format!(
                "labware height {labware_height} mm is outside (0, {Z_MAX_TRAVEL_MM}] mm"
            )));
        }
        if !self.driver.get_hopper_door_closed().await? {
            return Err(StackerError::HopperDoorOpen {
                serial_number: self.serial_number(),
            });
        }
        Ok(())
    }

    fn finish_transfer(&self, result: &StackerResult<()>) {
        match result {
            Ok(()) => self.set_status(StackerStatus::Idle),
            Err(e) => {
                warn!(module_id = %self.module_id, error = %e, "Labware transfer failed");
                self.set_status(StackerStatus::Error);
            }
        }
    }

    async fn store_sequence(&self, labware_height: f64) -> StackerResult<()> {
        self.home_axis(StackerAxis::Z, Direction::Retract).await?;
        // Carry the labware from the platform to under the hopper.
        self.home_axis(StackerAxis::X, Direction::Retract).await?;
        let approach = (Z_MAX_TRAVEL_MM - labware_height - LATCH_CLEARANCE_MM).max(0.0);
        self.move_axis(StackerAxis::Z, Direction::Extend, approach)
            .await?;
        self.open_latch().await?;
        // Push the labware up past the latch.
        self.move_to_limit_switch(StackerAxis::Z, Direction::Extend)
            .await?;
        self.close_latch().await?;
        self.home_axis(StackerAxis::Z, Direction::Retract).await?;
        self.home_axis(StackerAxis::X, Direction::Extend).await?;
        Ok(())
    }

    async fn dispense_sequence(&self, labware_height: f64) -> StackerResult<()> {
        self.home_axis(StackerAxis::X, Direction::Retract).await?;
        self.home_axis(StackerAxis::Z, Direction::Retract).await?;
        // Support the stack before releasing it.
        self.move_to_limit_switch(StackerAxis::Z, Direction::Extend)
            .await?;
        self.open_latch().await?;
        // Lower one labware height so the latch catches the next one.
        self.move_axis(StackerAxis::Z, Direction::Retract, labware_height)
            .await?;
        self.close_latch().await?;
        self.home_axis(StackerAxis::Z, Direction::Retract).await?;
        self.home_axis(StackerAxis::X, Direction::Extend).await?;
        Ok(())
    }

    // =========================================================================
    // Telemetry
    // =========================================================================

    #[instrument(skip(self), fields(module_id = %self.module_id), err)]
    pub async fn get_device_info(&self) -> StackerResult<StackerInfo> {
        let info = self.driver.get_device_info().await?;
        *self.device_info.write() = Some(info.clone());
        Ok(info)
    }

    /// Device info cached from the last query.
    pub fn cached_device_info(&self) -> Option<StackerInfo> {
        self.device_info.read().clone()
    }

    pub async fn get_sensor_states(&self) -> StackerResult<SensorStates> {
        Ok(SensorStates {
            limit_switches: self.driver.get_limit_switches_status().await?,
            hopper_door_closed: self.driver.get_hopper_door_closed().await?,
            install_detected: self.driver.get_installation_detected().await?,
        })
    }

    pub async fn get_platform_sensor_states(&self) -> StackerResult<PlatformStatus> {
        self.driver.get_platform_status().await
    }

    #[instrument(skip(self), fields(module_id = %self.module_id), err)]
    pub async fn stop(&self) -> StackerResult<()> {
        self.driver.stop_motors().await
    }

    pub async fn set_led(&self, color: LedColor, power: f64) -> StackerResult<()> {
        self.driver.set_led(color, power).await
    }
}

impl std::fmt::Debug for FlexStacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlexStacker")
            .field("module_id", &self.module_id)
            .field("simulated", &self.driver.is_simulated())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn switch_position(axis: StackerAxis, direction: Direction) -> f64 {
    match direction {
        Direction::Retract => 0.0,
        Direction::Extend => max_travel(axis),
    }
}

/// Read every sensor, update `live` and publish the snapshot.
async fn refresh_live_data(
    driver: &dyn FlexStackerDriver,
    live: &RwLock<StackerLiveData>,
    tx: &broadcast::Sender<StackerLiveData>,
) -> StackerResult<()> {
    let limit_switches = driver.get_limit_switches_status().await?;
    let platform = driver.get_platform_status().await?;
    let hopper_door_closed = driver.get_hopper_door_closed().await?;
    let install_detected = driver.get_installation_detected().await?;

    let snapshot = {
        let mut data = live.write();
        data.limit_switches = limit_switches;
        data.latch = LatchState::from_switches(&limit_switches);
        data.platform = platform;
        data.hopper_door_closed = hopper_door_closed;
        data.install_detected = install_detected;
        data.clone()
    };
    // No subscribers is not an error.
    let _ = tx.send(snapshot);
    Ok(())
}
