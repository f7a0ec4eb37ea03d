//! In-memory Flex Stacker.
//!
//! Tracks axis positions, limit switches and sensors without any I/O. Every
//! call records the command line the real driver would have sent, which lets
//! tests assert motion sequences. Stalls can be injected per axis to exercise
//! error paths.

use crate::driver::FlexStackerDriver;
use crate::motion::max_travel;
use crate::protocol;
use async_trait::async_trait;
use parking_lot::Mutex;
use stacker_core::error::{StackerError, StackerResult};
use stacker_core::types::{
    Direction, HardwareRevision, LedColor, LimitSwitchStatus, MoveParams, PlatformStatus,
    StackerAxis, StackerInfo,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub const SIMULATED_FW_VERSION: &str = "dummy-fw-version";
pub const SIMULATED_SERIAL_NUMBER: &str = "dummy-serial";

#[derive(Debug)]
struct SimState {
    connected: bool,
    serial_number: String,
    positions: HashMap<StackerAxis, f64>,
    limit_switches: LimitSwitchStatus,
    platform: PlatformStatus,
    door_closed: bool,
    install_detected: bool,
    motors_enabled: HashSet<StackerAxis>,
    motion_params: HashMap<StackerAxis, MoveParams>,
    pending_stalls: HashSet<StackerAxis>,
    led: Option<(LedColor, f64)>,
    commands: Vec<String>,
}

impl SimState {
    fn new() -> Self {
        let mut limit_switches = LimitSwitchStatus::default();
        let mut positions = HashMap::new();
        for axis in StackerAxis::ALL {
            limit_switches.set(axis, Direction::Retract, true);
            positions.insert(axis, 0.0);
        }
        Self {
            connected: false,
            serial_number: SIMULATED_SERIAL_NUMBER.to_string(),
            positions,
            limit_switches,
            platform: PlatformStatus::default(),
            door_closed: true,
            install_detected: true,
            motors_enabled: HashSet::new(),
            motion_params: HashMap::new(),
            pending_stalls: HashSet::new(),
            led: None,
            commands: Vec::new(),
        }
    }

    fn ensure_connected(&self) -> StackerResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(StackerError::NotConnected)
        }
    }

    /// Consume an injected stall for `axis`, if any.
    fn take_stall(&mut self, axis: StackerAxis) -> StackerResult<()> {
        if self.pending_stalls.remove(&axis) {
            return Err(StackerError::StallOrCollision {
                axis,
                serial_number: self.serial_number.clone(),
            });
        }
        Ok(())
    }

    fn set_position(&mut self, axis: StackerAxis, position: f64) {
        let limit = max_travel(axis);
        let clamped = position.clamp(0.0, limit);
        self.positions.insert(axis, clamped);
        self.limit_switches
            .set(axis, Direction::Retract, clamped <= 0.0);
        self.limit_switches
            .set(axis, Direction::Extend, clamped >= limit);
    }

    fn seek(&mut self, axis: StackerAxis, direction: Direction) {
        let target = match direction {
            Direction::Retract => 0.0,
            Direction::Extend => max_travel(axis),
        };
        self.set_position(axis, target);
    }
}

/// Driver that simulates a connected Flex Stacker.
#[derive(Debug)]
pub struct SimulatingDriver {
    state: Mutex<SimState>,
}

impl Default for SimulatingDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatingDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::new()),
        }
    }

    /// Make the next motion on `axis` fail with a stall.
    pub fn inject_stall(&self, axis: StackerAxis) {
        self.state.lock().pending_stalls.insert(axis);
    }

    pub fn set_door_closed(&self, closed: bool) {
        self.state.lock().door_closed = closed;
    }

    pub fn set_platform_status(&self, status: PlatformStatus) {
        self.state.lock().platform = status;
    }

    pub fn position(&self, axis: StackerAxis) -> f64 {
        self.state
            .lock()
            .positions
            .get(&axis)
            .copied()
            .unwrap_or_default()
    }

    pub fn motors_enabled(&self, axis: StackerAxis) -> bool {
        self.state.lock().motors_enabled.contains(&axis)
    }

    pub fn led(&self) -> Option<(LedColor, f64)> {
        self.state.lock().led
    }

    /// Command lines issued so far, oldest first.
    pub fn command_log(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn clear_command_log(&self) {
        self.state.lock().commands.clear();
    }

    fn record(state: &mut SimState, command: protocol::Command) {
        debug!(command = %command, "Simulated");
        state.commands.push(command.to_string());
    }
}

#[async_trait]
impl FlexStackerDriver for SimulatingDriver {
    async fn connect(&self) -> StackerResult<()> {
        self.state.lock().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> StackerResult<()> {
        self.state.lock().connected = false;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn is_simulated(&self) -> bool {
        true
    }

    async fn get_device_info(&self) -> StackerResult<StackerInfo> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        Self::record(&mut state, protocol::device_info());
        Self::record(&mut state, protocol::reset_reason());
        Ok(StackerInfo {
            fw: SIMULATED_FW_VERSION.to_string(),
            hw: HardwareRevision::Evt,
            sn: state.serial_number.clone(),
            rr: Some(0),
        })
    }

    async fn set_serial_number(&self, serial: &str) -> StackerResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        Self::record(&mut state, protocol::set_serial_number(serial));
        state.serial_number = serial.to_string();
        Ok(())
    }

    async fn enable_motors(&self, axes: &[StackerAxis]) -> StackerResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        for axis in axes {
            Self::record(&mut state, protocol::enable_motor(*axis, true));
            state.motors_enabled.insert(*axis);
        }
        Ok(())
    }

    async fn disable_motors(&self, axes: &[StackerAxis]) -> StackerResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        for axis in axes {
            Self::record(&mut state, protocol::enable_motor(*axis, false));
            state.motors_enabled.remove(axis);
        }
        Ok(())
    }

    async fn stop_motors(&self) -> StackerResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        Self::record(&mut state, protocol::stop_motors());
        Ok(())
    }

    async fn set_run_current(&self, axis: StackerAxis, amps: f64) -> StackerResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        Self::record(&mut state, protocol::set_run_current(axis, amps));
        Ok(())
    }

    async fn set_ihold_current(&self, axis: StackerAxis, amps: f64) -> StackerResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        Self::record(&mut state, protocol::set_ihold_current(axis, amps));
        Ok(())
    }

    async fn get_limit_switches_status(&self) -> StackerResult<LimitSwitchStatus> {
        let state = self.state.lock();
        state.ensure_connected()?;
        Ok(state.limit_switches)
    }

    async fn get_platform_status(&self) -> StackerResult<PlatformStatus> {
        let state = self.state.lock();
        state.ensure_connected()?;
        Ok(state.platform)
    }

    async fn get_hopper_door_closed(&self) -> StackerResult<bool> {
        let state = self.state.lock();
        state.ensure_connected()?;
        Ok(state.door_closed)
    }

    async fn get_installation_detected(&self) -> StackerResult<bool> {
        let state = self.state.lock();
        state.ensure_connected()?;
        Ok(state.install_detected)
    }

    async fn get_motion_params(&self, axis: StackerAxis) -> StackerResult<MoveParams> {
        let state = self.state.lock();
        state.ensure_connected()?;
        Ok(state.motion_params.get(&axis).copied().unwrap_or_default())
    }

    async fn move_in_mm(
        &self,
        axis: StackerAxis,
        distance_mm: f64,
        params: Option<MoveParams>,
    ) -> StackerResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        Self::record(
            &mut state,
            protocol::move_in_mm(axis, distance_mm, params.as_ref()),
        );
        state.take_stall(axis)?;
        if let Some(params) = params {
            state.motion_params.insert(axis, params);
        }
        let current = state.positions.get(&axis).copied().unwrap_or_default();
        state.set_position(axis, current + distance_mm);
        Ok(())
    }

    async fn move_to_limit_switch(
        &self,
        axis: StackerAxis,
        direction: Direction,
        params: Option<MoveParams>,
    ) -> StackerResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        Self::record(
            &mut state,
            protocol::move_to_switch(axis, direction, params.as_ref()),
        );
        state.take_stall(axis)?;
        if let Some(params) = params {
            state.motion_params.insert(axis, params);
        }
        state.seek(axis, direction);
        Ok(())
    }

    async fn home_axis(&self, axis: StackerAxis, direction: Direction) -> StackerResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        Self::record(&mut state, protocol::home_axis(axis, direction));
        state.take_stall(axis)?;
        state.seek(axis, direction);
        Ok(())
    }

    async fn set_led(&self, color: LedColor, power: f64) -> StackerResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        Self::record(&mut state, protocol::set_led(color, power));
        state.led = Some((color, power.clamp(0.0, 1.0)));
        Ok(())
    }
}
