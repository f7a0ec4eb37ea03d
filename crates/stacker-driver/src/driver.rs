//! Hardware driver contract for the Flex Stacker.
//!
//! Two implementations exist: [`crate::serial_driver::FlexStackerSerialDriver`]
//! talks to real hardware and [`crate::simulator::SimulatingDriver`] answers
//! from in-memory state. Both surface failures as
//! [`stacker_core::StackerError`].

use async_trait::async_trait;
use stacker_core::error::StackerResult;
use stacker_core::types::{
    Direction, LedColor, LimitSwitchStatus, MoveParams, PlatformStatus, StackerAxis, StackerInfo,
};

/// Operations every Flex Stacker driver provides.
///
/// Methods take `&self`; implementations serialize access to the device
/// internally so a single driver can be shared between the controller and
/// its telemetry poller.
#[async_trait]
pub trait FlexStackerDriver: Send + Sync {
    /// Open the connection. Calling twice is a no-op.
    async fn connect(&self) -> StackerResult<()>;

    /// Close the connection. Safe when never connected.
    async fn disconnect(&self) -> StackerResult<()>;

    async fn is_connected(&self) -> bool;

    /// Whether this driver is the in-memory simulator.
    fn is_simulated(&self) -> bool;

    /// Query firmware, hardware and serial number, then the reset reason.
    async fn get_device_info(&self) -> StackerResult<StackerInfo>;

    async fn set_serial_number(&self, serial: &str) -> StackerResult<()>;

    async fn enable_motors(&self, axes: &[StackerAxis]) -> StackerResult<()>;

    async fn disable_motors(&self, axes: &[StackerAxis]) -> StackerResult<()>;

    /// Halt all motion immediately.
    async fn stop_motors(&self) -> StackerResult<()>;

    async fn set_run_current(&self, axis: StackerAxis, amps: f64) -> StackerResult<()>;

    async fn set_ihold_current(&self, axis: StackerAxis, amps: f64) -> StackerResult<()>;

    async fn get_limit_switches_status(&self) -> StackerResult<LimitSwitchStatus>;

    /// State of one limit switch.
    async fn get_limit_switch(&self, axis: StackerAxis, direction: Direction) -> StackerResult<bool> {
        Ok(self.get_limit_switches_status().await?.get(axis, direction))
    }

    async fn get_platform_status(&self) -> StackerResult<PlatformStatus>;

    /// State of one platform presence sensor.
    async fn get_platform_sensor(&self, direction: Direction) -> StackerResult<bool> {
        Ok(self.get_platform_status().await?.get(direction))
    }

    async fn get_hopper_door_closed(&self) -> StackerResult<bool>;

    async fn get_installation_detected(&self) -> StackerResult<bool>;

    async fn get_motion_params(&self, axis: StackerAxis) -> StackerResult<MoveParams>;

    /// Relative move. Negative distances travel toward the retract end.
    async fn move_in_mm(
        &self,
        axis: StackerAxis,
        distance_mm: f64,
        params: Option<MoveParams>,
    ) -> StackerResult<()>;

    /// Move until the limit switch in `direction` triggers.
    async fn move_to_limit_switch(
        &self,
        axis: StackerAxis,
        direction: Direction,
        params: Option<MoveParams>,
    ) -> StackerResult<()>;

    /// Home against the limit switch in `direction` using firmware defaults.
    async fn home_axis(&self, axis: StackerAxis, direction: Direction) -> StackerResult<()>;

    /// Set the status bar color. `power` is clamped to `0.0..=1.0`.
    async fn set_led(&self, color: LedColor, power: f64) -> StackerResult<()>;
}
