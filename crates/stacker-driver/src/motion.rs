//! Axis travel limits and per-axis motion configuration.

use stacker_core::types::{MoveParams, StackerAxis};

/// Full travel of the X carriage between its limit switches.
pub const X_MAX_TRAVEL_MM: f64 = 194.0;
/// Full travel of the Z elevator between its limit switches.
pub const Z_MAX_TRAVEL_MM: f64 = 139.5;
/// Full travel of the hopper latch between its limit switches.
pub const L_MAX_TRAVEL_MM: f64 = 22.0;

/// Extra lift past a labware edge so the latch clears it.
pub const LATCH_CLEARANCE_MM: f64 = 5.0;

pub fn max_travel(axis: StackerAxis) -> f64 {
    match axis {
        StackerAxis::X => X_MAX_TRAVEL_MM,
        StackerAxis::Z => Z_MAX_TRAVEL_MM,
        StackerAxis::L => L_MAX_TRAVEL_MM,
    }
}

/// Speed profiles and motor currents for one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisMotionConfig {
    /// Profile for ordinary moves.
    pub move_params: MoveParams,
    /// Slower profile for seeking a limit switch.
    pub home_params: MoveParams,
    /// Amps while moving.
    pub run_current: f64,
    /// Amps while holding position.
    pub hold_current: f64,
}

impl AxisMotionConfig {
    pub fn for_axis(axis: StackerAxis) -> Self {
        match axis {
            StackerAxis::X => Self {
                move_params: MoveParams::new(200.0, 1500.0, 5.0),
                home_params: MoveParams::new(100.0, 800.0, 5.0),
                run_current: 1.5,
                hold_current: 0.75,
            },
            // Z holds the labware stack, so it keeps a high hold current.
            StackerAxis::Z => Self {
                move_params: MoveParams::new(200.0, 500.0, 5.0),
                home_params: MoveParams::new(100.0, 500.0, 5.0),
                run_current: 1.5,
                hold_current: 1.8,
            },
            StackerAxis::L => Self {
                move_params: MoveParams::new(100.0, 800.0, 40.0),
                home_params: MoveParams::new(100.0, 800.0, 40.0),
                run_current: 0.8,
                hold_current: 0.5,
            },
        }
    }
}
