//! Hardware vocabulary shared by the driver and engine crates.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Axes and Directions
// =============================================================================

/// Motorized axes of the Flex Stacker.
///
/// - `X`: gripper carriage moving labware between the platform and the hopper
/// - `Z`: elevator lifting labware into and out of the hopper
/// - `L`: hopper latch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackerAxis {
    X,
    Z,
    L,
}

impl StackerAxis {
    /// All axes, in homing order.
    pub const ALL: [StackerAxis; 3] = [StackerAxis::X, StackerAxis::Z, StackerAxis::L];

    /// Wire name of the axis.
    pub fn as_str(&self) -> &'static str {
        match self {
            StackerAxis::X => "X",
            StackerAxis::Z => "Z",
            StackerAxis::L => "L",
        }
    }

    /// Parse a wire axis name.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "X" => Some(StackerAxis::X),
            "Z" => Some(StackerAxis::Z),
            "L" => Some(StackerAxis::L),
            _ => None,
        }
    }
}

impl fmt::Display for StackerAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of travel along an axis.
///
/// On the wire `Retract` is `0` and `Extend` is `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Toward the axis home (negative travel).
    Retract = 0,
    /// Away from the axis home (positive travel).
    Extend = 1,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Retract => Direction::Extend,
            Direction::Extend => Direction::Retract,
        }
    }

    /// Signed distance for a magnitude travelled in this direction.
    pub fn signed(self, distance_mm: f64) -> f64 {
        match self {
            Direction::Retract => -distance_mm.abs(),
            Direction::Extend => distance_mm.abs(),
        }
    }

    pub fn wire_value(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Retract => f.write_str("retract"),
            Direction::Extend => f.write_str("extend"),
        }
    }
}

// =============================================================================
// Device Identity
// =============================================================================

/// Board revision reported in the `HW:` field of `M115`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareRevision {
    /// Unrecognized board string.
    Nff,
    Evt,
    Dvt,
}

impl HardwareRevision {
    /// Map the firmware's hardware string onto a revision.
    pub fn from_hw_string(hw: &str) -> Self {
        match hw.rsplit('-').next() {
            Some("a1") => HardwareRevision::Evt,
            Some("b1") => HardwareRevision::Dvt,
            _ => HardwareRevision::Nff,
        }
    }
}

/// Parsed `M115` device info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackerInfo {
    pub fw: String,
    pub hw: HardwareRevision,
    pub sn: String,
    /// Reset reason code from the `M114` companion query.
    pub rr: Option<u8>,
}

/// Module id plus serial number, fixed once the module is connected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackerIdentity {
    pub module_id: String,
    pub serial_number: String,
}

// =============================================================================
// Motion
// =============================================================================

/// Per-move speed profile. Unset fields fall back to firmware defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveParams {
    /// mm/s
    pub max_speed: Option<f64>,
    /// mm/s²
    pub acceleration: Option<f64>,
    /// mm/s
    pub max_speed_discont: Option<f64>,
}

impl MoveParams {
    pub const fn new(max_speed: f64, acceleration: f64, max_speed_discont: f64) -> Self {
        Self {
            max_speed: Some(max_speed),
            acceleration: Some(acceleration),
            max_speed_discont: Some(max_speed_discont),
        }
    }
}

// =============================================================================
// Sensors
// =============================================================================

/// Limit switch states for every axis and direction (`M119`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSwitchStatus {
    pub x_extend: bool,
    pub x_retract: bool,
    pub z_extend: bool,
    pub z_retract: bool,
    pub l_extend: bool,
    pub l_retract: bool,
}

impl LimitSwitchStatus {
    pub fn get(&self, axis: StackerAxis, direction: Direction) -> bool {
        match (axis, direction) {
            (StackerAxis::X, Direction::Extend) => self.x_extend,
            (StackerAxis::X, Direction::Retract) => self.x_retract,
            (StackerAxis::Z, Direction::Extend) => self.z_extend,
            (StackerAxis::Z, Direction::Retract) => self.z_retract,
            (StackerAxis::L, Direction::Extend) => self.l_extend,
            (StackerAxis::L, Direction::Retract) => self.l_retract,
        }
    }

    pub fn set(&mut self, axis: StackerAxis, direction: Direction, triggered: bool) {
        let slot = match (axis, direction) {
            (StackerAxis::X, Direction::Extend) => &mut self.x_extend,
            (StackerAxis::X, Direction::Retract) => &mut self.x_retract,
            (StackerAxis::Z, Direction::Extend) => &mut self.z_extend,
            (StackerAxis::Z, Direction::Retract) => &mut self.z_retract,
            (StackerAxis::L, Direction::Extend) => &mut self.l_extend,
            (StackerAxis::L, Direction::Retract) => &mut self.l_retract,
        };
        *slot = triggered;
    }
}

/// Platform presence sensors on either end of the X travel (`M121`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformStatus {
    pub extended: bool,
    pub retracted: bool,
}

impl PlatformStatus {
    pub fn get(&self, direction: Direction) -> bool {
        match direction {
            Direction::Extend => self.extended,
            Direction::Retract => self.retracted,
        }
    }
}

/// Status bar colors accepted by `M200`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedColor {
    White = 0,
    Red = 1,
    Green = 2,
    Blue = 3,
    Yellow = 4,
}
