//! Flex Stacker wire protocol.
//!
//! Protocol Overview:
//! - Format: ASCII command/response, newline terminated
//! - Command: `<GCODE> [KEY:VALUE ...]\n`
//! - Response: exactly one line per command, echoing the gcode, carrying
//!   `KEY:VALUE` fields and ending in `ok`
//! - Error: `ERR<code>:<message>`; code 403 is a motor stall/collision
//!
//! Example:
//!
//! ```text
//! > M115
//! < M115 FW:dummy-fw-version HW:Opentrons-flex-stacker-a1 SerialNo:dummy-serial ok
//! > G0 Z:-12.500 V:200.000 A:500.000 D:5.000
//! < ERR403:motor stall detected
//! ```
//!
//! Every outgoing line is produced by [`CommandBuilder`] so framing and
//! argument order are identical at every call site.

use stacker_core::error::{StackerError, StackerResult};
use stacker_core::types::{
    Direction, HardwareRevision, LedColor, LimitSwitchStatus, MoveParams, PlatformStatus,
    StackerAxis,
};
use std::fmt;

/// Line terminator for outgoing commands.
pub const TERMINATOR: &str = "\n";

/// Final token of every successful response.
pub const ACK: &str = "ok";

/// Firmware error code for a motor stall or collision.
pub const STALL_ERROR_CODE: u16 = 403;

// =============================================================================
// GCodes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GCode {
    MoveTo,
    MoveToSwitch,
    HomeAxis,
    StopMotors,
    EnableMotors,
    DisableMotors,
    GetResetReason,
    DeviceInfo,
    GetLimitSwitches,
    GetMoveParams,
    GetPlatformSensors,
    GetDoorSwitch,
    GetInstallDetected,
    SetLed,
    SetRunCurrent,
    SetIholdCurrent,
    SetSerialNumber,
}

impl GCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GCode::MoveTo => "G0",
            GCode::MoveToSwitch => "G5",
            GCode::HomeAxis => "G28",
            GCode::StopMotors => "M0",
            GCode::EnableMotors => "M17",
            GCode::DisableMotors => "M18",
            GCode::GetResetReason => "M114",
            GCode::DeviceInfo => "M115",
            GCode::GetLimitSwitches => "M119",
            GCode::GetMoveParams => "M120",
            GCode::GetPlatformSensors => "M121",
            GCode::GetDoorSwitch => "M122",
            GCode::GetInstallDetected => "M123",
            GCode::SetLed => "M200",
            GCode::SetRunCurrent => "M906",
            GCode::SetIholdCurrent => "M907",
            GCode::SetSerialNumber => "M996",
        }
    }

    /// Commands that drive a motor and can report a stall.
    pub fn is_motion(&self) -> bool {
        matches!(self, GCode::MoveTo | GCode::MoveToSwitch | GCode::HomeAxis)
    }
}

impl fmt::Display for GCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Command Builder
// =============================================================================

/// A fully framed outgoing command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    gcode: GCode,
    axis: Option<StackerAxis>,
    line: String,
}

impl Command {
    pub fn gcode(&self) -> GCode {
        self.gcode
    }

    /// Axis this command moves, if any.
    pub fn axis(&self) -> Option<StackerAxis> {
        self.axis
    }

    /// The command line without terminator.
    pub fn as_str(&self) -> &str {
        &self.line
    }

    /// Bytes as written to the port.
    pub fn to_wire(&self) -> String {
        format!("{}{}", self.line, TERMINATOR)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// Canonical formatter for every outgoing command.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    gcode: GCode,
    axis: Option<StackerAxis>,
    args: Vec<(String, String)>,
}

impl CommandBuilder {
    pub fn new(gcode: GCode) -> Self {
        Self {
            gcode,
            axis: None,
            args: Vec::new(),
        }
    }

    /// Add the axis argument with an integer value (direction, enable flag).
    pub fn axis_int(mut self, axis: StackerAxis, value: i64) -> Self {
        self.axis = Some(axis);
        self.args.push((axis.as_str().to_string(), value.to_string()));
        self
    }

    /// Add the axis argument with a float value (distance, current).
    pub fn axis_float(mut self, axis: StackerAxis, value: f64) -> Self {
        self.axis = Some(axis);
        self.args
            .push((axis.as_str().to_string(), format!("{:.3}", value)));
        self
    }

    pub fn int(mut self, key: &str, value: i64) -> Self {
        self.args.push((key.to_string(), value.to_string()));
        self
    }

    pub fn float(mut self, key: &str, value: f64) -> Self {
        self.args.push((key.to_string(), format!("{:.3}", value)));
        self
    }

    pub fn text(mut self, key: &str, value: &str) -> Self {
        self.args.push((key.to_string(), value.to_string()));
        self
    }

    /// Append speed (`V`), acceleration (`A`) and discontinuity speed (`D`).
    pub fn move_params(mut self, params: Option<&MoveParams>) -> Self {
        if let Some(params) = params {
            if let Some(v) = params.max_speed {
                self = self.float("V", v);
            }
            if let Some(a) = params.acceleration {
                self = self.float("A", a);
            }
            if let Some(d) = params.max_speed_discont {
                self = self.float("D", d);
            }
        }
        self
    }

    pub fn build(self) -> Command {
        let mut line = self.gcode.as_str().to_string();
        for (key, value) in &self.args {
            line.push(' ');
            line.push_str(key);
            line.push(':');
            line.push_str(value);
        }
        Command {
            gcode: self.gcode,
            axis: self.axis,
            line,
        }
    }
}

// =============================================================================
// Command Constructors
// =============================================================================

pub fn device_info() -> Command {
    CommandBuilder::new(GCode::DeviceInfo).build()
}

pub fn reset_reason() -> Command {
    CommandBuilder::new(GCode::GetResetReason).build()
}

pub fn move_in_mm(axis: StackerAxis, distance_mm: f64, params: Option<&MoveParams>) -> Command {
    CommandBuilder::new(GCode::MoveTo)
        .axis_float(axis, distance_mm)
        .move_params(params)
        .build()
}

pub fn move_to_switch(axis: StackerAxis, direction: Direction, params: Option<&MoveParams>) -> Command {
    CommandBuilder::new(GCode::MoveToSwitch)
        .axis_int(axis, direction.wire_value() as i64)
        .move_params(params)
        .build()
}

pub fn home_axis(axis: StackerAxis, direction: Direction) -> Command {
    CommandBuilder::new(GCode::HomeAxis)
        .axis_int(axis, direction.wire_value() as i64)
        .build()
}

pub fn stop_motors() -> Command {
    CommandBuilder::new(GCode::StopMotors).build()
}

pub fn enable_motor(axis: StackerAxis, enable: bool) -> Command {
    let gcode = if enable {
        GCode::EnableMotors
    } else {
        GCode::DisableMotors
    };
    CommandBuilder::new(gcode).axis_int(axis, 1).build()
}

pub fn limit_switches() -> Command {
    CommandBuilder::new(GCode::GetLimitSwitches).build()
}

pub fn get_move_params(axis: StackerAxis) -> Command {
    CommandBuilder::new(GCode::GetMoveParams)
        .axis_int(axis, 1)
        .build()
}

pub fn platform_sensors() -> Command {
    CommandBuilder::new(GCode::GetPlatformSensors).build()
}

pub fn door_switch() -> Command {
    CommandBuilder::new(GCode::GetDoorSwitch).build()
}

pub fn install_detected() -> Command {
    CommandBuilder::new(GCode::GetInstallDetected).build()
}

pub fn set_led(color: LedColor, power: f64) -> Command {
    CommandBuilder::new(GCode::SetLed)
        .int("C", color as i64)
        .float("P", power.clamp(0.0, 1.0))
        .build()
}

pub fn set_run_current(axis: StackerAxis, amps: f64) -> Command {
    CommandBuilder::new(GCode::SetRunCurrent)
        .axis_float(axis, amps)
        .build()
}

pub fn set_ihold_current(axis: StackerAxis, amps: f64) -> Command {
    CommandBuilder::new(GCode::SetIholdCurrent)
        .axis_float(axis, amps)
        .build()
}

pub fn set_serial_number(serial: &str) -> Command {
    CommandBuilder::new(GCode::SetSerialNumber)
        .text("SN", serial)
        .build()
}

// =============================================================================
// Response Parsing
// =============================================================================

/// A confirmed response line split into its `KEY:VALUE` fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    command: String,
    fields: Vec<(String, String)>,
}

impl Response {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> StackerResult<&str> {
        self.field(key)
            .ok_or_else(|| StackerError::malformed(&self.command, &format!("missing field {key}")))
    }

    pub fn bool_field(&self, key: &str) -> StackerResult<bool> {
        match self.require(key)? {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(StackerError::malformed(
                &self.command,
                &format!("{key}:{other} is not a flag"),
            )),
        }
    }

    pub fn float_field(&self, key: &str) -> StackerResult<f64> {
        let raw = self.require(key)?;
        raw.parse::<f64>().map_err(|_| {
            StackerError::malformed(&self.command, &format!("{key}:{raw} is not a number"))
        })
    }

    pub fn int_field(&self, key: &str) -> StackerResult<i64> {
        let raw = self.require(key)?;
        raw.parse::<i64>().map_err(|_| {
            StackerError::malformed(&self.command, &format!("{key}:{raw} is not an integer"))
        })
    }
}

/// Validate and split the confirmation line for `command`.
///
/// `serial_number` is only used to label stall errors.
pub fn parse_response(command: &Command, line: &str, serial_number: &str) -> StackerResult<Response> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("ERR") {
        let (code, message) = rest.split_once(':').unwrap_or((rest, ""));
        let code: u16 = code
            .trim()
            .parse()
            .map_err(|_| StackerError::malformed(command.as_str(), line))?;

        if code == STALL_ERROR_CODE && command.gcode().is_motion() {
            if let Some(axis) = command.axis() {
                return Err(StackerError::StallOrCollision {
                    axis,
                    serial_number: serial_number.to_string(),
                });
            }
        }
        return Err(StackerError::Firmware {
            command: command.to_string(),
            code,
            message: message.trim().to_string(),
        });
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    match (tokens.first(), tokens.last()) {
        (Some(echo), Some(ack))
            if tokens.len() >= 2
                && *echo == command.gcode().as_str()
                && ack.eq_ignore_ascii_case(ACK) => {}
        _ => return Err(StackerError::malformed(command.as_str(), line)),
    }

    let mut fields = Vec::with_capacity(tokens.len() - 2);
    for token in &tokens[1..tokens.len() - 1] {
        let (key, value) = token
            .split_once(':')
            .ok_or_else(|| StackerError::malformed(command.as_str(), line))?;
        fields.push((key.to_string(), value.to_string()));
    }

    Ok(Response {
        command: command.to_string(),
        fields,
    })
}

/// `M115 FW:<fw> HW:<hw> SerialNo:<sn> ok`
pub fn parse_device_info(response: &Response) -> StackerResult<(String, HardwareRevision, String)> {
    let fw = response.require("FW")?.to_string();
    let hw = HardwareRevision::from_hw_string(response.require("HW")?);
    let sn = response.require("SerialNo")?.to_string();
    Ok((fw, hw, sn))
}

/// `M114 R:<code> ok`
pub fn parse_reset_reason(response: &Response) -> StackerResult<u8> {
    let code = response.int_field("R")?;
    u8::try_from(code)
        .map_err(|_| StackerError::malformed(GCode::GetResetReason.as_str(), &format!("R:{code}")))
}

/// `M119 XE:<b> XR:<b> ZE:<b> ZR:<b> LE:<b> LR:<b> ok`
pub fn parse_limit_switches(response: &Response) -> StackerResult<LimitSwitchStatus> {
    Ok(LimitSwitchStatus {
        x_extend: response.bool_field("XE")?,
        x_retract: response.bool_field("XR")?,
        z_extend: response.bool_field("ZE")?,
        z_retract: response.bool_field("ZR")?,
        l_extend: response.bool_field("LE")?,
        l_retract: response.bool_field("LR")?,
    })
}

/// `M121 E:<b> R:<b> ok`
pub fn parse_platform_sensors(response: &Response) -> StackerResult<PlatformStatus> {
    Ok(PlatformStatus {
        extended: response.bool_field("E")?,
        retracted: response.bool_field("R")?,
    })
}

/// `M122 D:<b> ok`, 1 when the hopper door is closed.
pub fn parse_door_closed(response: &Response) -> StackerResult<bool> {
    response.bool_field("D")
}

/// `M123 I:<b> ok`
pub fn parse_install_detected(response: &Response) -> StackerResult<bool> {
    response.bool_field("I")
}

/// `M120 M:<axis> V:<v> A:<a> D:<d> ok`
pub fn parse_move_params(response: &Response) -> StackerResult<(StackerAxis, MoveParams)> {
    let axis_raw = response.require("M")?;
    let axis = StackerAxis::from_wire(axis_raw).ok_or_else(|| {
        StackerError::malformed(GCode::GetMoveParams.as_str(), &format!("M:{axis_raw}"))
    })?;
    Ok((
        axis,
        MoveParams::new(
            response.float_field("V")?,
            response.float_field("A")?,
            response.float_field("D")?,
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_frames_move_command() {
        let params = MoveParams::new(200.0, 500.0, 5.0);
        let cmd = move_in_mm(StackerAxis::Z, -12.5, Some(&params));
        assert_eq!(cmd.to_wire(), "G0 Z:-12.500 V:200.000 A:500.000 D:5.000\n");
        assert_eq!(cmd.axis(), Some(StackerAxis::Z));
    }

    #[test]
    fn test_builder_skips_unset_move_params() {
        let params = MoveParams {
            max_speed: Some(50.0),
            ..MoveParams::default()
        };
        let cmd = move_to_switch(StackerAxis::L, Direction::Retract, Some(&params));
        assert_eq!(cmd.as_str(), "G5 L:0 V:50.000");
    }

    #[test]
    fn test_home_and_device_info_framing() {
        assert_eq!(home_axis(StackerAxis::X, Direction::Extend).as_str(), "G28 X:1");
        assert_eq!(device_info().to_wire(), "M115\n");
        assert_eq!(set_serial_number("FSV1").as_str(), "M996 SN:FSV1");
    }

    #[test]
    fn test_parse_device_info() {
        let cmd = device_info();
        let resp = parse_response(
            &cmd,
            "M115 FW:dummy-fw-version HW:Opentrons-flex-stacker-a1 SerialNo:dummy-serial ok\n",
            "",
        )
        .unwrap();
        let (fw, hw, sn) = parse_device_info(&resp).unwrap();
        assert_eq!(fw, "dummy-fw-version");
        assert_eq!(hw, HardwareRevision::Evt);
        assert_eq!(sn, "dummy-serial");
    }

    #[test]
    fn test_parse_limit_switches() {
        let resp = parse_response(
            &limit_switches(),
            "M119 XE:0 XR:1 ZE:0 ZR:1 LE:0 LR:1 ok",
            "",
        )
        .unwrap();
        let status = parse_limit_switches(&resp).unwrap();
        assert!(status.x_retract && status.z_retract && status.l_retract);
        assert!(!status.x_extend);
    }

    #[test]
    fn test_stall_on_motion_command() {
        let cmd = home_axis(StackerAxis::Z, Direction::Retract);
        let err = parse_response(&cmd, "ERR403:motor stall detected", "SN123").unwrap_err();
        match err {
            StackerError::StallOrCollision {
                axis,
                serial_number,
            } => {
                assert_eq!(axis, StackerAxis::Z);
                assert_eq!(serial_number, "SN123");
            }
            other => panic!("expected stall, got {other:?}"),
        }
    }

    #[test]
    fn test_other_firmware_error() {
        let err = parse_response(&door_switch(), "ERR001:unhandled gcode", "SN").unwrap_err();
        assert!(matches!(err, StackerError::Firmware { code: 1, .. }));
    }

    #[test]
    fn test_wrong_echo_is_malformed() {
        let err = parse_response(&door_switch(), "M121 E:0 R:0 ok", "SN").unwrap_err();
        assert!(matches!(err, StackerError::MalformedResponse { .. }));
    }

    #[test]
    fn test_missing_ack_is_malformed() {
        let err = parse_response(&door_switch(), "M122 D:1", "SN").unwrap_err();
        assert!(matches!(err, StackerError::MalformedResponse { .. }));
    }

    #[test]
    fn test_bad_flag_value() {
        let resp = parse_response(&door_switch(), "M122 D:7 ok", "SN").unwrap();
        assert!(parse_door_closed(&resp).is_err());
    }

    #[test]
    fn test_parse_move_params() {
        let resp = parse_response(
            &get_move_params(StackerAxis::X),
            "M120 M:X V:200.0 A:1500.0 D:5.0 ok",
            "",
        )
        .unwrap();
        let (axis, params) = parse_move_params(&resp).unwrap();
        assert_eq!(axis, StackerAxis::X);
        assert_eq!(params.acceleration, Some(1500.0));
    }
}
