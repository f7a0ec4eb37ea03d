//! Flex Stacker serial driver.
//!
//! Each command is a single transaction: the port mutex is held from the
//! write until the confirmation line is read, so foreground commands and the
//! telemetry poller never interleave on the wire. Motion commands only
//! answer once the move finishes and use the longer motion timeout.

use crate::driver::FlexStackerDriver;
use crate::protocol::{self, Command, Response};
use async_trait::async_trait;
use parking_lot::RwLock;
use stacker_core::config::StackerConfig;
use stacker_core::error::{StackerError, StackerResult};
use stacker_core::serial::{drain_serial_buffer, open_serial_async, wrap_shared, SharedPort};
use stacker_core::types::{
    Direction, LedColor, LimitSwitchStatus, MoveParams, PlatformStatus,
    StackerAxis, StackerInfo,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

/// How long the port must stay quiet when flushing stale bytes on connect.
const CONNECT_DRAIN_QUIET_MS: u64 = 50;

/// Quiet window for discarding late replies before each command.
const COMMAND_DRAIN_QUIET_MS: u64 = 5;

/// Driver for a Flex Stacker on a serial port.
pub struct FlexStackerSerialDriver {
    port_path: String,
    baud_rate: u32,
    response_timeout: Duration,
    motion_timeout: Duration,
    /// `None` while disconnected.
    port: RwLock<Option<SharedPort>>,
    /// Serial number from the last device info query, used in stall errors.
    serial_number: RwLock<String>,
}

impl FlexStackerSerialDriver {
    pub fn new(config: &StackerConfig) -> Self {
        Self {
            port_path: config.port.clone(),
            baud_rate: config.baud_rate,
            response_timeout: config.response_timeout(),
            motion_timeout: config.motion_timeout(),
            port: RwLock::new(None),
            serial_number: RwLock::new(String::new()),
        }
    }

    /// Driver over an already open port (mock serial in tests).
    pub fn with_port(port: SharedPort, response_timeout: Duration, motion_timeout: Duration) -> Self {
        Self {
            port_path: "<test>".to_string(),
            baud_rate: 0,
            response_timeout,
            motion_timeout,
            port: RwLock::new(Some(port)),
            serial_number: RwLock::new(String::new()),
        }
    }

    pub fn port_path(&self) -> &str {
        &self.port_path
    }

    fn shared_port(&self) -> StackerResult<SharedPort> {
        self.port.read().clone().ok_or(StackerError::NotConnected)
    }

    fn timeout_for(&self, command: &Command) -> Duration {
        if command.gcode().is_motion() {
            self.motion_timeout
        } else {
            self.response_timeout
        }
    }

    /// Write `command` and wait for its confirmation line.
    async fn send_command(&self, command: Command) -> StackerResult<Response> {
        let port = self.shared_port()?;
        let timeout = self.timeout_for(&command);

        let line = {
            let mut guard = port.lock().await;

            // A reply that missed its deadline, or a partial line left in the
            // read buffer, must not be taken as this command's reply.
            let discarded = drain_serial_buffer(&mut *guard, COMMAND_DRAIN_QUIET_MS).await;
            if discarded > 0 {
                debug!(command = %command, discarded, "Discarded stale bytes before command");
            }

            let writer = guard.get_mut();
            writer.write_all(command.to_wire().as_bytes()).await?;
            writer.flush().await?;
            trace!(command = %command, "Sent");
            let deadline = Instant::now() + timeout;

            let mut line = String::new();
            loop {
                line.clear();
                let read = tokio::time::timeout_at(deadline, guard.read_line(&mut line))
                    .await
                    .map_err(|_| StackerError::Timeout {
                        command: command.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    })??;
                if read == 0 {
                    return Err(StackerError::UnexpectedEof);
                }
                if !line.trim().is_empty() {
                    break;
                }
            }
            line
        };

        trace!(command = %command, response = line.trim(), "Received");
        protocol::parse_response(&command, &line, &self.serial_number.read())
    }
}

#[async_trait]
impl FlexStackerDriver for FlexStackerSerialDriver {
    #[instrument(skip(self), fields(port = %self.port_path), err)]
    async fn connect(&self) -> StackerResult<()> {
        if self.port.read().is_some() {
            return Ok(());
        }

        let mut stream = open_serial_async(&self.port_path, self.baud_rate)
            .await
            .map_err(|e| StackerError::Io(std::io::Error::other(format!("{e:#}"))))?;
        let discarded = drain_serial_buffer(&mut stream, CONNECT_DRAIN_QUIET_MS).await;
        if discarded > 0 {
            debug!(discarded, "Discarded stale bytes on connect");
        }

        *self.port.write() = Some(wrap_shared(Box::new(stream)));
        Ok(())
    }

    #[instrument(skip(self), fields(port = %self.port_path))]
    async fn disconnect(&self) -> StackerResult<()> {
        // In-flight transactions keep their Arc until they finish.
        self.port.write().take();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.port.read().is_some()
    }

    fn is_simulated(&self) -> bool {
        false
    }

    #[instrument(skip(self), err)]
    async fn get_device_info(&self) -> StackerResult<StackerInfo> {
        let response = self.send_command(protocol::device_info()).await?;
        let (fw, hw, sn) = protocol::parse_device_info(&response)?;
        *self.serial_number.write() = sn.clone();

        let response = self.send_command(protocol::reset_reason()).await?;
        let rr = protocol::parse_reset_reason(&response)?;

        Ok(StackerInfo {
            fw,
            hw,
            sn,
            rr: Some(rr),
        })
    }

    #[instrument(skip(self), err)]
    async fn set_serial_number(&self, serial: &str) -> StackerResult<()> {
        if serial.is_empty() || serial.contains(char::is_whitespace) {
            return Err(StackerError::InvalidParameter(format!(
                "serial number '{serial}' must be non-empty without whitespace"
            )));
        }
        self.send_command(protocol::set_serial_number(serial)).await?;
        *self.serial_number.write() = serial.to_string();
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn enable_motors(&self, axes: &[StackerAxis]) -> StackerResult<()> {
        for axis in axes {
            self.send_command(protocol::enable_motor(*axis, true)).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn disable_motors(&self, axes: &[StackerAxis]) -> StackerResult<()> {
        for axis in axes {
            self.send_command(protocol::enable_motor(*axis, false)).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn stop_motors(&self) -> StackerResult<()> {
        self.send_command(protocol::stop_motors()).await.map(|_| ())
    }

    #[instrument(skip(self), err)]
    async fn set_run_current(&self, axis: StackerAxis, amps: f64) -> StackerResult<()> {
        self.send_command(protocol::set_run_current(axis, amps))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), err)]
    async fn set_ihold_current(&self, axis: StackerAxis, amps: f64) -> StackerResult<()> {
        self.send_command(protocol::set_ihold_current(axis, amps))
            .await
            .map(|_| ())
    }

    async fn get_limit_switches_status(&self) -> StackerResult<LimitSwitchStatus> {
        let response = self.send_command(protocol::limit_switches()).await?;
        protocol::parse_limit_switches(&response)
    }

    async fn get_platform_status(&self) -> StackerResult<PlatformStatus> {
        let response = self.send_command(protocol::platform_sensors()).await?;
        protocol::parse_platform_sensors(&response)
    }

    async fn get_hopper_door_closed(&self) -> StackerResult<bool> {
        let response = self.send_command(protocol::door_switch()).await?;
        protocol::parse_door_closed(&response)
    }

    async fn get_installation_detected(&self) -> StackerResult<bool> {
        let response = self.send_command(protocol::install_detected()).await?;
        protocol::parse_install_detected(&response)
    }

    #[instrument(skip(self), err)]
    async fn get_motion_params(&self, axis: StackerAxis) -> StackerResult<MoveParams> {
        let response = self.send_command(protocol::get_move_params(axis)).await?;
        let (reported, params) = protocol::parse_move_params(&response)?;
        if reported != axis {
            return Err(StackerError::malformed(
                protocol::get_move_params(axis).as_str(),
                &format!("reported axis {reported}"),
            ));
        }
        Ok(params)
    }

    #[instrument(skip(self, params), fields(axis = %axis, distance_mm), err)]
    async fn move_in_mm(
        &self,
        axis: StackerAxis,
        distance_mm: f64,
        params: Option<MoveParams>,
    ) -> StackerResult<()> {
        self.send_command(protocol::move_in_mm(axis, distance_mm, params.as_ref()))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, params), fields(axis = %axis, direction = %direction), err)]
    async fn move_to_limit_switch(
        &self,
        axis: StackerAxis,
        direction: Direction,
        params: Option<MoveParams>,
    ) -> StackerResult<()> {
        self.send_command(protocol::move_to_switch(axis, direction, params.as_ref()))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), fields(axis = %axis, direction = %direction), err)]
    async fn home_axis(&self, axis: StackerAxis, direction: Direction) -> StackerResult<()> {
        self.send_command(protocol::home_axis(axis, direction))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), err)]
    async fn set_led(&self, color: LedColor, power: f64) -> StackerResult<()> {
        self.send_command(protocol::set_led(color, power))
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for FlexStackerSerialDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlexStackerSerialDriver")
            .field("port_path", &self.port_path)
            .field("connected", &self.port.read().is_some())
            .finish_non_exhaustive()
    }
}
