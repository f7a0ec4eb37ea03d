//! Driver selection from configuration.

use crate::driver::FlexStackerDriver;
use crate::serial_driver::FlexStackerSerialDriver;
use crate::simulator::SimulatingDriver;
use stacker_core::config::StackerConfig;
use std::sync::Arc;

/// Build the driver named by `config`: the simulator when `simulating` is
/// set, otherwise a serial driver for `config.port`. Nothing is opened until
/// `connect()`.
pub fn create_driver(config: &StackerConfig) -> Arc<dyn FlexStackerDriver> {
    if config.simulating {
        tracing::info!("Using simulating Flex Stacker driver");
        Arc::new(SimulatingDriver::new())
    } else {
        tracing::info!(port = %config.port, "Using serial Flex Stacker driver");
        Arc::new(FlexStackerSerialDriver::new(config))
    }
}
