//! Flex Stacker driver stack.
//!
//! - [`protocol`]: command framing and response parsing
//! - [`driver`]: the [`FlexStackerDriver`] trait
//! - [`serial_driver`] / [`simulator`]: hardware and in-memory implementations
//! - [`factory`]: picks one from configuration
//! - [`controller`]: [`FlexStacker`], the device-level API used by the engine
//! - [`poller`]: background telemetry task owned by the controller

pub mod controller;
pub mod driver;
pub mod factory;
pub mod motion;
pub mod poller;
pub mod protocol;
pub mod serial_driver;
pub mod simulator;

pub use controller::{
    AxisState, FlexStacker, LatchState, SensorStates, StackerLiveData, StackerStatus,
};
pub use driver::FlexStackerDriver;
pub use factory::create_driver;
pub use serial_driver::FlexStackerSerialDriver;
pub use simulator::SimulatingDriver;
