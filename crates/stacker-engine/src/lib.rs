//! Flex Stacker engine: pool state, command handlers and executor.
//!
//! # Example
//!
//! ```rust,ignore
//! use stacker_engine::{CommandExecutor, FsLabwareResolver, PauseGate};
//!
//! let executor = CommandExecutor::new(
//!     Arc::new(FsLabwareResolver::new("/data/labware")),
//!     Arc::new(PauseGate::new()),
//! );
//! executor.load_modules_from_config(&config).await?;
//! let result = executor.execute_json(json!({
//!     "commandType": "flexStacker/retrieve",
//!     "params": {"moduleId": "flexStackerModuleV1-D4"}
//! })).await?;
//! ```

pub mod commands;
pub mod error;
pub mod executor;
pub mod labware;
pub mod run_control;
pub mod state;
pub mod store;

pub use commands::{FillEmptyStrategy, StackerCommand, StackerCommandResult};
pub use error::{CommandError, CommandResult};
pub use executor::CommandExecutor;
pub use labware::{
    FsLabwareResolver, InMemoryLabwareResolver, LabwareDefinition, LabwareLoadParams,
    LabwareLocation, LabwareResolver,
};
pub use run_control::{PauseGate, RunControl, RunControlError};
pub use state::{FlexStackerSubState, PoolDefinition, PoolUpdateError, StackerPoolUpdate};
pub use store::{EngineState, StateStore, StateUpdate};
