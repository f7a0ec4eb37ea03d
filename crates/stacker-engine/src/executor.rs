//! Serialized execution of Flex Stacker commands.
//!
//! One command runs at a time. A command's state update is applied only
//! after its handler succeeds, and before any operator pause it requested,
//! so cancelling a paused run keeps the update.

use crate::commands::{
    self, CommandContext, CommandOutcome, StackerCommand, StackerCommandResult,
};
use crate::error::{CommandError, CommandResult};
use crate::labware::LabwareResolver;
use crate::run_control::RunControl;
use crate::store::{EngineState, ModuleId, StateStore};
use anyhow::Context;
use parking_lot::RwLock;
use stacker_core::config::StackerSystemConfig;
use stacker_driver::FlexStacker;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

pub struct CommandExecutor {
    store: Arc<StateStore>,
    stackers: RwLock<HashMap<ModuleId, Arc<FlexStacker>>>,
    resolver: Arc<dyn LabwareResolver>,
    run_control: Arc<dyn RunControl>,
    command_lock: Mutex<()>,
}

impl CommandExecutor {
    pub fn new(resolver: Arc<dyn LabwareResolver>, run_control: Arc<dyn RunControl>) -> Self {
        Self::with_store(Arc::new(StateStore::new()), resolver, run_control)
    }

    pub fn with_store(
        store: Arc<StateStore>,
        resolver: Arc<dyn LabwareResolver>,
        run_control: Arc<dyn RunControl>,
    ) -> Self {
        Self {
            store,
            stackers: RwLock::new(HashMap::new()),
            resolver,
            run_control,
            command_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn state(&self) -> Arc<EngineState> {
        self.store.snapshot()
    }

    pub fn stacker(&self, module_id: &str) -> Option<Arc<FlexStacker>> {
        self.stackers.read().get(module_id).cloned()
    }

    /// Connect `stacker` and register it in `slot`.
    #[instrument(skip(self, stacker), fields(module_id = %stacker.module_id(), slot), err)]
    pub async fn load_module(&self, stacker: Arc<FlexStacker>, slot: &str) -> CommandResult<()> {
        let _guard = self.command_lock.lock().await;

        stacker.connect().await?;
        let module_id = stacker.module_id().to_string();
        self.store.add_module(&module_id, slot);
        let previous = self.stackers.write().insert(module_id.clone(), stacker);
        if previous.is_some() {
            warn!(module_id = %module_id, "Replaced an already loaded Flex Stacker");
        }
        info!(module_id = %module_id, slot, "Flex Stacker loaded");
        Ok(())
    }

    /// Build, connect and register every module in `config`.
    pub async fn load_modules_from_config(&self, config: &StackerSystemConfig) -> anyhow::Result<()> {
        config.validate()?;
        for module in &config.modules {
            let stacker = Arc::new(FlexStacker::from_config(
                module.module_id.clone(),
                &module.connection,
            ));
            self.load_module(stacker, &module.slot)
                .await
                .with_context(|| format!("Failed to load Flex Stacker {}", module.module_id))?;
        }
        Ok(())
    }

    /// Disconnect every loaded stacker. Errors are logged.
    pub async fn shutdown(&self) {
        let stackers: Vec<Arc<FlexStacker>> = self.stackers.read().values().cloned().collect();
        for stacker in stackers {
            if let Err(e) = stacker.disconnect().await {
                warn!(module_id = %stacker.module_id(), error = %e, "Disconnect failed");
            }
        }
    }

    /// Run one command to completion.
    #[instrument(skip(self, command), fields(command_type = command.command_type(), module_id = command.module_id()), err)]
    pub async fn execute(&self, command: StackerCommand) -> CommandResult<StackerCommandResult> {
        let _guard = self.command_lock.lock().await;

        let stackers = self.stackers.read().clone();
        let ctx = CommandContext {
            state: self.store.snapshot(),
            stackers: &stackers,
            resolver: self.resolver.as_ref(),
        };

        let result = match &command {
            StackerCommand::SetStoredLabware(params) => StackerCommandResult::SetStoredLabware(
                self.finish(commands::set_stored_labware::execute(params, &ctx).await?)
                    .await?,
            ),
            StackerCommand::Fill(params) => StackerCommandResult::Fill(
                self.finish(commands::fill::execute(params, &ctx).await?)
                    .await?,
            ),
            StackerCommand::Empty(params) => StackerCommandResult::Empty(
                self.finish(commands::empty::execute(params, &ctx).await?)
                    .await?,
            ),
            StackerCommand::Store(params) => StackerCommandResult::Store(
                self.finish(commands::store::execute(params, &ctx).await?)
                    .await?,
            ),
            StackerCommand::Retrieve(params) => StackerCommandResult::Retrieve(
                self.finish(commands::retrieve::execute(params, &ctx).await?)
                    .await?,
            ),
            StackerCommand::Configure(params) => StackerCommandResult::Configure(
                self.finish(commands::configure::execute(params, &ctx).await?)
                    .await?,
            ),
        };
        Ok(result)
    }

    /// Run a command given as JSON and return the JSON result.
    pub async fn execute_json(&self, command: serde_json::Value) -> CommandResult<serde_json::Value> {
        let command: StackerCommand = serde_json::from_value(command)
            .map_err(|e| CommandError::InvalidCommand(e.to_string()))?;
        let result = self.execute(command).await?;
        serde_json::to_value(result).map_err(|e| CommandError::InvalidCommand(e.to_string()))
    }

    /// Apply the outcome's update, then honor its pause.
    async fn finish<R>(&self, outcome: CommandOutcome<R>) -> CommandResult<R> {
        self.store.apply(&outcome.update)?;
        if let Some(pause) = outcome.pause {
            self.run_control
                .wait_for_resume(pause.message.as_deref())
                .await?;
        }
        Ok(outcome.result)
    }
}
