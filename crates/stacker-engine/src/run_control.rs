//! Run pause/resume control.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunControlError {
    #[error("Run was cancelled while paused")]
    Cancelled,
}

/// Blocks the run until an operator resumes it.
#[async_trait]
pub trait RunControl: Send + Sync {
    /// Pause the run, surfacing `message`, and return once resumed.
    async fn wait_for_resume(&self, message: Option<&str>) -> Result<(), RunControlError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Running,
    Paused { message: Option<String> },
    Cancelled,
}

/// [`RunControl`] driven by [`PauseGate::resume`] and [`PauseGate::cancel`].
///
/// Cancellation is permanent: later waits fail immediately.
#[derive(Debug)]
pub struct PauseGate {
    state_tx: watch::Sender<GateState>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(GateState::Running);
        Self { state_tx }
    }

    pub fn state(&self) -> GateState {
        self.state_tx.borrow().clone()
    }

    pub fn is_paused(&self) -> bool {
        matches!(*self.state_tx.borrow(), GateState::Paused { .. })
    }

    /// Resume a paused run. No effect otherwise.
    pub fn resume(&self) {
        self.state_tx.send_if_modified(|state| {
            if matches!(state, GateState::Paused { .. }) {
                *state = GateState::Running;
                true
            } else {
                false
            }
        });
    }

    pub fn cancel(&self) {
        self.state_tx.send_replace(GateState::Cancelled);
    }

    /// Wait until the run is paused, returning the pause message.
    pub async fn paused(&self) -> Option<String> {
        let mut rx = self.state_tx.subscribe();
        let state = rx
            .wait_for(|state| matches!(state, GateState::Paused { .. }))
            .await;
        match state.as_deref() {
            Ok(GateState::Paused { message }) => message.clone(),
            _ => None,
        }
    }
}

#[async_trait]
impl RunControl for PauseGate {
    async fn wait_for_resume(&self, message: Option<&str>) -> Result<(), RunControlError> {
        let mut rx = self.state_tx.subscribe();
        let paused = self.state_tx.send_if_modified(|state| {
            if *state == GateState::Cancelled {
                false
            } else {
                *state = GateState::Paused {
                    message: message.map(str::to_string),
                };
                true
            }
        });
        if !paused {
            return Err(RunControlError::Cancelled);
        }
        tracing::info!(message = message.unwrap_or(""), "Run paused");

        let outcome = rx
            .wait_for(|state| !matches!(state, GateState::Paused { .. }))
            .await
            .map(|state| state.clone());
        match outcome {
            Ok(GateState::Running) => {
                tracing::info!("Run resumed");
                Ok(())
            }
            _ => Err(RunControlError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resume_releases_wait() {
        let gate = Arc::new(PauseGate::new());
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.wait_for_resume(Some("Fill the hopper")).await }
        });

        assert_eq!(gate.paused().await.as_deref(), Some("Fill the hopper"));
        assert!(gate.is_paused());
        gate.resume();

        waiter.await.unwrap().unwrap();
        assert_eq!(gate.state(), GateState::Running);
    }

    #[tokio::test]
    async fn test_cancel_fails_wait() {
        let gate = Arc::new(PauseGate::new());
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.wait_for_resume(None).await }
        });

        gate.paused().await;
        gate.cancel();

        assert_eq!(waiter.await.unwrap(), Err(RunControlError::Cancelled));
        // Cancellation sticks.
        assert_eq!(
            gate.wait_for_resume(None).await,
            Err(RunControlError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_resume_when_running_is_noop() {
        let gate = PauseGate::new();
        gate.resume();
        assert_eq!(gate.state(), GateState::Running);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), gate.paused())
                .await
                .is_err()
        );
    }
}
