//! Periodic background task owned by a controller.
//!
//! The task runs `poll` once per interval until [`Poller::stop`] is awaited
//! or the `Poller` is dropped. Poll failures are logged and polling continues.

use futures::future::BoxFuture;
use stacker_core::error::StackerResult;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a running poll loop.
#[derive(Debug)]
pub struct Poller {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Spawn a poll loop. Must be called inside a tokio runtime.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, poll: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, StackerResult<()>> + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(poller = %task_name, ?interval, "Poller started");

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = poll().await {
                            tracing::warn!(poller = %task_name, error = %e, "Poll failed");
                        }
                    }
                }
            }

            tracing::debug!(poller = %task_name, "Poller stopped");
        });

        Self {
            name,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(poller = %self.name, error = %e, "Poller task panicked");
                }
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown_tx.send(true);
            handle.abort();
        }
    }
}
