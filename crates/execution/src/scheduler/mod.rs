//! Fixed-interval background loops.
//!
//! Every component runs its periodic work through a `BackgroundLoop`:
//! - one task per loop, driven by a `tokio::time::interval`
//! - `start` refuses to launch a second task
//! - `stop` cancels the loop and waits until the task has exited

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Returned by `start` when the loop is already running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0} is already running")]
pub struct AlreadyRunning(pub &'static str);

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A named, restartable periodic task.
pub struct BackgroundLoop {
    name: &'static str,
    running: Mutex<Option<RunningLoop>>,
}

impl BackgroundLoop {
    /// Creates a stopped loop.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawns the loop, calling `tick` once per `period`.
    ///
    /// The first call happens one full period after start. A tick that runs
    /// long delays the next one instead of bursting to catch up.
    ///
    /// # Errors
    /// Returns `AlreadyRunning` if the loop has been started and not stopped.
    pub async fn start<F, Fut>(&self, period: Duration, mut tick: F) -> Result<(), AlreadyRunning>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(AlreadyRunning(self.name));
        }

        let token = CancellationToken::new();
        let child = token.clone();
        let name = self.name;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately once; skip it so work starts after one period
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => {
                        debug!(task = name, "Loop received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        tick().await;
                    }
                }
            }
        });

        info!(task = name, period_ms = period.as_millis() as u64, "Started background loop");
        *running = Some(RunningLoop { token, handle });
        Ok(())
    }

    /// Cancels the loop and waits for it to exit. Returns false if it was not
    /// running.
    pub async fn stop(&self) -> bool {
        let Some(RunningLoop { token, handle }) = self.running.lock().await.take() else {
            return false;
        };
        token.cancel();
        if let Err(e) = handle.await {
            error!(task = self.name, error = %e, "Background loop ended abnormally");
        }
        info!(task = self.name, "Stopped background loop");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}
