//! Service loop: ticks the lifecycle every sampling interval until stopped.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::broker::BrokerApi;
use crate::error::TradingError;
use crate::lifecycle::TradeLifecycle;

/// Owns the polling task for a [`TradeLifecycle`].
pub struct LifecycleService<B: BrokerApi + ?Sized + 'static> {
    lifecycle: Arc<TradeLifecycle<B>>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl<B: BrokerApi + ?Sized + 'static> LifecycleService<B> {
    #[must_use]
    pub fn new(lifecycle: Arc<TradeLifecycle<B>>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            lifecycle,
            shutdown,
            task: None,
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Arc<TradeLifecycle<B>> {
        &self.lifecycle
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Spawns the polling loop. The first tick runs immediately.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();
        let lifecycle = self.lifecycle.clone();
        self.task = Some(tokio::spawn(run(lifecycle, shutdown)));
    }

    /// Stops polling, waits for any in-flight tick to finish, then logs out
    /// of the broker session.
    ///
    /// # Errors
    /// Returns error if the logout fails.
    pub async fn stop(&mut self) -> Result<(), TradingError> {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Lifecycle task ended abnormally");
            }
        }
        self.lifecycle.broker().logout().await?;
        info!("Lifecycle service stopped");
        Ok(())
    }
}

async fn run<B: BrokerApi + ?Sized>(
    lifecycle: Arc<TradeLifecycle<B>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let params = lifecycle.risk();
    info!(
        sampling_secs = params.sampling_interval_secs,
        budget = %params.budget,
        delta = %params.delta,
        "Lifecycle service started"
    );

    loop {
        let stopping = *shutdown.borrow();
        if stopping {
            break;
        }

        lifecycle.tick().await;

        let interval = lifecycle.risk().sampling_interval();
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
