//! Turns termination signals into a bounded graceful shutdown.
//!
//! The first signal starts the shutdown with the configured grace period.
//! Any further signal stops waiting for the drain, so an operator can always
//! get the process to exit by interrupting it again.

use std::time::Duration;

use tokio::{pin, select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::{
    shutdown::{Deadline, ShutdownController, ShutdownError},
    signals::Signal,
};

pub struct Supervisor {
    controller: ShutdownController,
    grace: Option<Duration>,
}

impl Supervisor {
    /// `grace` of `None` waits for the drain indefinitely.
    pub fn new(controller: ShutdownController, grace: Option<Duration>) -> Self {
        Self { controller, grace }
    }

    /// Blocks until the first signal arrives, then shuts the controller down.
    /// A closed signal channel counts as a signal.
    pub async fn run(self, mut signals: mpsc::Receiver<Signal>) -> Result<(), ShutdownError> {
        match signals.recv().await {
            Some(sig) => info!(%sig, "received signal"),
            None => info!("signal source closed"),
        }

        let span = info_span!("shutdown", grace = ?self.grace);
        async move {
            let force = CancellationToken::new();
            let deadline = Deadline::from(self.grace).with_cancel(force.clone());

            info!(pending = self.controller.pending(), "waiting for work to finish");

            let shutdown = self.controller.shutdown(deadline);
            pin!(shutdown);

            let result = loop {
                select! {
                    result = &mut shutdown => break result,
                    Some(sig) = signals.recv() => {
                        warn!(%sig, "received signal during shutdown, no longer waiting");
                        force.cancel();
                    }
                }
            };

            match &result {
                Ok(()) => info!("shutdown complete"),
                Err(e) => warn!("{e}"),
            }
            result
        }
        .instrument(span)
        .await
    }
}
