//! Periodic cache cleanup.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CleanupOutcome, ImageService};

/// Background task that calls [`ImageService::cleanup`] every interval.
///
/// Holds only a weak reference to the service, so a dropped service ends
/// the loop on its next tick. [`stop`](Self::stop) cancels the loop and
/// waits for an in-progress cleanup to finish.
pub(crate) struct Janitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Janitor {
    pub(crate) fn spawn(service: Weak<ImageService>, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "cache janitor starting");
            // first run one full interval after start
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break,

                    _ = ticker.tick() => {
                        let Some(service) = service.upgrade() else {
                            debug!("image service dropped, janitor exiting");
                            break;
                        };
                        match service.cleanup(false).await {
                            CleanupOutcome::Completed(report) => {
                                debug!(removed = report.removed(), "scheduled cleanup finished");
                            }
                            CleanupOutcome::Skipped(reason) => {
                                debug!(reason = reason.as_str(), "scheduled cleanup skipped");
                            }
                        }
                    }
                }
            }
            debug!("cache janitor stopped");
        });

        Self { cancel, handle }
    }

    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "cache janitor task failed");
        }
    }
}
