//! Periodic replication scheduling.

use super::FileService;
use std::time::Duration;
use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Calls [`FileService::schedule_replication`] on a fixed interval until the
/// shutdown token is cancelled. A failed tick is logged and the next one
/// proceeds as usual.
pub struct ReplicationScheduler {
    files: FileService,
    interval: Duration,
    batch_size: i64,
}

impl ReplicationScheduler {
    pub fn new(files: FileService, interval: Duration, batch_size: i64) -> Self {
        Self {
            files,
            interval,
            batch_size,
        }
    }

    pub fn start_background(self, shutdown: CancellationToken) -> JoinHandle<()> {
        info!(
            "Starting replication scheduler with {}s interval, batch {}",
            self.interval.as_secs(),
            self.batch_size
        );
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: CancellationToken) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("replication scheduler cancelled");
                    break;
                }
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        match self.files.schedule_replication(self.batch_size).await {
            Ok(result) if result.total_items > 0 => {
                info!("queued {} replica(s) for replication", result.total_items)
            }
            Ok(_) => debug!("no pending replicas"),
            Err(err) => error!("Error scheduling replication: {}", err),
        }
    }
}
