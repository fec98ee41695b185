use std::time::Duration;

use domain_intake_core::Cancellation;
use domain_intake_storage::{is_sqlite_busy, CheckpointStats, Database};
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Background worker that checkpoints the WAL on a fixed cadence.
#[derive(Clone)]
pub struct CheckpointWorker {
    database: Database,
    interval: Duration,
}

impl CheckpointWorker {
    pub fn new(database: Database, interval: Duration) -> Self {
        Self { database, interval }
    }

    /// Runs the worker loop in the background until `shutdown` fires.
    pub fn spawn(self, shutdown: Cancellation) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop(shutdown).await;
        })
    }

    async fn run_loop(self, shutdown: Cancellation) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately; nothing has been written yet
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        error!(stage = "storage", error = %err, "WAL checkpoint failed");
                    }
                }
            }
        }
    }

    /// Executes one checkpoint. Lock contention is reported, not treated as failure.
    pub async fn run_once(&self) -> Result<Option<CheckpointStats>, MaintenanceError> {
        let start = std::time::Instant::now();

        match self.database.wal_checkpoint_truncate().await {
            Ok(stats) => {
                let duration = start.elapsed().as_secs_f64();
                histogram!("db_checkpoint_seconds").record(duration);
                if stats.busy {
                    counter!("db_busy_total", "op" => "checkpoint").increment(1);
                    warn!(
                        stage = "storage",
                        log_frames = stats.log_frames,
                        checkpointed_frames = stats.checkpointed_frames,
                        duration_secs = duration,
                        "WAL checkpoint could not complete"
                    );
                } else {
                    info!(
                        stage = "storage",
                        log_frames = stats.log_frames,
                        checkpointed_frames = stats.checkpointed_frames,
                        duration_secs = duration,
                        "WAL checkpoint completed"
                    );
                }
                Ok(Some(stats))
            }
            Err(err) if is_sqlite_busy(&err) => {
                counter!("db_busy_total", "op" => "checkpoint").increment(1);
                warn!(stage = "storage", error = %err, "WAL checkpoint hit busy timeout");
                Ok(None)
            }
            Err(source) => Err(MaintenanceError::Checkpoint { source }),
        }
    }
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("failed to run WAL checkpoint: {source}")]
    Checkpoint {
        #[source]
        source: sqlx::Error,
    },
}
