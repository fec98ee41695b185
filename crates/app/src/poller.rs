use std::{sync::Arc, time::Duration};

use domain_intake_core::Cancellation;
use domain_intake_dns::HostLookup;
use domain_intake_telegram::{BotApiClient, GetUpdatesParams};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::handler::UpdateHandler;

/// Server-side long-poll timeout passed to `getUpdates`.
pub const LONG_POLL_SECS: u32 = 25;
/// Upper bound for one submission, including every DNS retry.
pub const SUBMISSION_DEADLINE: Duration = Duration::from_secs(60);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Long-polls the Bot API and hands every update to its own task.
pub struct Poller<L> {
    bot: BotApiClient,
    handler: Arc<UpdateHandler<L>>,
    shutdown: Cancellation,
    offset: Option<i64>,
}

impl<L> Poller<L>
where
    L: HostLookup + 'static,
{
    pub fn new(bot: BotApiClient, handler: Arc<UpdateHandler<L>>, shutdown: Cancellation) -> Self {
        Self {
            bot,
            handler,
            shutdown,
            offset: None,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Polls until shutdown, then waits for in-flight submissions to settle.
    pub async fn run(mut self) {
        let mut tasks = JoinSet::new();
        info!(stage = "telegram", "polling for updates");

        loop {
            let params = GetUpdatesParams::messages(self.offset, LONG_POLL_SECS);
            let polled = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                polled = self.bot.get_updates(&params) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        self.offset = Some(update.update_id + 1);
                        let handler = Arc::clone(&self.handler);
                        let cancel = self.shutdown.clone().with_timeout(SUBMISSION_DEADLINE);
                        tasks.spawn(async move { handler.handle(&update, &cancel).await });
                    }
                }
                Err(err) => {
                    error!(stage = "telegram", error = %err, "failed to fetch updates");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(err) = joined {
                    warn!(stage = "telegram", error = %err, "update task failed");
                }
            }
        }

        info!(stage = "telegram", in_flight = tasks.len(), "polling stopped");
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(stage = "telegram", error = %err, "update task failed");
            }
        }
    }
}
