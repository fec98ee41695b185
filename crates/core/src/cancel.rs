use std::future::{pending, Future};

use thiserror::Error;
use tokio::{
    sync::watch,
    time::{sleep_until, Duration, Instant},
};

/// Returned when work is abandoned because the caller cancelled it.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Cancellation handle combining a process shutdown flag with an optional deadline.
///
/// Cloning is cheap; every clone observes the same shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    shutdown: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A handle that is never cancelled.
    pub fn never() -> Self {
        Self::default()
    }

    /// Cancels once the sender publishes `true`.
    pub fn from_shutdown(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            shutdown: Some(shutdown),
            deadline: None,
        }
    }

    /// Adds a deadline; an earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        let shutdown = self
            .shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false);
        let expired = self
            .deadline
            .map(|deadline| deadline <= Instant::now())
            .unwrap_or(false);
        shutdown || expired
    }

    /// Resolves when the shutdown flag is raised or the deadline passes.
    pub async fn cancelled(&self) {
        let shutdown = async {
            let Some(mut rx) = self.shutdown.clone() else {
                return pending::<()>().await;
            };
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // sender gone without raising the flag
                    return pending::<()>().await;
                }
            }
        };
        let deadline = async {
            match self.deadline {
                Some(at) => sleep_until(at).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown => {}
            _ = deadline => {}
        }
    }

    /// Drives `future` to completion unless cancellation happens first.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            output = future => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn never_runs_future_to_completion() {
        let cancel = Cancellation::never();
        assert!(!cancel.is_cancelled());
        let value = cancel.run(async { 7 }).await.expect("not cancelled");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn shutdown_flag_cancels_pending_work() {
        let (tx, rx) = watch::channel(false);
        let cancel = Cancellation::from_shutdown(rx);

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { cancel.run(pending::<()>()).await }
        });
        tx.send(true).expect("receiver alive");

        let result = task.await.expect("task joins");
        assert_eq!(result, Err(Cancelled));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_slow_work() {
        let cancel = Cancellation::never().with_timeout(Duration::from_secs(1));
        let result = cancel
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(Cancelled));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn earlier_deadline_wins() {
        let now = Instant::now();
        let cancel = Cancellation::never()
            .with_deadline(now + Duration::from_secs(5))
            .with_deadline(now + Duration::from_secs(60));
        assert_eq!(cancel.deadline, Some(now + Duration::from_secs(5)));
    }
}
