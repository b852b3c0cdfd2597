//! Process lifecycle: one cancellation token for every long-running beacon
//! task, and a named drain of those tasks when the process stops.
//!
//! The hub, the status publisher and the HTTP serve loop each register their
//! `JoinHandle` under a name. [`ShutdownCoordinator::graceful_shutdown`]
//! cancels the token, waits for all of them against one shared deadline and
//! reports which ones stopped, failed or had to be aborted.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long tracked tasks get to stop before they are aborted.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the shutdown token and the tasks that must stop with it.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    timeout: Duration,
}

/// What happened to each tracked task during [`ShutdownCoordinator::graceful_shutdown`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Finished on their own after cancellation.
    pub stopped: Vec<&'static str>,
    /// Panicked or were cancelled by the runtime.
    pub failed: Vec<&'static str>,
    /// Still running at the deadline; aborted.
    pub timed_out: Vec<&'static str>,
}

impl ShutdownReport {
    /// Every task stopped on its own.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

enum TaskEnd {
    Stopped,
    Failed,
    TimedOut,
}

impl ShutdownCoordinator {
    /// Coordinator with the default 10 s drain deadline.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Coordinator with a custom drain deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            timeout,
        }
    }

    /// A clone of the shutdown token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a task to be drained on shutdown.
    pub fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        debug!(task = name, "tracking task for shutdown");
        self.tasks.lock().push((name, handle));
    }

    /// Cancel the token without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Cancel the token, then wait for every tracked task until the deadline.
    ///
    /// Tasks still running at the deadline are aborted. The tracked set is
    /// emptied, so a second call only cancels.
    pub async fn graceful_shutdown(&self) -> ShutdownReport {
        self.shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        info!(
            tasks = ?tasks.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            timeout_secs = self.timeout.as_secs(),
            "waiting for tasks to stop"
        );

        let deadline = tokio::time::Instant::now() + self.timeout;
        let ends = futures::future::join_all(
            tasks
                .into_iter()
                .map(|(name, handle)| async move { (name, stop_task(name, handle, deadline).await) }),
        )
        .await;

        let mut report = ShutdownReport::default();
        for (name, end) in ends {
            match end {
                TaskEnd::Stopped => report.stopped.push(name),
                TaskEnd::Failed => report.failed.push(name),
                TaskEnd::TimedOut => report.timed_out.push(name),
            }
        }
        if report.is_clean() {
            info!(stopped = ?report.stopped, "all tasks stopped");
        } else {
            warn!(failed = ?report.failed, timed_out = ?report.timed_out, "shutdown incomplete");
        }
        report
    }
}

async fn stop_task(
    name: &'static str,
    mut handle: JoinHandle<()>,
    deadline: tokio::time::Instant,
) -> TaskEnd {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(())) => {
            debug!(task = name, "task stopped");
            TaskEnd::Stopped
        }
        Ok(Err(e)) => {
            warn!(task = name, error = %e, "task failed during shutdown");
            TaskEnd::Failed
        }
        Err(_) => {
            warn!(task = name, "task did not stop before the deadline, aborting");
            handle.abort();
            TaskEnd::TimedOut
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_named_tasks_in_order() {
        let coord = ShutdownCoordinator::new();
        for name in ["hub", "publisher", "server"] {
            let token = coord.token();
            coord.track(name, tokio::spawn(async move { token.cancelled().await }));
        }

        let report = coord.graceful_shutdown().await;
        assert!(report.is_clean());
        assert_eq!(report.stopped, vec!["hub", "publisher", "server"]);
        assert!(coord.token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_is_named_and_aborted() {
        let coord = ShutdownCoordinator::with_timeout(Duration::from_millis(100));
        let token = coord.token();
        coord.track("hub", tokio::spawn(async move { token.cancelled().await }));
        coord.track(
            "publisher",
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(300)).await;
            }),
        );

        let report = coord.graceful_shutdown().await;
        assert!(!report.is_clean());
        assert_eq!(report.stopped, vec!["hub"]);
        assert_eq!(report.timed_out, vec!["publisher"]);
    }

    #[tokio::test]
    async fn panicked_task_is_reported_failed() {
        let coord = ShutdownCoordinator::new();
        coord.track(
            "server",
            tokio::spawn(async {
                panic!("serve loop crashed");
            }),
        );

        let report = coord.graceful_shutdown().await;
        assert_eq!(report.failed, vec!["server"]);
        assert!(report.stopped.is_empty());
    }

    #[tokio::test]
    async fn second_shutdown_has_nothing_to_drain() {
        let coord = ShutdownCoordinator::default();
        let token = coord.token();
        coord.track("hub", tokio::spawn(async move { token.cancelled().await }));

        assert_eq!(coord.graceful_shutdown().await.stopped, vec!["hub"]);
        assert_eq!(coord.graceful_shutdown().await, ShutdownReport::default());
    }
}
