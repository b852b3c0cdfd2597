//! Periodic machine status broadcaster.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{Envelope, SourceError, StatusSource};
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::HubError;
use crate::hub::HubHandle;
use crate::metrics::{STATUS_PUBLISH_FAILURES_TOTAL, STATUS_PUBLISH_TOTAL};

/// Result of one publisher tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// A snapshot with this many records was handed to the hub.
    Published {
        /// Records in the snapshot.
        records: usize,
    },
    /// The fetch failed or timed out; nothing was broadcast.
    Skipped(SourceError),
    /// The snapshot was fetched but could not be broadcast.
    Abandoned(HubError),
}

/// Fetches a fresh snapshot every `interval` and broadcasts it as a
/// `machine_status_update` envelope.
pub struct StatusPublisher {
    source: Arc<dyn StatusSource>,
    hub: HubHandle,
    interval: Duration,
}

impl StatusPublisher {
    /// Create a publisher. A zero interval is raised to one millisecond.
    pub fn new(source: Arc<dyn StatusSource>, hub: HubHandle, interval: Duration) -> Self {
        Self {
            source,
            hub,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// The tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch once and broadcast on success.
    ///
    /// A fetch still running after one interval is abandoned so ticks never
    /// overlap.
    pub async fn tick(&self) -> TickOutcome {
        let fetched = match tokio::time::timeout(self.interval, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(self.interval)),
        };

        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => {
                counter!(STATUS_PUBLISH_FAILURES_TOTAL, "kind" => e.error_kind()).increment(1);
                warn!(error = %e, kind = e.error_kind(), "status fetch failed, skipping tick");
                return TickOutcome::Skipped(e);
            }
        };

        let envelope = match Envelope::status_update(&snapshot) {
            Ok(envelope) => envelope,
            Err(e) => {
                counter!(STATUS_PUBLISH_FAILURES_TOTAL, "kind" => "encode").increment(1);
                warn!(error = %e, "failed to encode status snapshot");
                return TickOutcome::Abandoned(HubError::Encode(e));
            }
        };

        let records = snapshot.len();
        match self.hub.broadcast(&envelope).await {
            Ok(()) => {
                counter!(STATUS_PUBLISH_TOTAL).increment(1);
                debug!(records, "status snapshot broadcast");
                TickOutcome::Published { records }
            }
            Err(e) => {
                counter!(STATUS_PUBLISH_FAILURES_TOTAL, "kind" => "hub").increment(1);
                warn!(error = %e, "status broadcast failed");
                TickOutcome::Abandoned(e)
            }
        }
    }

    /// Run ticks until `cancel` fires. The first tick happens one interval
    /// after start.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = self.interval.as_millis(), "status publisher started");

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let outcome = tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            outcome = self.tick() => outcome,
                        };
                        if matches!(outcome, TickOutcome::Abandoned(HubError::Closed)) {
                            info!("hub stopped, status publisher exiting");
                            break;
                        }
                    }
                }
            }
            info!("status publisher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use async_trait::async_trait;
    use axum::extract::ws::Utf8Bytes;
    use beacon_core::{ClientId, MachineRecord, MachineStatus, StatusSnapshot};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Replays scripted results, then repeats the last one.
    struct Scripted {
        script: Mutex<VecDeque<Result<StatusSnapshot, SourceError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(script: Vec<Result<StatusSnapshot, SourceError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl StatusSource for Scripted {
        async fn fetch(&self) -> Result<StatusSnapshot, SourceError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    struct Stalled;

    #[async_trait]
    impl StatusSource for Stalled {
        async fn fetch(&self) -> Result<StatusSnapshot, SourceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(StatusSnapshot::default())
        }
    }

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot::new(vec![
            MachineRecord::new(1, "alpha", "10.0.0.1").with_status(MachineStatus::Online),
            MachineRecord::new(2, "beta", "10.0.0.2"),
        ])
    }

    async fn member(hub: &HubHandle) -> mpsc::Receiver<Utf8Bytes> {
        let (tx, rx) = mpsc::channel(16);
        let _ = hub.register(ClientId::from("watcher"), tx).await.unwrap();
        rx
    }

    #[tokio::test]
    async fn successful_tick_broadcasts_status_update() {
        let (hub, _task) = Hub::spawn(CancellationToken::new());
        let mut rx = member(&hub).await;
        let publisher = StatusPublisher::new(
            Scripted::new(vec![Ok(snapshot())]),
            hub.clone(),
            Duration::from_secs(5),
        );

        let outcome = publisher.tick().await;
        assert!(matches!(outcome, TickOutcome::Published { records: 2 }));

        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(value["type"], "machine_status_update");
        assert_eq!(value["message"], "Machine status updated");
        assert_eq!(value["data"][0]["name"], "alpha");
        assert_eq!(value["data"][1]["name"], "beta");
        assert!(value.get("user_id").is_none());
    }

    #[tokio::test]
    async fn failed_fetch_skips_without_broadcast() {
        let (hub, _task) = Hub::spawn(CancellationToken::new());
        let mut rx = member(&hub).await;
        let publisher = StatusPublisher::new(
            Scripted::new(vec![Err(SourceError::Unavailable("db down".into()))]),
            hub.clone(),
            Duration::from_secs(5),
        );

        let outcome = publisher.tick().await;
        assert!(matches!(outcome, TickOutcome::Skipped(SourceError::Unavailable(_))));

        let _ = hub.members().await.unwrap();
        assert!(rx.try_recv().is_err());
        assert!(hub.contains(&ClientId::from("watcher")).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let (hub, _task) = Hub::spawn(CancellationToken::new());
        let publisher = StatusPublisher::new(Arc::new(Stalled), hub, Duration::from_secs(5));

        let outcome = publisher.tick().await;
        assert!(matches!(
            outcome,
            TickOutcome::Skipped(SourceError::Timeout(d)) if d == Duration::from_secs(5)
        ));
    }

    #[tokio::test]
    async fn closed_hub_abandons_tick() {
        let cancel = CancellationToken::new();
        let (hub, task) = Hub::spawn(cancel.clone());
        cancel.cancel();
        task.await.unwrap();

        let publisher = StatusPublisher::new(
            Scripted::new(vec![Ok(snapshot())]),
            hub,
            Duration::from_secs(5),
        );
        assert!(matches!(
            publisher.tick().await,
            TickOutcome::Abandoned(HubError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_publisher_ticks_every_interval_and_recovers() {
        let (hub, _task) = Hub::spawn(CancellationToken::new());
        let mut rx = member(&hub).await;
        let source = Scripted::new(vec![
            Err(SourceError::Unavailable("first tick fails".into())),
            Ok(snapshot()),
        ]);
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();
        let task = StatusPublisher::new(source.clone(), hub.clone(), Duration::from_secs(5))
            .spawn(cancel.clone());

        // First tick at 5s fails; the second at 10s succeeds.
        let frame = rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(frame.as_str().contains("machine_status_update"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        let _ = rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(15));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_before_first_tick() {
        let (hub, _task) = Hub::spawn(CancellationToken::new());
        let source = Scripted::new(vec![Ok(snapshot())]);
        let cancel = CancellationToken::new();
        let task = StatusPublisher::new(source.clone(), hub, Duration::from_secs(60))
            .spawn(cancel.clone());

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
