// crates/client/src/poller.rs
//! Periodic pull of coverage, session metadata and store readiness.
//!
//! Each cycle fires the three requests concurrently and tags their results
//! with the cycle's sequence number. Results are sent as they resolve, so a
//! slow request from an old cycle can arrive after a newer one; consumers
//! drop any result older than the last one they applied for that kind.

use std::sync::Arc;
use std::time::Duration;

use nanocas_view_types::{CoverageSnapshot, Session};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{AnalysisApi, ApiError};

/// Shortest accepted poll interval; a zero interval would never yield.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One resolved request of a poll cycle.
#[derive(Debug)]
pub enum PollUpdate {
    Coverage {
        seq: u64,
        result: Result<CoverageSnapshot, ApiError>,
    },
    Metadata {
        seq: u64,
        result: Result<Session, ApiError>,
    },
    Readiness {
        seq: u64,
        result: Result<bool, ApiError>,
    },
}

impl PollUpdate {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Coverage { seq, .. } | Self::Metadata { seq, .. } | Self::Readiness { seq, .. } => {
                *seq
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            Self::Coverage { result, .. } => result.is_ok(),
            Self::Metadata { result, .. } => result.is_ok(),
            Self::Readiness { result, .. } => result.is_ok(),
        }
    }
}

#[derive(Clone)]
pub struct SessionPoller {
    api: Arc<dyn AnalysisApi>,
    interval: Duration,
}

impl SessionPoller {
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn new(api: Arc<dyn AnalysisApi>, interval: Duration) -> Self {
        if interval < MIN_POLL_INTERVAL {
            warn!(?interval, "poll interval too short, using {MIN_POLL_INTERVAL:?}");
        }
        Self {
            api,
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Start polling `project_id`. The first cycle runs immediately.
    pub fn start(
        &self,
        project_id: impl Into<String>,
        updates: mpsc::UnboundedSender<PollUpdate>,
    ) -> PollerHandle {
        let project_id = project_id.into();
        let cancel = CancellationToken::new();
        let refresh = Arc::new(Notify::new());

        let task = tokio::spawn(run_poller(
            Arc::clone(&self.api),
            project_id,
            self.interval,
            updates,
            cancel.clone(),
            Arc::clone(&refresh),
        ));

        PollerHandle {
            cancel,
            refresh,
            task,
        }
    }
}

/// Owner of a running poller. Dropping it stops the poller.
pub struct PollerHandle {
    cancel: CancellationToken,
    refresh: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Run a cycle now instead of waiting for the next tick.
    pub fn refresh_now(&self) {
        self.refresh.notify_one();
    }

    /// Trigger usable from other tasks.
    pub fn refresh_trigger(&self) -> RefreshTrigger {
        RefreshTrigger(Arc::clone(&self.refresh))
    }

    /// Cancel the loop and every in-flight request. No update is sent
    /// after this returns.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the loop task to exit.
    pub async fn join(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone)]
pub struct RefreshTrigger(Arc<Notify>);

impl RefreshTrigger {
    pub fn fire(&self) {
        self.0.notify_one();
    }
}

async fn run_poller(
    api: Arc<dyn AnalysisApi>,
    project_id: String,
    interval: Duration,
    updates: mpsc::UnboundedSender<PollUpdate>,
    cancel: CancellationToken,
    refresh: Arc<Notify>,
) {
    info!(%project_id, interval_ms = interval.as_millis() as u64, "session poller started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = refresh.notified() => {
                debug!(%project_id, "poll refresh requested");
                ticker.reset();
            }
        }

        seq += 1;
        spawn_cycle(&api, &project_id, seq, &updates, &cancel);
    }

    info!(%project_id, cycles = seq, "session poller stopped");
}

fn spawn_cycle(
    api: &Arc<dyn AnalysisApi>,
    project_id: &str,
    seq: u64,
    updates: &mpsc::UnboundedSender<PollUpdate>,
    cancel: &CancellationToken,
) {
    debug!(project_id, seq, "poll cycle");

    let (a, id) = (Arc::clone(api), project_id.to_owned());
    spawn_request(cancel, updates, async move {
        PollUpdate::Coverage {
            seq,
            result: a.coverage(&id).await,
        }
    });

    let (a, id) = (Arc::clone(api), project_id.to_owned());
    spawn_request(cancel, updates, async move {
        PollUpdate::Metadata {
            seq,
            result: a.analysis_info(&id).await,
        }
    });

    let (a, id) = (Arc::clone(api), project_id.to_owned());
    spawn_request(cancel, updates, async move {
        PollUpdate::Readiness {
            seq,
            result: a.database_status(&id).await,
        }
    });
}

fn spawn_request<F>(
    cancel: &CancellationToken,
    updates: &mpsc::UnboundedSender<PollUpdate>,
    request: F,
) where
    F: std::future::Future<Output = PollUpdate> + Send + 'static,
{
    let cancel = cancel.clone();
    let updates = updates.clone();
    tokio::spawn(async move {
        let update = tokio::select! {
            _ = cancel.cancelled() => return,
            update = request => update,
        };
        if cancel.is_cancelled() {
            return;
        }
        let _ = updates.send(update);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingApi {
        calls: AtomicUsize,
        coverage_delay: Option<Duration>,
    }

    #[async_trait]
    impl AnalysisApi for CountingApi {
        async fn coverage(&self, _project_id: &str) -> Result<CoverageSnapshot, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.coverage_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(CoverageSnapshot::default())
        }

        async fn analysis_info(&self, _project_id: &str) -> Result<Session, ApiError> {
            Err(ApiError::Http {
                endpoint: "get_analysis_info",
                status: 404,
                message: None,
            })
        }

        async fn database_status(&self, _project_id: &str) -> Result<bool, ApiError> {
            Ok(true)
        }
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<PollUpdate>, n: usize) -> Vec<PollUpdate> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(rx.recv().await.unwrap());
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_is_immediate() {
        let api = Arc::new(CountingApi::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = SessionPoller::new(api, Duration::from_secs(10)).start("p1", tx);

        let updates = drain(&mut rx, 3).await;
        assert!(updates.iter().all(|u| u.seq() == 1));
        assert!(updates
            .iter()
            .any(|u| matches!(u, PollUpdate::Coverage { result: Ok(_), .. })));
        assert!(updates
            .iter()
            .any(|u| matches!(u, PollUpdate::Metadata { result: Err(_), .. })));
        assert!(updates
            .iter()
            .any(|u| matches!(u, PollUpdate::Readiness { result: Ok(true), .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let api = Arc::new(CountingApi::default());
        let poller = SessionPoller::new(api, Duration::ZERO);
        assert_eq!(poller.interval, MIN_POLL_INTERVAL);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = poller.start("p1", tx);
        let updates = drain(&mut rx, 6).await;
        assert!(updates.iter().any(|u| u.seq() == 2));
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_follow_interval() {
        let api = Arc::new(CountingApi::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle =
            SessionPoller::new(api.clone(), Duration::from_secs(10)).start("p1", tx);

        drain(&mut rx, 3).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        let second = drain(&mut rx, 3).await;
        assert!(second.iter().all(|u| u.seq() == 2));
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_runs_a_cycle_early() {
        let api = Arc::new(CountingApi::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = SessionPoller::new(api.clone(), Duration::from_secs(10)).start("p1", tx);

        drain(&mut rx, 3).await;
        let before = tokio::time::Instant::now();
        handle.refresh_now();
        let refreshed = drain(&mut rx, 3).await;
        assert!(refreshed.iter().all(|u| u.seq() == 2));
        assert!(before.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_silences_in_flight_requests() {
        let api = Arc::new(CountingApi {
            coverage_delay: Some(Duration::from_secs(3)),
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = SessionPoller::new(api.clone(), Duration::from_secs(10)).start("p1", tx);

        // Metadata and readiness resolve at once; coverage is still sleeping.
        drain(&mut rx, 2).await;
        handle.stop();
        assert!(handle.is_stopped());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_polling() {
        let api = Arc::new(CountingApi::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = SessionPoller::new(api.clone(), Duration::from_secs(10)).start("p1", tx);
        drain(&mut rx, 3).await;
        drop(handle);

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }
}
