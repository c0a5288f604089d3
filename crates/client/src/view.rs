// crates/client/src/view.rs
//! Per-session view controller.
//!
//! A [`SessionView`] owns everything one mounted session needs: its channel
//! subscriptions, its poller, and an actor task holding the listener state
//! machine, the coverage index, the error board and the derived chart
//! matrices. All mutation happens on the actor; readers get immutable
//! [`ViewSnapshot`]s through a `watch` channel.
//!
//! Dropping the view (or calling [`SessionView::dispose`]) unsubscribes its
//! handlers, stops its poller and ends the actor. Nothing it owned can
//! publish afterwards.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use nanocas_view_core::{
    build_chart_matrix, build_match_matrix, ChartMatrix, CoverageIndex, ErrorBoard, ErrorSource,
    ListenerMachine, ListenerState, ListenerStatus, Metric, TimeUnit, Transition, ViewError,
};
use nanocas_view_types::{names, InboundEvent, OutboundEvent, Session};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::AnalysisApi;
use crate::channel::{ChannelError, EventChannel, Subscription};
use crate::config::ClientConfig;
use crate::poller::{PollUpdate, PollerHandle, RefreshTrigger, SessionPoller};

/// Notifications a mounted view subscribes to.
const SESSION_EVENTS: [&str; 8] = [
    names::LISTENER_STATUS,
    names::LISTENER_STARTED,
    names::LISTENER_STOPPED,
    names::LISTENER_ERROR,
    names::LISTENER_ALREADY_RUNNING,
    names::LISTENER_NOT_RUNNING,
    names::COVERAGE_UPDATE,
    names::CONNECT_ERROR,
];

/// Everything a renderer needs, as of one moment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    pub project_id: String,
    pub session: Option<Session>,
    pub listener: ListenerState,
    pub status: ListenerStatus,
    pub can_start: bool,
    pub can_stop: bool,
    pub store_ready: Option<bool>,
    /// The single error to display, if any.
    pub error: Option<ViewError>,
    pub metric: Metric,
    pub unit: TimeUnit,
    pub references: Vec<String>,
    pub records: usize,
    pub coverage_chart: ChartMatrix,
    pub match_chart: ChartMatrix,
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Session metadata has not loaded yet")]
    SessionUnknown,

    #[error("The analysis database is not ready yet")]
    StoreNotReady,

    #[error("The listener cannot be {action} in its current state")]
    NotAllowed { action: &'static str },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("The session view has been disposed")]
    Disposed,
}

/// Where to navigate once a removal has been confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
}

enum ViewCommand {
    Start(oneshot::Sender<Result<(), ActionError>>),
    Stop(oneshot::Sender<Result<(), ActionError>>),
    SelectMetric(Metric),
    SelectUnit(TimeUnit),
    Report(ErrorSource, ViewError),
}

#[derive(Debug, Clone, Copy)]
struct RemovalTiming {
    timeout: Duration,
    redirect_delay: Duration,
}

pub struct SessionView {
    project_id: String,
    channel: EventChannel,
    commands: mpsc::UnboundedSender<ViewCommand>,
    snapshots: watch::Receiver<ViewSnapshot>,
    removal: RemovalTiming,
    redirect_path: String,
    poller: PollerHandle,
    actor: JoinHandle<()>,
    _subscriptions: Vec<Subscription>,
}

impl SessionView {
    /// Mount a view for `project_id`: subscribe, query listener status, and
    /// start polling.
    pub fn mount(
        project_id: impl Into<String>,
        channel: EventChannel,
        api: Arc<dyn AnalysisApi>,
        config: &ClientConfig,
    ) -> Self {
        let project_id = project_id.into();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let subscriptions = SESSION_EVENTS
            .iter()
            .map(|name| {
                let tx = event_tx.clone();
                let id = project_id.clone();
                channel.subscribe(name, move |event| {
                    if event.is_for(&id) || matches!(event, InboundEvent::ConnectError { .. }) {
                        let _ = tx.send(event.clone());
                    }
                })
            })
            .collect();

        let mut state = ViewState::new(&project_id);
        if let Err(e) = channel.emit(&state.listener.status_query()) {
            warn!(%project_id, "listener status query not sent: {e}");
            state.errors.record(ErrorSource::Channel, ViewError::Connectivity);
        }

        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let poller =
            SessionPoller::new(api, config.poll_interval).start(project_id.clone(), poll_tx);

        let (snapshot_tx, snapshots) = watch::channel(state.snapshot());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let actor = tokio::spawn(run_view(
            state,
            event_rx,
            poll_rx,
            command_rx,
            channel.clone(),
            poller.refresh_trigger(),
            snapshot_tx,
        ));

        info!(%project_id, "session view mounted");

        Self {
            project_id,
            channel,
            commands,
            snapshots,
            removal: RemovalTiming {
                timeout: config.removal_timeout,
                redirect_delay: config.redirect_delay,
            },
            redirect_path: config.redirect_path.clone(),
            poller,
            actor,
            _subscriptions: subscriptions,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<ViewSnapshot> {
        self.snapshots.clone()
    }

    pub async fn start_listener(&self) -> Result<(), ActionError> {
        self.request(ViewCommand::Start).await
    }

    pub async fn stop_listener(&self) -> Result<(), ActionError> {
        self.request(ViewCommand::Stop).await
    }

    pub fn select_metric(&self, metric: Metric) {
        let _ = self.commands.send(ViewCommand::SelectMetric(metric));
    }

    pub fn select_unit(&self, unit: TimeUnit) {
        let _ = self.commands.send(ViewCommand::SelectUnit(unit));
    }

    /// Ask before removing. Nothing is sent until the prompt is confirmed.
    pub fn request_removal(&self) -> RemovalPrompt<'_> {
        RemovalPrompt { view: self }
    }

    /// Tear the view down now.
    pub fn dispose(self) {
        drop(self);
    }

    async fn request(
        &self,
        command: fn(oneshot::Sender<Result<(), ActionError>>) -> ViewCommand,
    ) -> Result<(), ActionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| ActionError::Disposed)?;
        rx.await.map_err(|_| ActionError::Disposed)?
    }

    fn report(&self, error: ViewError) -> ViewError {
        let _ = self
            .commands
            .send(ViewCommand::Report(ErrorSource::Removal, error.clone()));
        error
    }

    async fn remove(&self) -> Result<Redirect, ViewError> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        // `analysis_removed` names no session; the first one after our
        // request is taken as its answer.
        let removed = self.channel.subscribe(names::ANALYSIS_REMOVED, move |event| {
            if let InboundEvent::AnalysisRemoved { success, message } = event {
                let waiter = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(waiter) = waiter {
                    let _ = waiter.send((*success, message.clone()));
                }
            }
        });

        let request = OutboundEvent::RemoveAnalysis {
            project_id: self.project_id.clone(),
        };
        if let Err(e) = self.channel.emit(&request) {
            warn!(project_id = %self.project_id, "removal request not sent: {e}");
            return Err(self.report(ViewError::Connectivity));
        }
        info!(project_id = %self.project_id, "removal requested");

        let outcome = tokio::time::timeout(self.removal.timeout, rx).await;
        drop(removed);

        match outcome {
            Ok(Ok((true, _))) => {
                info!(project_id = %self.project_id, "analysis removed");
                self.poller.stop();
                tokio::time::sleep(self.removal.redirect_delay).await;
                Ok(Redirect {
                    path: self.redirect_path.clone(),
                })
            }
            Ok(Ok((false, message))) => {
                warn!(project_id = %self.project_id, %message, "server refused removal");
                Err(self.report(ViewError::RemovalFailed(message)))
            }
            Ok(Err(_)) | Err(_) => {
                warn!(project_id = %self.project_id, "removal not confirmed in time");
                Err(self.report(ViewError::RemovalUnconfirmed))
            }
        }
    }
}

impl Drop for SessionView {
    fn drop(&mut self) {
        self.poller.stop();
        self.actor.abort();
        debug!(project_id = %self.project_id, "session view disposed");
    }
}

/// Pending removal. Confirm to send it, cancel (or drop) to send nothing.
#[must_use = "a removal prompt does nothing until confirmed"]
pub struct RemovalPrompt<'a> {
    view: &'a SessionView,
}

impl RemovalPrompt<'_> {
    /// Send the removal and wait for the server's answer. On success the
    /// redirect is returned after the configured delay.
    pub async fn confirm(self) -> Result<Redirect, ViewError> {
        self.view.remove().await
    }

    pub fn cancel(self) {
        debug!(project_id = %self.view.project_id, "removal cancelled");
    }
}

// ============================================================================
// Actor
// ============================================================================

async fn run_view(
    mut state: ViewState,
    mut events: mpsc::UnboundedReceiver<InboundEvent>,
    mut polls: mpsc::UnboundedReceiver<PollUpdate>,
    mut commands: mpsc::UnboundedReceiver<ViewCommand>,
    channel: EventChannel,
    refresh: RefreshTrigger,
    snapshots: watch::Sender<ViewSnapshot>,
) {
    loop {
        let changed = tokio::select! {
            Some(event) = events.recv() => {
                if let InboundEvent::CoverageUpdate { .. } = event {
                    debug!(project_id = %state.project_id, "coverage update pushed, polling now");
                    refresh.fire();
                    false
                } else {
                    state.apply_event(&event)
                }
            }
            Some(update) = polls.recv() => state.apply_poll(update),
            Some(command) = commands.recv() => state.handle_command(command, &channel),
            else => break,
        };
        if changed {
            snapshots.send_replace(state.snapshot());
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct AppliedSeqs {
    coverage: u64,
    metadata: u64,
    readiness: u64,
}

/// Pulls issued by every poll cycle: coverage, metadata, readiness.
const PULLS_PER_CYCLE: u8 = 3;

/// Outcome of the newest poll cycle seen so far.
#[derive(Debug, Default, Clone, Copy)]
struct CycleTally {
    seq: u64,
    /// Error board revision when the cycle's first result was applied.
    revision: u64,
    succeeded: u8,
    failed: bool,
}

impl CycleTally {
    /// Count one applied result. Returns true once every pull of cycle `seq`
    /// has succeeded. Results of older cycles are not counted.
    fn record(&mut self, seq: u64, ok: bool, revision: u64) -> bool {
        if seq < self.seq {
            return false;
        }
        if seq > self.seq {
            *self = Self {
                seq,
                revision,
                ..Self::default()
            };
        }
        if ok {
            self.succeeded += 1;
        } else {
            self.failed = true;
        }
        !self.failed && self.succeeded == PULLS_PER_CYCLE
    }
}

/// Accept `seq` unless a newer result of the same kind was already applied.
fn advance(last: &mut u64, seq: u64) -> bool {
    if seq < *last {
        return false;
    }
    *last = seq;
    true
}

struct ViewState {
    project_id: String,
    session: Option<Session>,
    listener: ListenerMachine,
    errors: ErrorBoard,
    index: CoverageIndex,
    metric: Metric,
    unit: TimeUnit,
    threshold: Option<f64>,
    coverage_chart: ChartMatrix,
    match_chart: ChartMatrix,
    applied: AppliedSeqs,
    cycle: CycleTally,
}

impl ViewState {
    fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_owned(),
            session: None,
            listener: ListenerMachine::new(project_id),
            errors: ErrorBoard::default(),
            index: CoverageIndex::default(),
            metric: Metric::default(),
            unit: TimeUnit::default(),
            threshold: None,
            coverage_chart: ChartMatrix::default(),
            match_chart: ChartMatrix::default(),
            applied: AppliedSeqs::default(),
            cycle: CycleTally::default(),
        }
    }

    fn rebuild_coverage_chart(&mut self) {
        self.coverage_chart =
            build_chart_matrix(&self.index, self.metric, self.unit, self.threshold);
    }

    fn apply_event(&mut self, event: &InboundEvent) -> bool {
        if let InboundEvent::ConnectError { message } = event {
            warn!(project_id = %self.project_id, %message, "event channel unavailable");
            self.errors.record(ErrorSource::Channel, ViewError::Connectivity);
            return true;
        }

        let transition = self.listener.apply(event);
        if transition == Transition::Ignored {
            return false;
        }
        // A listener notification for us proves the channel is alive.
        let cleared = self.errors.clear(ErrorSource::Channel);
        if let Transition::Changed { from, to } = &transition {
            if matches!(to, ListenerState::Error(_)) {
                self.errors.note_listener_error();
            }
            info!(
                project_id = %self.project_id,
                event = event.name(),
                ?from,
                ?to,
                "listener state changed"
            );
        }
        transition.is_changed() || cleared
    }

    fn apply_poll(&mut self, update: PollUpdate) -> bool {
        let (seq, ok) = (update.seq(), update.is_ok());
        let revision = self.errors.revision();
        if !self.apply_pull(update) {
            return false;
        }
        // A fully successful cycle clears whatever error was showing when it
        // began, including channel and removal errors.
        if self.cycle.record(seq, ok, revision) && self.errors.clear_through(self.cycle.revision) {
            debug!(project_id = %self.project_id, seq, "poll cycle succeeded, error cleared");
        }
        true
    }

    fn apply_pull(&mut self, update: PollUpdate) -> bool {
        match update {
            PollUpdate::Coverage { seq, result } => {
                if !advance(&mut self.applied.coverage, seq) {
                    debug!(project_id = %self.project_id, seq, "dropping stale coverage result");
                    return false;
                }
                match result {
                    Ok(snapshot) => {
                        self.index = CoverageIndex::build(snapshot.records);
                        self.errors.clear(ErrorSource::Coverage);
                        self.rebuild_coverage_chart();
                    }
                    Err(e) => {
                        warn!(project_id = %self.project_id, seq, "coverage poll failed: {e}");
                        self.errors.record(ErrorSource::Coverage, e.to_view_error());
                    }
                }
                true
            }
            PollUpdate::Metadata { seq, result } => {
                if !advance(&mut self.applied.metadata, seq) {
                    debug!(project_id = %self.project_id, seq, "dropping stale metadata result");
                    return false;
                }
                match result {
                    Ok(session) => {
                        let threshold = session.depth_threshold();
                        self.match_chart = build_match_matrix(&session);
                        self.session = Some(session);
                        self.errors.clear(ErrorSource::Metadata);
                        if threshold != self.threshold {
                            self.threshold = threshold;
                            self.rebuild_coverage_chart();
                        }
                    }
                    Err(e) => {
                        warn!(project_id = %self.project_id, seq, "metadata poll failed: {e}");
                        self.errors.record(ErrorSource::Metadata, e.to_view_error());
                    }
                }
                true
            }
            PollUpdate::Readiness { seq, result } => {
                if !advance(&mut self.applied.readiness, seq) {
                    debug!(project_id = %self.project_id, seq, "dropping stale readiness result");
                    return false;
                }
                match result {
                    Ok(ready) => {
                        if self.listener.set_store_ready(ready) {
                            info!(project_id = %self.project_id, ready, "store readiness changed");
                        }
                        self.errors.clear(ErrorSource::Readiness);
                    }
                    Err(e) => {
                        warn!(project_id = %self.project_id, seq, "readiness poll failed: {e}");
                        self.errors.record(ErrorSource::Readiness, e.to_view_error());
                    }
                }
                true
            }
        }
    }

    fn handle_command(&mut self, command: ViewCommand, channel: &EventChannel) -> bool {
        match command {
            ViewCommand::Start(reply) => {
                let _ = reply.send(self.start(channel));
            }
            ViewCommand::Stop(reply) => {
                let _ = reply.send(self.stop(channel));
            }
            ViewCommand::SelectMetric(metric) => {
                if metric == self.metric {
                    return false;
                }
                self.metric = metric;
                self.rebuild_coverage_chart();
            }
            ViewCommand::SelectUnit(unit) => {
                if unit == self.unit {
                    return false;
                }
                self.unit = unit;
                self.rebuild_coverage_chart();
            }
            ViewCommand::Report(source, error) => self.errors.record(source, error),
        }
        true
    }

    fn start(&mut self, channel: &EventChannel) -> Result<(), ActionError> {
        if self.listener.store_ready() == Some(false) {
            return Err(ActionError::StoreNotReady);
        }
        let source_path = self
            .session
            .as_ref()
            .map(|s| s.source_path.clone())
            .ok_or(ActionError::SessionUnknown)?;
        let request = self
            .listener
            .request_start(&source_path)
            .ok_or(ActionError::NotAllowed { action: "started" })?;
        if let Err(e) = channel.emit(&request) {
            self.listener.abort_start();
            self.errors.record(ErrorSource::Channel, ViewError::Connectivity);
            return Err(e.into());
        }
        info!(project_id = %self.project_id, %source_path, "listener start requested");
        Ok(())
    }

    fn stop(&mut self, channel: &EventChannel) -> Result<(), ActionError> {
        let request = self
            .listener
            .request_stop()
            .ok_or(ActionError::NotAllowed { action: "stopped" })?;
        if let Err(e) = channel.emit(&request) {
            self.errors.record(ErrorSource::Channel, ViewError::Connectivity);
            return Err(e.into());
        }
        info!(project_id = %self.project_id, "listener stop requested");
        Ok(())
    }

    fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            project_id: self.project_id.clone(),
            session: self.session.clone(),
            listener: self.listener.state().clone(),
            status: self.listener.state().status(),
            can_start: self.session.is_some() && self.listener.can_start(),
            can_stop: self.listener.can_stop(),
            store_ready: self.listener.store_ready(),
            error: self.errors.displayed(&self.listener),
            metric: self.metric,
            unit: self.unit,
            references: self.index.references().into_iter().map(str::to_owned).collect(),
            records: self.index.len(),
            coverage_chart: self.coverage_chart.clone(),
            match_chart: self.match_chart.clone(),
        }
    }
}
