// crates/core/src/listener.rs
//! Listener lifecycle state machine.
//!
//! The single arbiter between event-channel notifications and poll-driven
//! readiness updates. Every notification is filtered by project id before it
//! can touch state, since the channel is shared by all mounted views.

use serde::Serialize;
use ts_rs::TS;
use tracing::debug;

use nanocas_view_types::{InboundEvent, OutboundEvent};

/// Fallback text when the server reports an error without a message.
const UNDESCRIBED_LISTENER_ERROR: &str = "The file listener reported an error";

/// Lifecycle of the background listener, as far as this client knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ListenerState {
    Stopped,
    /// Start requested, no confirmation yet.
    Pending,
    Running,
    Error(String),
}

/// The coarse status shown on the session badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "snake_case")]
pub enum ListenerStatus {
    Stopped,
    Running,
    Error,
}

impl ListenerState {
    pub fn status(&self) -> ListenerStatus {
        match self {
            ListenerState::Running => ListenerStatus::Running,
            ListenerState::Error(_) => ListenerStatus::Error,
            ListenerState::Stopped | ListenerState::Pending => ListenerStatus::Stopped,
        }
    }
}

/// Result of feeding one notification to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Addressed to another session, or not a listener notification.
    Ignored,
    /// Relevant, but the state was already what the event implies.
    Unchanged,
    Changed {
        from: ListenerState,
        to: ListenerState,
    },
}

impl Transition {
    pub fn is_changed(&self) -> bool {
        matches!(self, Transition::Changed { .. })
    }
}

/// Listener state for one session plus the orthogonal store-readiness flag.
#[derive(Debug, Clone)]
pub struct ListenerMachine {
    project_id: String,
    state: ListenerState,
    /// `None` until the first readiness pull resolves.
    store_ready: Option<bool>,
}

impl ListenerMachine {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            state: ListenerState::Stopped,
            store_ready: None,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn state(&self) -> &ListenerState {
        &self.state
    }

    /// Effective running flag; always false in the error state.
    pub fn is_running(&self) -> bool {
        self.state == ListenerState::Running
    }

    pub fn is_pending(&self) -> bool {
        self.state == ListenerState::Pending
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            ListenerState::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn store_ready(&self) -> Option<bool> {
        self.store_ready
    }

    /// The start action is offered only from a non-running state, and never
    /// while the backing store is known to be uninitialized.
    pub fn can_start(&self) -> bool {
        self.store_ready != Some(false)
            && matches!(self.state, ListenerState::Stopped | ListenerState::Error(_))
    }

    pub fn can_stop(&self) -> bool {
        self.is_running()
    }

    /// The status query issued once at mount to recover state after a reload.
    pub fn status_query(&self) -> OutboundEvent {
        OutboundEvent::CheckListener {
            project_id: self.project_id.clone(),
        }
    }

    /// Move to `Pending` and return the start request to emit, if allowed.
    pub fn request_start(&mut self, source_path: &str) -> Option<OutboundEvent> {
        if !self.can_start() {
            debug!(project_id = %self.project_id, state = ?self.state, store_ready = ?self.store_ready, "start refused");
            return None;
        }
        self.set(ListenerState::Pending);
        Some(OutboundEvent::StartListener {
            project_id: self.project_id.clone(),
            source_path: source_path.to_owned(),
        })
    }

    /// Undo `request_start` when the start request never left the client.
    pub fn abort_start(&mut self) -> bool {
        if self.is_pending() {
            self.set(ListenerState::Stopped);
            return true;
        }
        false
    }

    /// Return the stop request to emit. State changes only when the server
    /// confirms with a `stopped` notification.
    pub fn request_stop(&self) -> Option<OutboundEvent> {
        self.can_stop().then(|| OutboundEvent::StopListener {
            project_id: self.project_id.clone(),
        })
    }

    /// Record the latest readiness pull. Does not touch the listener state.
    pub fn set_store_ready(&mut self, ready: bool) -> bool {
        let changed = self.store_ready != Some(ready);
        self.store_ready = Some(ready);
        changed
    }

    /// Apply one channel notification.
    pub fn apply(&mut self, event: &InboundEvent) -> Transition {
        if !event.is_for(&self.project_id) {
            return Transition::Ignored;
        }
        let next = match event {
            InboundEvent::ListenerStarted { .. } | InboundEvent::ListenerAlreadyRunning { .. } => {
                ListenerState::Running
            }
            InboundEvent::ListenerStopped { .. } | InboundEvent::ListenerNotRunning { .. } => {
                ListenerState::Stopped
            }
            InboundEvent::ListenerError { error, .. } => {
                let message = if error.trim().is_empty() {
                    UNDESCRIBED_LISTENER_ERROR.to_owned()
                } else {
                    error.clone()
                };
                ListenerState::Error(message)
            }
            InboundEvent::ListenerStatus { is_running: true, .. } => ListenerState::Running,
            InboundEvent::ListenerStatus { is_running: false, .. } => match &self.state {
                ListenerState::Pending | ListenerState::Error(_) => return Transition::Unchanged,
                _ => ListenerState::Stopped,
            },
            _ => return Transition::Ignored,
        };
        if next == self.state {
            return Transition::Unchanged;
        }
        let from = self.set(next.clone());
        Transition::Changed { from, to: next }
    }

    fn set(&mut self, next: ListenerState) -> ListenerState {
        debug!(project_id = %self.project_id, from = ?self.state, to = ?next, "listener transition");
        std::mem::replace(&mut self.state, next)
    }
}
