// crates/core/src/error.rs
use serde::Serialize;
use thiserror::Error;

use crate::listener::ListenerMachine;

/// Errors as presented to the user of a session view.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ViewError {
    /// The server could not be reached at all.
    #[error("Failed to connect to the server")]
    Connectivity,

    /// The server reported a structured error; shown verbatim.
    #[error("{0}")]
    Server(String),

    /// The server failed without saying why.
    #[error("An error occurred")]
    Unexpected,

    /// The listener process reported a runtime error; shown verbatim.
    #[error("{0}")]
    Listener(String),

    /// Advisory: the backing store is not initialized yet.
    #[error("The analysis database is not ready yet. The file listener can be started once it has been built.")]
    StoreNotReady,

    #[error("Removal failed: {0}")]
    RemovalFailed(String),

    #[error("The server did not confirm the removal")]
    RemovalUnconfirmed,
}

impl ViewError {
    /// Advisories are displayed like errors but are not failures.
    pub fn is_advisory(&self) -> bool {
        matches!(self, ViewError::StoreNotReady)
    }
}

/// Which pull or action produced the retained error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    /// The shared event channel (connect errors, failed emissions).
    Channel,
    Coverage,
    Metadata,
    Readiness,
    Removal,
}

#[derive(Debug, Clone)]
struct Retained {
    source: ErrorSource,
    error: ViewError,
    revision: u64,
}

/// Holds only the single latest error; never accumulates.
///
/// Every recorded error gets a revision number, so a caller can clear only
/// errors that were already on the board when some piece of work began.
#[derive(Debug, Clone, Default)]
pub struct ErrorBoard {
    latest: Option<Retained>,
    revision: u64,
    listener_revision: u64,
}

impl ErrorBoard {
    pub fn record(&mut self, source: ErrorSource, error: ViewError) {
        self.revision += 1;
        self.latest = Some(Retained {
            source,
            error,
            revision: self.revision,
        });
    }

    /// Note that the listener just entered its error state, so the two can
    /// be ranked by recency.
    pub fn note_listener_error(&mut self) {
        self.revision += 1;
        self.listener_revision = self.revision;
    }

    /// Revision of the most recent record or listener error.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// A success from `source` clears the retained error only if `source`
    /// produced it.
    pub fn clear(&mut self, source: ErrorSource) -> bool {
        if matches!(&self.latest, Some(r) if r.source == source) {
            self.latest = None;
            return true;
        }
        false
    }

    /// Clear the retained error, whatever its source, if it was recorded at
    /// or before `revision`.
    pub fn clear_through(&mut self, revision: u64) -> bool {
        if matches!(&self.latest, Some(r) if r.revision <= revision) {
            self.latest = None;
            return true;
        }
        false
    }

    pub fn latest(&self) -> Option<&ViewError> {
        self.latest.as_ref().map(|r| &r.error)
    }

    /// The one error to display.
    ///
    /// The not-ready advisory wins, so a transport failure never masks the
    /// advisory that explains it. Otherwise the newer of the listener's
    /// runtime error and the latest pull/action error is shown.
    pub fn displayed(&self, listener: &ListenerMachine) -> Option<ViewError> {
        if listener.store_ready() == Some(false) {
            return Some(ViewError::StoreNotReady);
        }
        match (listener.error(), &self.latest) {
            (Some(_), Some(r)) if r.revision > self.listener_revision => Some(r.error.clone()),
            (Some(message), _) => Some(ViewError::Listener(message.to_owned())),
            (None, latest) => latest.as_ref().map(|r| r.error.clone()),
        }
    }
}
