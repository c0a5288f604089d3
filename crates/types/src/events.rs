// crates/types/src/events.rs
//! Named notifications carried by the shared event channel.
//!
//! Inbound payloads are parsed into [`InboundEvent`] at the channel boundary;
//! outbound requests are built from [`OutboundEvent`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::PayloadError;

/// Wire names of every notification this client sends or understands.
pub mod names {
    pub const CHECK_LISTENER: &str = "check_fastq_file_listener";
    pub const START_LISTENER: &str = "start_fastq_file_listener";
    pub const STOP_LISTENER: &str = "stop_fastq_file_listener";
    pub const REMOVE_ANALYSIS: &str = "remove_analysis";
    pub const LOG: &str = "log";

    pub const LISTENER_STATUS: &str = "fastq_file_listener_status";
    pub const LISTENER_STARTED: &str = "fastq_file_listener_started";
    pub const LISTENER_STOPPED: &str = "fastq_file_listener_stopped";
    pub const LISTENER_ERROR: &str = "fastq_file_listener_error";
    pub const LISTENER_ALREADY_RUNNING: &str = "fastq_file_listener_already_running";
    pub const LISTENER_NOT_RUNNING: &str = "fastq_file_listener_not_running";
    pub const ANALYSIS_REMOVED: &str = "analysis_removed";
    pub const COVERAGE_UPDATE: &str = "coverage_update";
    pub const CONNECT_ERROR: &str = "connect_error";
}

/// Severity accepted by the server's `log` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Client-to-server notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    CheckListener {
        project_id: String,
    },
    StartListener {
        project_id: String,
        source_path: String,
    },
    StopListener {
        project_id: String,
    },
    RemoveAnalysis {
        project_id: String,
    },
    Log {
        message: String,
        level: LogLevel,
    },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CheckListener { .. } => names::CHECK_LISTENER,
            Self::StartListener { .. } => names::START_LISTENER,
            Self::StopListener { .. } => names::STOP_LISTENER,
            Self::RemoveAnalysis { .. } => names::REMOVE_ANALYSIS,
            Self::Log { .. } => names::LOG,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::CheckListener { project_id }
            | Self::StopListener { project_id }
            | Self::RemoveAnalysis { project_id } => json!({ "projectId": project_id }),
            Self::StartListener {
                project_id,
                source_path,
            } => json!({ "minion_location": source_path, "projectId": project_id }),
            Self::Log { message, level } => json!({ "message": message, "level": level }),
        }
    }
}

/// Server-to-client notifications, validated.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ListenerStatus { project_id: String, is_running: bool },
    ListenerStarted { project_id: String },
    ListenerStopped { project_id: String },
    ListenerError { project_id: String, error: String },
    ListenerAlreadyRunning { project_id: String },
    ListenerNotRunning { project_id: String },
    /// Acknowledgement of `remove_analysis`. Carries no project id.
    AnalysisRemoved { success: bool, message: String },
    /// Push hint that new coverage was recorded for a project.
    CoverageUpdate { project_id: String, timestamp: Option<String> },
    /// The channel could not reach the server.
    ConnectError { message: String },
    /// Any notification this client does not interpret.
    Other { name: String, payload: Value },
}

#[derive(Deserialize)]
struct ProjectPayload {
    #[serde(rename = "projectId")]
    project_id: String,
}

#[derive(Deserialize)]
struct StatusPayload {
    #[serde(rename = "projectId")]
    project_id: String,
    is_running: bool,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "projectId")]
    project_id: String,
    #[serde(default)]
    error: Value,
}

#[derive(Deserialize)]
struct RemovedPayload {
    success: bool,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct CoverageUpdatePayload {
    #[serde(rename = "projectId", default)]
    project_id: String,
    #[serde(default)]
    timestamp: Option<String>,
}

fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, PayloadError> {
    serde_json::from_value(payload).map_err(|e| PayloadError::malformed("event", e))
}

impl InboundEvent {
    /// Validate a named notification payload into a typed event.
    pub fn parse(name: &str, payload: Value) -> Result<Self, PayloadError> {
        Ok(match name {
            names::LISTENER_STATUS => {
                let p: StatusPayload = decode(payload)?;
                Self::ListenerStatus {
                    project_id: p.project_id,
                    is_running: p.is_running,
                }
            }
            names::LISTENER_STARTED => Self::ListenerStarted {
                project_id: decode::<ProjectPayload>(payload)?.project_id,
            },
            names::LISTENER_STOPPED => Self::ListenerStopped {
                project_id: decode::<ProjectPayload>(payload)?.project_id,
            },
            names::LISTENER_ALREADY_RUNNING => Self::ListenerAlreadyRunning {
                project_id: decode::<ProjectPayload>(payload)?.project_id,
            },
            names::LISTENER_NOT_RUNNING => Self::ListenerNotRunning {
                project_id: decode::<ProjectPayload>(payload)?.project_id,
            },
            names::LISTENER_ERROR => {
                let p: ErrorPayload = decode(payload)?;
                let error = match p.error {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                Self::ListenerError {
                    project_id: p.project_id,
                    error,
                }
            }
            names::ANALYSIS_REMOVED => {
                let p: RemovedPayload = decode(payload)?;
                Self::AnalysisRemoved {
                    success: p.success,
                    message: p.message,
                }
            }
            names::COVERAGE_UPDATE => {
                let p: CoverageUpdatePayload = decode(payload)?;
                Self::CoverageUpdate {
                    project_id: p.project_id,
                    timestamp: p.timestamp,
                }
            }
            names::CONNECT_ERROR => Self::ConnectError {
                message: match payload {
                    Value::String(s) => s,
                    Value::Object(ref map) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                        .unwrap_or_else(|| payload.to_string()),
                    other => other.to_string(),
                },
            },
            other => Self::Other {
                name: other.to_owned(),
                payload,
            },
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::ListenerStatus { .. } => names::LISTENER_STATUS,
            Self::ListenerStarted { .. } => names::LISTENER_STARTED,
            Self::ListenerStopped { .. } => names::LISTENER_STOPPED,
            Self::ListenerError { .. } => names::LISTENER_ERROR,
            Self::ListenerAlreadyRunning { .. } => names::LISTENER_ALREADY_RUNNING,
            Self::ListenerNotRunning { .. } => names::LISTENER_NOT_RUNNING,
            Self::AnalysisRemoved { .. } => names::ANALYSIS_REMOVED,
            Self::CoverageUpdate { .. } => names::COVERAGE_UPDATE,
            Self::ConnectError { .. } => names::CONNECT_ERROR,
            Self::Other { name, .. } => name,
        }
    }

    /// Project the notification concerns, if it names one.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::ListenerStatus { project_id, .. }
            | Self::ListenerStarted { project_id }
            | Self::ListenerStopped { project_id }
            | Self::ListenerError { project_id, .. }
            | Self::ListenerAlreadyRunning { project_id }
            | Self::ListenerNotRunning { project_id }
            | Self::CoverageUpdate { project_id, .. } => Some(project_id),
            Self::AnalysisRemoved { .. } | Self::ConnectError { .. } | Self::Other { .. } => None,
        }
    }

    /// True when this notification is addressed to `project_id`.
    pub fn is_for(&self, project_id: &str) -> bool {
        self.project_id() == Some(project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_payloads() {
        let start = OutboundEvent::StartListener {
            project_id: "p1".into(),
            source_path: "/data/run".into(),
        };
        assert_eq!(start.name(), "start_fastq_file_listener");
        assert_eq!(
            start.payload(),
            json!({"minion_location": "/data/run", "projectId": "p1"})
        );

        let log = OutboundEvent::Log {
            message: "hello".into(),
            level: LogLevel::Warning,
        };
        assert_eq!(log.payload(), json!({"message": "hello", "level": "WARNING"}));

        let remove = OutboundEvent::RemoveAnalysis { project_id: "p1".into() };
        assert_eq!(remove.name(), "remove_analysis");
        assert_eq!(remove.payload(), json!({"projectId": "p1"}));
    }

    #[test]
    fn test_parse_listener_events() {
        let status = InboundEvent::parse(
            names::LISTENER_STATUS,
            json!({"projectId": "p1", "is_running": true}),
        )
        .unwrap();
        assert_eq!(
            status,
            InboundEvent::ListenerStatus {
                project_id: "p1".into(),
                is_running: true
            }
        );
        assert!(status.is_for("p1"));
        assert!(!status.is_for("p2"));

        let err = InboundEvent::parse(
            names::LISTENER_ERROR,
            json!({"projectId": "p1", "error": "[Errno 2] No such file or directory"}),
        )
        .unwrap();
        assert_eq!(
            err,
            InboundEvent::ListenerError {
                project_id: "p1".into(),
                error: "[Errno 2] No such file or directory".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_missing_project_id() {
        let err = InboundEvent::parse(names::LISTENER_STARTED, json!({})).unwrap_err();
        assert!(matches!(err, PayloadError::Malformed { what: "event", .. }));
    }

    #[test]
    fn test_parse_removed_and_unknown() {
        let removed = InboundEvent::parse(
            names::ANALYSIS_REMOVED,
            json!({"success": false, "message": "Analysis not found"}),
        )
        .unwrap();
        assert_eq!(removed.project_id(), None);
        assert_eq!(
            removed,
            InboundEvent::AnalysisRemoved {
                success: false,
                message: "Analysis not found".into()
            }
        );

        let other = InboundEvent::parse("download_database_status", json!({"percent_done": 50})).unwrap();
        assert_eq!(other.name(), "download_database_status");
        assert_eq!(other.project_id(), None);
    }

    #[test]
    fn test_parse_connect_error_variants() {
        let a = InboundEvent::parse(names::CONNECT_ERROR, json!("refused")).unwrap();
        assert_eq!(a, InboundEvent::ConnectError { message: "refused".into() });
        let b = InboundEvent::parse(names::CONNECT_ERROR, json!({"message": "timeout"})).unwrap();
        assert_eq!(b, InboundEvent::ConnectError { message: "timeout".into() });
    }
}
