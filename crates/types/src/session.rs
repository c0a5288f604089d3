// crates/types/src/session.rs
//! Session metadata as served by `get_analysis_info`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::PayloadError;

/// Status code the server uses for "fresh data available".
pub const ANALYSIS_INFO_OK: u16 = 200;

/// Input file type the listener ingests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "UPPERCASE")]
pub enum FileType {
    #[default]
    Fastq,
    Bam,
}

/// A sequence the session is monitoring, with its alert threshold.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
pub struct MonitoredQuery {
    pub name: String,
    /// FASTA header the coverage reference is keyed by, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Threshold as entered during setup; not guaranteed to be numeric.
    pub threshold: String,
    pub current_value: f64,
}

/// Wire form of a query. Setup writes `current_breadth` and the running
/// analysis later adds `current_value`, so a config may carry both.
#[derive(Deserialize)]
struct QueryPayload {
    name: String,
    #[serde(default)]
    header: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    threshold: String,
    #[serde(default, deserialize_with = "optional_number")]
    current_value: Option<f64>,
    #[serde(default, deserialize_with = "optional_number")]
    current_breadth: Option<f64>,
}

impl<'de> Deserialize<'de> for MonitoredQuery {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = QueryPayload::deserialize(d)?;
        Ok(Self {
            name: raw.name,
            header: raw.header,
            threshold: raw.threshold,
            current_value: raw.current_value.or(raw.current_breadth).unwrap_or(0.0),
        })
    }
}

impl MonitoredQuery {
    /// The threshold as a number, if it parses to a finite value.
    pub fn threshold_value(&self) -> Option<f64> {
        self.threshold
            .trim()
            .trim_end_matches(['%', 'x', 'X'])
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }
}

/// One monitored analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub project_id: String,
    /// Directory the sequencer writes output into.
    #[serde(rename = "minion")]
    pub source_path: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub device: Option<String>,
    #[serde(default)]
    pub file_type: FileType,
    #[serde(default)]
    pub queries: Vec<MonitoredQuery>,
}

impl Session {
    /// Lowest parseable query threshold: the first level at which any alert fires.
    pub fn depth_threshold(&self) -> Option<f64> {
        self.queries
            .iter()
            .filter_map(MonitoredQuery::threshold_value)
            .reduce(f64::min)
    }
}

/// Raw `get_analysis_info` envelope.
#[derive(Debug, Deserialize)]
pub struct AnalysisInfoPayload {
    pub status: u16,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AnalysisInfoPayload {
    pub fn into_session(self) -> Result<Session, PayloadError> {
        if self.status != ANALYSIS_INFO_OK {
            return Err(PayloadError::Status {
                status: self.status,
                message: self.message,
            });
        }
        let data = self.data.ok_or_else(|| PayloadError::Malformed {
            what: "analysis info",
            message: "status 200 without data".into(),
        })?;
        serde_json::from_value(data).map_err(|e| PayloadError::malformed("analysis info", e))
    }
}

/// Parse a `get_analysis_info` response body straight into a [`Session`].
pub fn parse_analysis_info(body: Value) -> Result<Session, PayloadError> {
    let payload: AnalysisInfoPayload =
        serde_json::from_value(body).map_err(|e| PayloadError::malformed("analysis info", e))?;
    payload.into_session()
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn optional_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite()))
}

fn empty_as_none<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(d)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
