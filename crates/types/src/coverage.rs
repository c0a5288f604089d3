// crates/types/src/coverage.rs
//! Coverage telemetry records and the `get_coverage` payload parser.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{json_kind, PayloadError};
use crate::time::SampleTime;

/// One coverage sample for one reference sequence at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageRecord {
    pub timestamp: SampleTime,
    pub reference: String,
    /// Average read depth across the reference (reads per position).
    pub depth: f64,
    /// Percentage of reference positions covered by at least one read.
    pub breadth: f64,
    pub read_count: u64,
}

/// Shape of one record as the server sends it.
#[derive(Debug, Deserialize)]
struct CoverageRecordPayload {
    timestamp: String,
    reference: String,
    avg_depth: f64,
    breadth: f64,
    read_count: u64,
}

impl TryFrom<CoverageRecordPayload> for CoverageRecord {
    type Error = PayloadError;

    fn try_from(p: CoverageRecordPayload) -> Result<Self, Self::Error> {
        let timestamp = SampleTime::parse(p.timestamp)?;
        if !p.avg_depth.is_finite() {
            return Err(PayloadError::NonFinite {
                field: "avg_depth",
                reference: p.reference,
            });
        }
        if !p.breadth.is_finite() {
            return Err(PayloadError::NonFinite {
                field: "breadth",
                reference: p.reference,
            });
        }
        Ok(Self {
            timestamp,
            reference: p.reference,
            depth: p.avg_depth,
            breadth: p.breadth,
            read_count: p.read_count,
        })
    }
}

/// A full coverage snapshot for one session, as returned by one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageSnapshot {
    pub records: Vec<CoverageRecord>,
    /// Records dropped because they failed validation.
    pub skipped: usize,
}

/// Convert a `get_coverage` response body into typed records.
///
/// Individual malformed records are skipped and counted; only a body that is
/// not a record array at all is an error.
pub fn parse_coverage_payload(body: Value) -> Result<CoverageSnapshot, PayloadError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            if let Some(err) = map.remove("error") {
                return Err(PayloadError::ServerReported(match err {
                    Value::String(s) => s,
                    other => other.to_string(),
                }));
            }
            return Err(PayloadError::UnexpectedShape {
                expected: "array of coverage records",
                found: "object",
            });
        }
        other => {
            return Err(PayloadError::UnexpectedShape {
                expected: "array of coverage records",
                found: json_kind(&other),
            })
        }
    };

    let mut snapshot = CoverageSnapshot {
        records: Vec::with_capacity(items.len()),
        skipped: 0,
    };
    for (position, item) in items.into_iter().enumerate() {
        let parsed = serde_json::from_value::<CoverageRecordPayload>(item)
            .map_err(|e| PayloadError::malformed("coverage record", e))
            .and_then(CoverageRecord::try_from);
        match parsed {
            Ok(record) => snapshot.records.push(record),
            Err(e) => {
                tracing::warn!(position, error = %e, "skipping coverage record");
                snapshot.skipped += 1;
            }
        }
    }
    Ok(snapshot)
}
