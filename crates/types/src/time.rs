// crates/types/src/time.rs
//! Sample timestamps.
//!
//! The server writes timestamps as naive UTC strings (`2024-05-01 13:37:00`).
//! Keys keep the raw string verbatim; ordering and elapsed-time arithmetic use
//! the parsed instant, so `9:00` never sorts after `10:00`.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PayloadError;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// A sample timestamp: the server's raw text plus its parsed instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleTime {
    raw: String,
    instant: NaiveDateTime,
}

impl SampleTime {
    pub fn parse(raw: impl Into<String>) -> Result<Self, PayloadError> {
        let raw = raw.into();
        match parse_instant(&raw) {
            Some(instant) => Ok(Self { raw, instant }),
            None => Err(PayloadError::InvalidTimestamp { raw }),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn instant(&self) -> NaiveDateTime {
        self.instant
    }

    /// Seconds elapsed from `origin` to `self`, negative if `self` is earlier.
    pub fn seconds_since(&self, origin: &SampleTime) -> f64 {
        let delta = self.instant - origin.instant;
        match delta.num_microseconds() {
            Some(us) => us as f64 / 1_000_000.0,
            None => delta.num_seconds() as f64,
        }
    }
}

fn parse_instant(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
}

impl Ord for SampleTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instant
            .cmp(&other.instant)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for SampleTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SampleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for SampleTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for SampleTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SampleTime::parse(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_format() {
        let t = SampleTime::parse("2024-05-01 13:37:00").unwrap();
        assert_eq!(t.raw(), "2024-05-01 13:37:00");
        assert_eq!(t.instant().to_string(), "2024-05-01 13:37:00");
    }

    #[test]
    fn test_parse_rfc3339_normalizes_to_utc() {
        let t = SampleTime::parse("2024-05-01T15:37:00+02:00").unwrap();
        assert_eq!(t.instant().to_string(), "2024-05-01 13:37:00");
        assert_eq!(t.raw(), "2024-05-01T15:37:00+02:00");
    }

    #[test]
    fn test_parse_fractional_seconds() {
        let a = SampleTime::parse("2024-05-01 13:37:00").unwrap();
        let b = SampleTime::parse("2024-05-01 13:37:00.500").unwrap();
        assert!((b.seconds_since(&a) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(
            SampleTime::parse("T1"),
            Err(PayloadError::InvalidTimestamp { raw: "T1".into() })
        );
        assert!(SampleTime::parse("").is_err());
    }

    #[test]
    fn test_ordering_is_chronological_not_lexicographic() {
        // String order and time order disagree across offsets.
        let later = SampleTime::parse("2024-05-01T10:00:00+00:00").unwrap();
        let earlier = SampleTime::parse("2024-05-01T11:00:00+02:00").unwrap();
        assert!(earlier < later);
        assert!(earlier.raw() > later.raw());
    }

    #[test]
    fn test_seconds_since() {
        let t0 = SampleTime::parse("2024-05-01 13:37:00").unwrap();
        let t1 = SampleTime::parse("2024-05-01 13:37:10").unwrap();
        assert_eq!(t1.seconds_since(&t0), 10.0);
        assert_eq!(t0.seconds_since(&t1), -10.0);
    }

    #[test]
    fn test_serde_roundtrip_keeps_raw() {
        let t: SampleTime = serde_json::from_str("\"2024-05-01T13:37:00\"").unwrap();
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"2024-05-01T13:37:00\"");
        assert!(serde_json::from_str::<SampleTime>("\"soon\"").is_err());
    }
}
