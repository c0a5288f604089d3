// crates/core/src/coverage_index.rs
//! Coverage index: O(1) lookup of a record by `(timestamp, reference)`.
//!
//! Rebuilt from scratch for every snapshot so it never mixes records from two
//! polls. Keys are the raw timestamp text and reference label, verbatim.

use std::collections::{BTreeSet, HashMap};

use nanocas_view_types::{CoverageRecord, SampleTime};

#[derive(Debug, Clone)]
struct TimeSlot {
    time: SampleTime,
    by_reference: HashMap<String, CoverageRecord>,
}

/// Coverage records keyed by `(raw timestamp, reference)`.
#[derive(Debug, Clone, Default)]
pub struct CoverageIndex {
    slots: HashMap<String, TimeSlot>,
    len: usize,
}

impl CoverageIndex {
    /// Index `records`; on duplicate keys the record appearing last wins.
    pub fn build(records: impl IntoIterator<Item = CoverageRecord>) -> Self {
        let mut index = Self::default();
        for record in records {
            index.insert(record);
        }
        index
    }

    fn insert(&mut self, record: CoverageRecord) {
        let slot = self
            .slots
            .entry(record.timestamp.raw().to_owned())
            .or_insert_with(|| TimeSlot {
                time: record.timestamp.clone(),
                by_reference: HashMap::new(),
            });
        if slot
            .by_reference
            .insert(record.reference.clone(), record)
            .is_none()
        {
            self.len += 1;
        }
    }

    pub fn get(&self, timestamp: &str, reference: &str) -> Option<&CoverageRecord> {
        self.slots
            .get(timestamp)
            .and_then(|slot| slot.by_reference.get(reference))
    }

    /// Number of distinct `(timestamp, reference)` keys.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Distinct reference labels, sorted.
    pub fn references(&self) -> BTreeSet<&str> {
        self.slots
            .values()
            .flat_map(|slot| slot.by_reference.keys().map(String::as_str))
            .collect()
    }

    /// Distinct timestamps in chronological order.
    pub fn timestamps(&self) -> Vec<&SampleTime> {
        let mut times: Vec<&SampleTime> = self.slots.values().map(|slot| &slot.time).collect();
        times.sort();
        times
    }

    pub fn records(&self) -> impl Iterator<Item = &CoverageRecord> {
        self.slots.values().flat_map(|slot| slot.by_reference.values())
    }
}

/// Build an index from a record slice (clones each record).
pub fn build_index(records: &[CoverageRecord]) -> CoverageIndex {
    CoverageIndex::build(records.iter().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: &str, reference: &str, depth: f64) -> CoverageRecord {
        CoverageRecord {
            timestamp: SampleTime::parse(ts).unwrap(),
            reference: reference.into(),
            depth,
            breadth: 0.0,
            read_count: 0,
        }
    }

    #[test]
    fn test_empty_input_empty_index() {
        let index = build_index(&[]);
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        assert!(index.references().is_empty());
        assert!(index.timestamps().is_empty());
    }

    #[test]
    fn test_lookup_by_pair() {
        let index = build_index(&[
            record("2024-05-01 10:00:00", "A", 5.0),
            record("2024-05-01 10:00:00", "B", 9.0),
        ]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("2024-05-01 10:00:00", "A").unwrap().depth, 5.0);
        assert_eq!(index.get("2024-05-01 10:00:00", "B").unwrap().depth, 9.0);
        assert!(index.get("2024-05-01 10:00:00", "C").is_none());
        assert!(index.get("2024-05-01 10:00:10", "A").is_none());
    }

    #[test]
    fn test_duplicate_key_last_wins() {
        let index = build_index(&[
            record("2024-05-01 10:00:00", "A", 1.0),
            record("2024-05-01 10:00:00", "A", 2.0),
            record("2024-05-01 10:00:00", "A", 3.0),
        ]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("2024-05-01 10:00:00", "A").unwrap().depth, 3.0);
    }

    #[test]
    fn test_keys_are_verbatim() {
        // Same instant, different text: two distinct keys.
        let index = build_index(&[
            record("2024-05-01 10:00:00", "A", 1.0),
            record("2024-05-01T10:00:00", "A", 2.0),
        ]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.timestamps().len(), 2);
    }

    #[test]
    fn test_timestamps_chronological() {
        let index = build_index(&[
            record("2024-05-01 10:00:20", "A", 1.0),
            record("2024-05-01 09:59:59", "A", 1.0),
            record("2024-05-01 10:00:00", "B", 1.0),
        ]);
        let raw: Vec<&str> = index.timestamps().iter().map(|t| t.raw()).collect();
        assert_eq!(
            raw,
            vec!["2024-05-01 09:59:59", "2024-05-01 10:00:00", "2024-05-01 10:00:20"]
        );
        assert_eq!(index.references().into_iter().collect::<Vec<_>>(), vec!["A", "B"]);
    }
}
