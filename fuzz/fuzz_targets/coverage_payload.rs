#![no_main]

use libfuzzer_sys::fuzz_target;
use nanocas_view_core::{build_chart_matrix, CoverageIndex, Metric, TimeUnit};
use nanocas_view_types::parse_coverage_payload;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(snapshot) = parse_coverage_payload(body) else {
        return;
    };
    let index = CoverageIndex::build(snapshot.records);
    let matrix = build_chart_matrix(&index, Metric::Depth, TimeUnit::Minutes, Some(10.0));
    for row in &matrix.rows {
        assert_eq!(row.len(), matrix.header.len());
    }
});
