// crates/core/src/match_chart.rs
//! "Sequences Match" bar chart: current match percentage against the alert
//! threshold, one bar pair per monitored query.

use nanocas_view_types::Session;

use crate::chart::{ChartCell, ChartColumn, ChartMatrix, SeriesStyle};

const MATCH_COLOR: &str = "#1B9E77";
const MATCH_THRESHOLD_COLOR: &str = "#D95F02";

/// Build the match-ratio matrix for `session`'s queries.
///
/// Unparseable thresholds plot as 0, like a missing current value.
pub fn build_match_matrix(session: &Session) -> ChartMatrix {
    let header = vec![
        ChartColumn::text("Name"),
        ChartColumn::number("Match Percentage (%)"),
        ChartColumn::number("Threshold (%)"),
    ];
    let rows = session
        .queries
        .iter()
        .map(|query| {
            vec![
                ChartCell::Text(query.name.clone()),
                ChartCell::Number(query.current_value),
                ChartCell::Number(query.threshold_value().unwrap_or(0.0)),
            ]
        })
        .collect();
    let series = vec![
        SeriesStyle {
            label: "Match Percentage (%)".into(),
            color: MATCH_COLOR.into(),
            dashed: false,
        },
        SeriesStyle {
            label: "Threshold (%)".into(),
            color: MATCH_THRESHOLD_COLOR.into(),
            dashed: false,
        },
    ];
    ChartMatrix {
        header,
        rows,
        series,
    }
}
