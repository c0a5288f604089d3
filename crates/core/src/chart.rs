// crates/core/src/chart.rs
//! Coverage-over-time chart matrix.
//!
//! Pivots the sparse coverage index into a dense header + rows table: one row
//! per distinct timestamp, one value/tooltip column pair per reference, and an
//! optional constant threshold series for the depth metric.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use nanocas_view_types::CoverageRecord;

use crate::coverage_index::CoverageIndex;

/// Colours cycled across reference series.
pub const SERIES_PALETTE: [&str; 4] = ["#00B0BD", "#004E5A", "#FF6A45", "#27AE60"];

/// Fixed colour of the dashed threshold series.
pub const THRESHOLD_COLOR: &str = "#D95F02";

// ============================================================================
// Selections
// ============================================================================

/// Which coverage value is charted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Depth,
    Breadth,
}

impl Metric {
    pub fn value(self, record: &CoverageRecord) -> f64 {
        match self {
            Metric::Depth => record.depth,
            Metric::Breadth => record.breadth,
        }
    }

    /// Suffix appended to values in tooltips.
    pub fn unit_suffix(self) -> &'static str {
        match self {
            Metric::Depth => "X",
            Metric::Breadth => "%",
        }
    }

    /// Vertical axis title.
    pub fn axis_title(self) -> &'static str {
        match self {
            Metric::Depth => "Average Coverage Depth (reads/position)",
            Metric::Breadth => "Breadth Coverage (%)",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Depth => "depth",
            Metric::Breadth => "breadth",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "depth" => Ok(Metric::Depth),
            "breadth" => Ok(Metric::Breadth),
            other => Err(format!("unknown metric '{other}' (expected depth or breadth)")),
        }
    }
}

/// Unit of the elapsed-time axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    #[default]
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Seconds per unit.
    pub fn factor(self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3_600.0,
            TimeUnit::Days => 86_400.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "seconds" | "s" => Ok(TimeUnit::Seconds),
            "minutes" | "m" => Ok(TimeUnit::Minutes),
            "hours" | "h" => Ok(TimeUnit::Hours),
            "days" | "d" => Ok(TimeUnit::Days),
            other => Err(format!(
                "unknown time unit '{other}' (expected seconds, minutes, hours or days)"
            )),
        }
    }
}

// ============================================================================
// Matrix types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    Tooltip,
}

/// Column descriptor: `{ type, label, role? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
pub struct ChartColumn {
    #[serde(rename = "type")]
    pub kind: ColumnType,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ColumnRole>,
}

impl ChartColumn {
    pub fn number(label: impl Into<String>) -> Self {
        Self {
            kind: ColumnType::Number,
            label: label.into(),
            role: None,
        }
    }

    pub fn text(label: impl Into<String>) -> Self {
        Self {
            kind: ColumnType::String,
            label: label.into(),
            role: None,
        }
    }

    pub fn tooltip() -> Self {
        Self {
            kind: ColumnType::String,
            label: String::new(),
            role: Some(ColumnRole::Tooltip),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(untagged)]
pub enum ChartCell {
    Number(f64),
    Text(String),
}

impl ChartCell {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ChartCell::Number(n) => Some(*n),
            ChartCell::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ChartCell::Text(s) => Some(s),
            ChartCell::Number(_) => None,
        }
    }
}

/// Rendering hint for one plotted series, in series order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct SeriesStyle {
    pub label: String,
    pub color: String,
    pub dashed: bool,
}

/// Dense header + rows table ready for a multi-series chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct ChartMatrix {
    pub header: Vec<ChartColumn>,
    pub rows: Vec<Vec<ChartCell>>,
    pub series: Vec<SeriesStyle>,
}

impl ChartMatrix {
    /// No data rows: the caller renders an empty state instead of a chart.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.header.len()
    }

    pub fn has_threshold(&self) -> bool {
        self.series.iter().any(|s| s.dashed)
    }

    /// Header followed by rows, the array-of-arrays form chart widgets take.
    pub fn to_data_table(&self) -> serde_json::Value {
        let mut table = Vec::with_capacity(self.rows.len() + 1);
        table.push(serde_json::json!(self.header));
        table.extend(self.rows.iter().map(|row| serde_json::json!(row)));
        serde_json::Value::Array(table)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Pivot `index` into a chart matrix for `metric` on a `unit` time axis.
///
/// The threshold series is added only for [`Metric::Depth`] and a finite
/// `threshold`. Missing `(timestamp, reference)` cells are filled with 0.
pub fn build_chart_matrix(
    index: &CoverageIndex,
    metric: Metric,
    unit: TimeUnit,
    threshold: Option<f64>,
) -> ChartMatrix {
    let times = index.timestamps();
    let Some(origin) = times.first().copied() else {
        return ChartMatrix::default();
    };
    let references: Vec<&str> = index.references().into_iter().collect();
    let threshold = threshold.filter(|t| metric == Metric::Depth && t.is_finite());

    let mut header = Vec::with_capacity(1 + references.len() * 2 + 2);
    let mut series = Vec::with_capacity(references.len() + 1);
    header.push(ChartColumn::number(format!("Time ({unit})")));
    for (i, reference) in references.iter().enumerate() {
        header.push(ChartColumn::number(*reference));
        header.push(ChartColumn::tooltip());
        series.push(SeriesStyle {
            label: (*reference).to_owned(),
            color: SERIES_PALETTE[i % SERIES_PALETTE.len()].to_owned(),
            dashed: false,
        });
    }
    if threshold.is_some() {
        header.push(ChartColumn::number("Threshold"));
        header.push(ChartColumn::tooltip());
        series.push(SeriesStyle {
            label: "Threshold".to_owned(),
            color: THRESHOLD_COLOR.to_owned(),
            dashed: true,
        });
    }

    let suffix = metric.unit_suffix();
    let rows = times
        .iter()
        .map(|time| {
            let elapsed = time.seconds_since(origin) / unit.factor();
            let mut row = Vec::with_capacity(header.len());
            row.push(ChartCell::Number(elapsed));
            for reference in &references {
                let value = index
                    .get(time.raw(), reference)
                    .map(|record| metric.value(record))
                    .unwrap_or(0.0);
                row.push(ChartCell::Number(value));
                row.push(ChartCell::Text(format!(
                    "{time}\nElapsed: {elapsed:.2} {unit}\n{reference}: {value:.2}{suffix}"
                )));
            }
            if let Some(threshold) = threshold {
                row.push(ChartCell::Number(threshold));
                row.push(ChartCell::Text(format!(
                    "{time}\nElapsed: {elapsed:.2} {unit}\nThreshold: {threshold:.2}X"
                )));
            }
            row
        })
        .collect();

    ChartMatrix {
        header,
        rows,
        series,
    }
}
