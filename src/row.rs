use std::fmt::Display;

use serde::Serialize;

use crate::metrics::{AnalyticsMetrics, Channel, SearchMetrics};
use crate::reporting_window::ReportingWindow;

/// Number of cells in every report row.
pub const ROW_WIDTH: usize = 15;

/// Column names, in the order the cells are written. The sheet is addressed
/// by position, so this order must never change.
pub const COLUMNS: [&str; ROW_WIDTH] = [
    "Period",
    "Users",
    "New users",
    "Events",
    "Avg. engagement time",
    "Organic Social",
    "Direct",
    "Organic Search",
    "Referral",
    "Engaged users",
    "Conversions",
    "Clicks",
    "Impressions",
    "CTR",
    "Position",
];

/// Zero-based index of the CTR column (column N).
pub const CTR_COLUMN: usize = 13;

/// A single cell value. Serializes to the bare JSON string or number the
/// Sheets API accepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Integer(u64),
    Number(f64),
}

impl Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Text(text) => f.write_str(text),
            CellValue::Integer(n) => write!(f, "{n}"),
            CellValue::Number(x) => write!(f, "{x}"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(text: &str) -> Self {
        CellValue::Text(text.to_owned())
    }
}

impl From<String> for CellValue {
    fn from(text: String) -> Self {
        CellValue::Text(text)
    }
}

impl From<u64> for CellValue {
    fn from(n: u64) -> Self {
        CellValue::Integer(n)
    }
}

impl From<f64> for CellValue {
    fn from(x: f64) -> Self {
        CellValue::Number(x)
    }
}

/// One full-width report row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row([CellValue; ROW_WIDTH]);

impl Row {
    pub fn cells(&self) -> &[CellValue; ROW_WIDTH] {
        &self.0
    }

    pub fn ctr(&self) -> &CellValue {
        &self.0[CTR_COLUMN]
    }

    /// Pairs each cell with its column name.
    pub fn labeled(&self) -> impl Iterator<Item = (&'static str, &CellValue)> {
        COLUMNS.into_iter().zip(self.0.iter())
    }
}

/// Builds the report row for a window from the fetched and derived metrics.
pub fn assemble(
    window: &ReportingWindow,
    analytics: &AnalyticsMetrics,
    search: &SearchMetrics,
    avg_engagement: &str,
) -> Row {
    let channels = &analytics.channel_sessions;
    let [social, direct, organic, referral] =
        Channel::ALL.map(|channel| CellValue::from(channels.get(channel)));
    Row([
        window.label.as_str().into(),
        analytics.users.into(),
        analytics.new_users.into(),
        analytics.events.into(),
        avg_engagement.into(),
        social,
        direct,
        organic,
        referral,
        analytics.engaged_users.into(),
        analytics.conversion_users.into(),
        search.clicks.into(),
        search.impressions.into(),
        search.ctr.into(),
        round_to_tenth(search.position).into(),
    ])
}

fn round_to_tenth(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
