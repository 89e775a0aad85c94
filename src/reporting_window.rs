use chrono::{Datelike as _, Days, NaiveDate};

/// The calendar month a report covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportingWindow {
    /// The first day of the month.
    pub start_date: NaiveDate,
    /// The last day of the month.
    pub end_date: NaiveDate,
    /// Human-readable "Month Year" label, e.g. "May 2024".
    pub label: String,
}

/// Computes the window covering the full calendar month before `today`.
pub fn compute_window(today: NaiveDate) -> ReportingWindow {
    let first_of_this_month =
        today.with_day(1).expect("the first of a month should always be valid");
    let end_date = first_of_this_month
        .checked_sub_days(Days::new(1))
        .expect("the day before the first of a month should be representable");
    let start_date = end_date.with_day(1).expect("the first of a month should always be valid");
    let label = start_date.format("%B %Y").to_string();
    ReportingWindow { start_date, end_date, label }
}

impl ReportingWindow {
    /// The start date in the `YYYY-MM-DD` form the reporting APIs expect.
    pub fn start_str(&self) -> String {
        self.start_date.format("%Y-%m-%d").to_string()
    }

    /// The end date in the `YYYY-MM-DD` form the reporting APIs expect.
    pub fn end_str(&self) -> String {
        self.end_date.format("%Y-%m-%d").to_string()
    }
}

impl std::fmt::Display for ReportingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} to {})", self.label, self.start_date, self.end_date)
    }
}
