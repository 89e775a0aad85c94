use chrono::NaiveDate;
use tracing::{error, info};

use crate::metrics::{self, AnalyticsMetrics, FetchError, MetricSource, SearchMetrics};
use crate::reporting_window::{self, ReportingWindow};
use crate::row::{self, Row};
use crate::sheet_appender::{self, AppendError, AppendTarget, AppendedCell, SheetBackend};

/// How a fetch stage ended. A failed fetch still yields a value (the zero
/// record) so the row can be written.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Fetched(T),
    Defaulted { value: T, error: FetchError },
}

impl<T> StageOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            StageOutcome::Fetched(value) | StageOutcome::Defaulted { value, .. } => value,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            StageOutcome::Fetched(_) => None,
            StageOutcome::Defaulted { error, .. } => Some(error),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error().is_some()
    }
}

/// Runs one fetch stage, logging its start and end.
pub fn run_stage<S: MetricSource + ?Sized>(
    source: &S,
    window: &ReportingWindow,
) -> StageOutcome<S::Record> {
    let stage = source.stage();
    info!(stage, window = %window.label, "Fetching metrics");
    match source.fetch(window) {
        Ok(value) => {
            info!(stage, record = ?value, "Fetched metrics");
            StageOutcome::Fetched(value)
        }
        Err(error) => {
            error!(stage, %error, "Failed to fetch metrics; recording zeros");
            StageOutcome::Defaulted { value: S::Record::default(), error }
        }
    }
}

/// Everything computed for one reporting window before anything is written.
#[derive(Debug)]
pub struct Report {
    pub window: ReportingWindow,
    pub analytics: StageOutcome<AnalyticsMetrics>,
    pub search: StageOutcome<SearchMetrics>,
    pub avg_engagement: String,
    pub row: Row,
}

impl Report {
    /// Names of the stages whose metrics were replaced by zeros.
    pub fn failed_stages(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if self.analytics.is_failure() {
            failed.push("analytics");
        }
        if self.search.is_failure() {
            failed.push("search");
        }
        failed
    }
}

/// Computes the window for `today`, fetches both metric sets and assembles
/// the row.
pub fn build_report<A, S>(today: NaiveDate, analytics: &A, search: &S) -> Report
where
    A: MetricSource<Record = AnalyticsMetrics> + ?Sized,
    S: MetricSource<Record = SearchMetrics> + ?Sized,
{
    let window = reporting_window::compute_window(today);
    info!("Reporting window is {}", window);

    let analytics = run_stage(analytics, &window);
    let search = run_stage(search, &window);

    let totals = analytics.value();
    let avg_engagement = metrics::avg_engagement(totals.engagement_seconds, totals.users);
    info!(avg_engagement = %avg_engagement, "Calculated average engagement time");

    let row = row::assemble(&window, totals, search.value(), &avg_engagement);
    Report { window, analytics, search, avg_engagement, row }
}

#[derive(Debug)]
pub struct RunSummary {
    pub report: Report,
    pub appended: AppendedCell,
}

/// Builds the report and appends its row to the target worksheet. Only a
/// failed append aborts the run.
pub fn run<A, S, B>(
    today: NaiveDate,
    analytics: &A,
    search: &S,
    sheet: &B,
    target: &AppendTarget,
) -> Result<RunSummary, AppendError>
where
    A: MetricSource<Record = AnalyticsMetrics> + ?Sized,
    S: MetricSource<Record = SearchMetrics> + ?Sized,
    B: SheetBackend + ?Sized,
{
    let report = build_report(today, analytics, search);
    info!(stage = "append", sheet = %target.sheet_name, "Appending report row");
    let appended = match sheet_appender::append(sheet, target, &report.row) {
        Ok(appended) => appended,
        Err(e) => {
            error!(stage = "append", error = %e, "Failed to append report row");
            return Err(e);
        }
    };
    info!(
        stage = "append",
        row = appended.row,
        range = %appended.updated_range,
        ctr_formatted = appended.ctr_formatted,
        "Appended report row"
    );
    Ok(RunSummary { report, appended })
}

/// How a run ended, as the scheduler sees it through the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every metric was fetched and the row was handled.
    Complete,
    /// Nothing was written: bad settings, credentials or a failed append.
    Failed,
    /// The row was handled with zeros for at least one failed stage.
    Partial,
}

impl RunStatus {
    pub fn of_report(report: &Report) -> Self {
        if report.failed_stages().is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::Partial
        }
    }

    pub fn of_run<E>(result: &Result<RunSummary, E>) -> Self {
        match result {
            Ok(summary) => Self::of_report(&summary.report),
            Err(_) => RunStatus::Failed,
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Complete => 0,
            RunStatus::Failed => 1,
            RunStatus::Partial => 2,
        }
    }
}

impl From<RunStatus> for std::process::ExitCode {
    fn from(status: RunStatus) -> Self {
        std::process::ExitCode::from(status.exit_code())
    }
}
