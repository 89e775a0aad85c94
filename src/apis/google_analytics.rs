use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::GoogleApiClient;
use crate::metrics::{AnalyticsMetrics, Channel, FetchError, MetricSource};
use crate::reporting_window::ReportingWindow;

const METRIC_ACTIVE_USERS: &str = "activeUsers";
const METRIC_NEW_USERS: &str = "newUsers";
const METRIC_EVENT_COUNT: &str = "eventCount";
const METRIC_ENGAGEMENT_DURATION: &str = "userEngagementDuration";
const METRIC_ENGAGED_SESSIONS: &str = "engagedSessions";
const DIMENSION_CHANNEL_GROUP: &str = "sessionDefaultChannelGroup";
const DIMENSION_EVENT_NAME: &str = "eventName";

/// Names of the custom events counted in the report.
#[derive(Debug, Clone)]
pub struct CustomEvents {
    /// Fired once a user has been engaged past the site's threshold.
    pub engaged_user: String,
    pub conversion: String,
}

/// Fetches the monthly aggregates for one GA4 property.
pub struct GoogleAnalytics<'c> {
    client: &'c GoogleApiClient,
    property_id: String,
    events: CustomEvents,
}

impl<'c> GoogleAnalytics<'c> {
    pub fn new(client: &'c GoogleApiClient, property_id: String, events: CustomEvents) -> Self {
        Self { client, property_id, events }
    }
}

impl MetricSource for GoogleAnalytics<'_> {
    type Record = AnalyticsMetrics;

    fn stage(&self) -> &'static str {
        "analytics"
    }

    fn fetch(&self, window: &ReportingWindow) -> Result<AnalyticsMetrics, FetchError> {
        let url = format!(
            "{}/{}:batchRunReports",
            self.client.endpoints().analytics_data,
            self.property_id
        );
        let body = batch_request(window, &self.events);
        info!("Requesting analytics reports for {} from {}", window.label, self.property_id);
        let response: BatchRunReportsResponse =
            self.client.call("the Analytics Data API", |http| http.post(&url).json(&body))?;
        parse_batch(&response, &self.events)
    }
}

/// One batch with three aggregate reports over the whole window: totals,
/// engaged sessions per channel, and active users of the custom events.
fn batch_request(window: &ReportingWindow, events: &CustomEvents) -> Value {
    let date_ranges = json!([{ "startDate": window.start_str(), "endDate": window.end_str() }]);
    json!({
        "requests": [
            {
                "dateRanges": date_ranges,
                "metrics": [
                    { "name": METRIC_ACTIVE_USERS },
                    { "name": METRIC_NEW_USERS },
                    { "name": METRIC_EVENT_COUNT },
                    { "name": METRIC_ENGAGEMENT_DURATION },
                ],
            },
            {
                "dateRanges": date_ranges,
                "dimensions": [{ "name": DIMENSION_CHANNEL_GROUP }],
                "metrics": [{ "name": METRIC_ENGAGED_SESSIONS }],
            },
            {
                "dateRanges": date_ranges,
                "dimensions": [{ "name": DIMENSION_EVENT_NAME }],
                "metrics": [{ "name": METRIC_ACTIVE_USERS }],
                "dimensionFilter": {
                    "filter": {
                        "fieldName": DIMENSION_EVENT_NAME,
                        "inListFilter": { "values": [events.engaged_user, events.conversion] },
                    },
                },
            },
        ],
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchRunReportsResponse {
    #[serde(default)]
    reports: Vec<RunReportResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunReportResponse {
    #[serde(default)]
    dimension_headers: Vec<Header>,
    #[serde(default)]
    metric_headers: Vec<Header>,
    #[serde(default)]
    rows: Vec<ReportRow>,
}

#[derive(Debug, Default, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRow {
    #[serde(default)]
    dimension_values: Vec<CellValue>,
    #[serde(default)]
    metric_values: Vec<CellValue>,
}

#[derive(Debug, Default, Deserialize)]
struct CellValue {
    value: Option<String>,
}

/// A report in the batch, with its columns looked up by header name.
struct Report<'r> {
    name: &'static str,
    response: &'r RunReportResponse,
}

impl<'r> Report<'r> {
    fn metric_column(&self, metric: &str) -> Result<usize, FetchError> {
        column(&self.response.metric_headers, metric)
            .ok_or_else(|| FetchError::MissingField { report: self.name, field: metric.to_owned() })
    }

    fn dimension_column(&self, dimension: &str) -> Result<usize, FetchError> {
        column(&self.response.dimension_headers, dimension).ok_or_else(|| {
            FetchError::MissingField { report: self.name, field: dimension.to_owned() }
        })
    }

    fn metric(&self, row: &'r ReportRow, column: usize, field: &str) -> Result<u64, FetchError> {
        let raw = self.cell(&row.metric_values, column, field)?;
        raw.trim().parse().map_err(|_| FetchError::InvalidValue {
            field: field.to_owned(),
            value: raw.to_owned(),
        })
    }

    fn dimension(&self, row: &'r ReportRow, column: usize, field: &str) -> Result<&'r str, FetchError> {
        self.cell(&row.dimension_values, column, field)
    }

    fn cell(&self, values: &'r [CellValue], column: usize, field: &str) -> Result<&'r str, FetchError> {
        values
            .get(column)
            .and_then(|cell| cell.value.as_deref())
            .ok_or_else(|| FetchError::MissingField { report: self.name, field: field.to_owned() })
    }
}

fn column(headers: &[Header], name: &str) -> Option<usize> {
    headers.iter().position(|header| header.name == name)
}

fn parse_batch(
    response: &BatchRunReportsResponse,
    events: &CustomEvents,
) -> Result<AnalyticsMetrics, FetchError> {
    let report = |index: usize, name: &'static str| {
        response
            .reports
            .get(index)
            .map(|response| Report { name, response })
            .ok_or_else(|| FetchError::MissingField { report: name, field: "report".to_owned() })
    };
    let totals = report(0, "totals")?;
    let channels = report(1, "channels")?;
    let custom_events = report(2, "custom events")?;

    let mut metrics = AnalyticsMetrics::default();

    // an aggregate query without dimensions has at most one row
    if let Some(row) = totals.response.rows.first() {
        metrics.users =
            totals.metric(row, totals.metric_column(METRIC_ACTIVE_USERS)?, METRIC_ACTIVE_USERS)?;
        metrics.new_users =
            totals.metric(row, totals.metric_column(METRIC_NEW_USERS)?, METRIC_NEW_USERS)?;
        metrics.events =
            totals.metric(row, totals.metric_column(METRIC_EVENT_COUNT)?, METRIC_EVENT_COUNT)?;
        metrics.engagement_seconds = totals.metric(
            row,
            totals.metric_column(METRIC_ENGAGEMENT_DURATION)?,
            METRIC_ENGAGEMENT_DURATION,
        )?;
    } else {
        warn!("Analytics returned no totals for the window; recording zeros");
    }

    if !channels.response.rows.is_empty() {
        let group_col = channels.dimension_column(DIMENSION_CHANNEL_GROUP)?;
        let sessions_col = channels.metric_column(METRIC_ENGAGED_SESSIONS)?;
        for row in &channels.response.rows {
            let group = channels.dimension(row, group_col, DIMENSION_CHANNEL_GROUP)?;
            let sessions = channels.metric(row, sessions_col, METRIC_ENGAGED_SESSIONS)?;
            match Channel::from_group_name(group) {
                Some(channel) => metrics.channel_sessions.add(channel, sessions),
                None => debug!("Ignoring {} engaged sessions from channel {:?}", sessions, group),
            }
        }
    } else {
        warn!("Analytics returned no channel breakdown for the window; recording zeros");
    }

    if !custom_events.response.rows.is_empty() {
        let name_col = custom_events.dimension_column(DIMENSION_EVENT_NAME)?;
        let users_col = custom_events.metric_column(METRIC_ACTIVE_USERS)?;
        for row in &custom_events.response.rows {
            let name = custom_events.dimension(row, name_col, DIMENSION_EVENT_NAME)?;
            let users = custom_events.metric(row, users_col, METRIC_ACTIVE_USERS)?;
            if name == events.engaged_user {
                metrics.engaged_users = users;
            } else if name == events.conversion {
                metrics.conversion_users = users;
            }
        }
    } else {
        debug!("No custom events recorded in the window");
    }

    Ok(metrics)
}
