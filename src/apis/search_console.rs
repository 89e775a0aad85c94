use anyhow::Context as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use url::Url;

use super::GoogleApiClient;
use crate::metrics::{FetchError, MetricSource, SearchMetrics};
use crate::reporting_window::ReportingWindow;


/// Upper bound on returned rows. Without dimensions the API returns a single
/// aggregate row anyway.
const ROW_LIMIT: u32 = 1000;

/// Fetches the monthly search performance totals for one site.
pub struct SearchConsole<'c> {
    client: &'c GoogleApiClient,
    site_url: String,
}

impl<'c> SearchConsole<'c> {
    pub fn new(client: &'c GoogleApiClient, site_url: String) -> Self {
        Self { client, site_url }
    }
}

impl MetricSource for SearchConsole<'_> {
    type Record = SearchMetrics;

    fn stage(&self) -> &'static str {
        "search"
    }

    fn fetch(&self, window: &ReportingWindow) -> Result<SearchMetrics, FetchError> {
        let url = query_url(&self.client.endpoints().search_console, &self.site_url)?;
        let body = query_request(window);
        info!("Requesting search analytics for {} from {}", window.label, self.site_url);
        let response: QueryResponse = self
            .client
            .call("the Search Console API", |http| http.post(url.clone()).json(&body))?;
        parse_query(&response)
    }
}

/// The site URL is a single path segment and must be percent-encoded.
fn query_url(base: &str, site_url: &str) -> anyhow::Result<Url> {
    let mut url =
        Url::parse(base).with_context(|| format!("invalid Search Console endpoint {base}"))?;
    url.path_segments_mut()
        .map_err(|()| anyhow::anyhow!("endpoint URL cannot have path segments"))?
        .push("sites")
        .push(site_url)
        .push("searchAnalytics")
        .push("query");
    Ok(url)
}

fn query_request(window: &ReportingWindow) -> Value {
    json!({
        "startDate": window.start_str(),
        "endDate": window.end_str(),
        "dimensions": [],
        "aggregationType": "auto",
        "rowLimit": ROW_LIMIT,
    })
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<QueryRow>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryRow {
    clicks: Option<f64>,
    impressions: Option<f64>,
    ctr: Option<f64>,
    position: Option<f64>,
}

fn parse_query(response: &QueryResponse) -> Result<SearchMetrics, FetchError> {
    let Some(totals) = response.rows.first() else {
        warn!("Search Console returned no rows for the window; recording zeros");
        return Ok(SearchMetrics::default());
    };
    let field = |value: Option<f64>, name: &str| {
        value.ok_or_else(|| FetchError::MissingField { report: "search", field: name.to_owned() })
    };
    Ok(SearchMetrics {
        clicks: count(field(totals.clicks, "clicks")?, "clicks")?,
        impressions: count(field(totals.impressions, "impressions")?, "impressions")?,
        ctr: field(totals.ctr, "ctr")?,
        position: field(totals.position, "position")?,
    })
}

/// Clicks and impressions arrive as JSON doubles but are whole counts.
fn count(value: f64, name: &str) -> Result<u64, FetchError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Ok(value as u64)
    } else {
        Err(FetchError::InvalidValue { field: name.to_owned(), value: value.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::apis::tests::client_for;
    use crate::apis::test_server::TestServer;
    use crate::apis::Endpoints;
    use crate::reporting_window::compute_window;

    fn decode(value: Value) -> QueryResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_aggregate_row() {
        let response = decode(json!({
            "rows": [{ "keys": [], "clicks": 40.0, "impressions": 4000.0, "ctr": 0.01, "position": 8.2 }],
            "responseAggregationType": "byProperty",
        }));
        let metrics = parse_query(&response).unwrap();
        assert_eq!(
            metrics,
            SearchMetrics { clicks: 40, impressions: 4000, ctr: 0.01, position: 8.2 }
        );
    }

    #[test]
    fn no_rows_is_all_zero() {
        let response = decode(json!({ "responseAggregationType": "auto" }));
        assert_eq!(parse_query(&response).unwrap(), SearchMetrics::default());
    }

    #[test]
    fn missing_field_is_an_error() {
        let response = decode(json!({ "rows": [{ "clicks": 1, "impressions": 10, "ctr": 0.1 }] }));
        let err = parse_query(&response).unwrap_err();
        assert!(matches!(&err, FetchError::MissingField { field, .. } if field == "position"));
    }

    #[test]
    fn fractional_count_is_an_error() {
        let response = decode(json!({
            "rows": [{ "clicks": 1.5, "impressions": 10, "ctr": 0.15, "position": 3.0 }]
        }));
        assert!(matches!(parse_query(&response), Err(FetchError::InvalidValue { .. })));
    }

    #[test]
    fn site_url_is_one_encoded_segment() {
        let url = query_url(&Endpoints::default().search_console, "https://www.example.com/").unwrap();
        assert_eq!(
            url.as_str(),
            "https://searchconsole.googleapis.com/webmasters/v3/sites/https:%2F%2Fwww.example.com%2F/searchAnalytics/query"
        );
        let url =
            query_url(&Endpoints::default().search_console, "sc-domain:example.com").unwrap();
        assert!(url.as_str().ends_with("/sites/sc-domain:example.com/searchAnalytics/query"));
    }

    #[test]
    fn request_is_an_aggregate_query() {
        let window = compute_window(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(
            query_request(&window),
            json!({
                "startDate": "2023-12-01",
                "endDate": "2023-12-31",
                "dimensions": [],
                "aggregationType": "auto",
                "rowLimit": 1000,
            })
        );
    }

    #[test]
    fn fetch_posts_query_for_the_window() {
        let server = TestServer::start(vec![(
            200,
            json!({ "rows": [{ "clicks": 7, "impressions": 300, "ctr": 0.0233, "position": 11.5 }] }),
        )]);
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, dir.path());
        let source = SearchConsole::new(&client, "https://www.example.com/".to_owned());

        let window = compute_window(NaiveDate::from_ymd_opt(2024, 6, 5).unwrap());
        let metrics = source.fetch(&window).unwrap();
        assert_eq!(metrics.clicks, 7);
        assert_eq!(metrics.impressions, 300);

        let requests = server.finish();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(
            requests[0].url,
            "/webmasters/v3/sites/https:%2F%2Fwww.example.com%2F/searchAnalytics/query"
        );
        let body: Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(body["startDate"], "2024-05-01");
        assert_eq!(body["endDate"], "2024-05-31");
    }
}
