pub mod google_analytics;
pub mod google_oauth;
pub mod google_sheets;
pub mod search_console;
#[cfg(test)]
pub(crate) mod test_server;

use std::time::Duration;

use anyhow::{anyhow, Context as _};
use oauth2::TokenResponse as _;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::config::Config;
use google_oauth::{Credentials, TryWithCredentialsError};

const USER_AGENT: &str = concat!("sitereport/", env!("CARGO_PKG_VERSION"));

/// Base URLs of the Google APIs the report talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub analytics_data: String,
    pub search_console: String,
    pub sheets: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            analytics_data: "https://analyticsdata.googleapis.com/v1beta".to_owned(),
            search_console: "https://searchconsole.googleapis.com/webmasters/v3".to_owned(),
            sheets: "https://sheets.googleapis.com/v4/spreadsheets".to_owned(),
        }
    }
}

impl Endpoints {
    /// The same API paths served from another host, such as a local stand-in.
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            analytics_data: format!("{base}/v1beta"),
            search_console: format!("{base}/webmasters/v3"),
            sheets: format!("{base}/v4/spreadsheets"),
        }
    }
}

/// Authenticated blocking client shared by the Google API wrappers.
pub struct GoogleApiClient {
    http: Client,
    credentials: Credentials,
    endpoints: Endpoints,
}

impl GoogleApiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = http_client(config.request_timeout)?;
        let credentials = Credentials::load(
            &config.credentials_path,
            config.token_cache_path.clone(),
            http.clone(),
        )?;
        Ok(Self::with_endpoints(http, credentials, Endpoints::default()))
    }

    pub fn with_endpoints(http: Client, credentials: Credentials, endpoints: Endpoints) -> Self {
        Self { http, credentials, endpoints }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Sends the request built by `build` with a bearer token and decodes the
    /// JSON response. `what` names the operation in errors and logs.
    fn call<T, F>(&self, what: &str, build: F) -> anyhow::Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        self.credentials.run_with_credentials(|token| {
            trace!("Sending request to {}", what);
            let response = build(&self.http)
                .bearer_auth(token.access_token().secret())
                .send()
                .map_err(|e| anyhow!("request to {} failed: {}", what, e))?;
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                return Err(TryWithCredentialsError::Unauthorized(anyhow!(
                    "request to {} was unauthorized with status code: {}",
                    what,
                    status
                )));
            }
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(TryWithCredentialsError::Other(anyhow!(
                    "request to {} failed with status code {}: {}",
                    what,
                    status,
                    body
                )));
            }
            let value: serde_json::Value = response
                .json()
                .map_err(|e| anyhow!("response to {} was not valid JSON: {}", what, e))?;
            trace!("Received response to {}: {}", what, value);
            serde_json::from_value(value)
                .map_err(|e| anyhow!("unexpected response shape from {}: {}", what, e).into())
        })
    }
}

/// Blocking client with the per-call deadline applied to every request.
pub fn http_client(timeout: Duration) -> anyhow::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::apis::google_oauth::tests::authorized_user_with_cached_token;
    use crate::apis::test_server::TestServer;

    /// A client whose APIs and token endpoint are all served by `server`,
    /// starting out with a valid cached token `ya29.abc`.
    pub(crate) fn client_for(server: &TestServer, dir: &std::path::Path) -> GoogleApiClient {
        let (creds_path, cache_path) =
            authorized_user_with_cached_token(dir, &format!("{}/token", server.base_url));
        let http = http_client(Duration::from_secs(5)).unwrap();
        let credentials = Credentials::load(&creds_path, Some(cache_path), http.clone()).unwrap();
        GoogleApiClient::with_endpoints(http, credentials, Endpoints::rooted_at(&server.base_url))
    }

    #[test]
    fn rooted_endpoints_keep_api_paths() {
        let endpoints = Endpoints::rooted_at("http://127.0.0.1:8080/");
        assert_eq!(endpoints.analytics_data, "http://127.0.0.1:8080/v1beta");
        assert_eq!(endpoints.search_console, "http://127.0.0.1:8080/webmasters/v3");
        assert_eq!(endpoints.sheets, "http://127.0.0.1:8080/v4/spreadsheets");
    }

    #[test]
    fn sends_bearer_token_and_decodes_json() {
        let server = TestServer::start(vec![(200, json!({ "ok": true }))]);
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, dir.path());

        let url = format!("{}/ping", server.base_url);
        let value: Value = client.call("ping", |http| http.get(&url)).unwrap();
        assert_eq!(value, json!({ "ok": true }));

        let requests = server.finish();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer ya29.abc"));
    }

    #[test]
    fn unauthorized_refreshes_once_and_resends() {
        let server = TestServer::start(vec![
            (401, json!({ "error": { "code": 401 } })),
            (200, json!({ "access_token": "ya29.fresh", "token_type": "Bearer", "expires_in": 3599 })),
            (200, json!({ "ok": true })),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, dir.path());

        let url = format!("{}/ping", server.base_url);
        let value: Value = client.call("ping", |http| http.get(&url)).unwrap();
        assert_eq!(value, json!({ "ok": true }));

        let requests = server.finish();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].url, "/ping");
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer ya29.abc"));
        assert_eq!(requests[1].method, "POST");
        assert_eq!(requests[1].url, "/token");
        assert!(requests[1].body.contains("grant_type=refresh_token"));
        assert_eq!(requests[2].url, "/ping");
        assert_eq!(requests[2].authorization.as_deref(), Some("Bearer ya29.fresh"));
    }

    #[test]
    fn unauthorized_after_refresh_gives_up() {
        let server = TestServer::start(vec![
            (401, json!({})),
            (200, json!({ "access_token": "ya29.fresh", "token_type": "Bearer", "expires_in": 3599 })),
            (401, json!({})),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, dir.path());

        let url = format!("{}/ping", server.base_url);
        let err = client.call::<Value, _>("ping", |http| http.get(&url)).unwrap_err();
        assert!(format!("{err:#}").contains("unauthorized"));
        assert_eq!(server.finish().len(), 3);
    }

    #[test]
    fn other_error_statuses_are_not_retried() {
        let server = TestServer::start(vec![(503, json!({ "error": "backend unavailable" }))]);
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, dir.path());

        let url = format!("{}/ping", server.base_url);
        let err = client.call::<Value, _>("ping", |http| http.get(&url)).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("503"), "{message}");
        assert!(message.contains("backend unavailable"), "{message}");
        assert_eq!(server.finish().len(), 1);
    }
}
