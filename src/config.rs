use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::sheet_appender::AppendTarget;

pub const DEFAULT_ENGAGED_USER_EVENT: &str = "user_spent_2_minutes";
pub const DEFAULT_CONVERSION_EVENT: &str = "bli_medlem_klick";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("failed to read config file {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

/// Settings as they come from a config file or command-line overrides. Every
/// field is optional here; [`Settings::resolve`] checks what is required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub credentials_path: Option<PathBuf>,
    pub token_cache_path: Option<PathBuf>,
    pub spreadsheet_id: Option<String>,
    pub sheet_name: Option<String>,
    pub property_id: Option<String>,
    pub site_url: Option<String>,
    pub engaged_user_event: Option<String>,
    pub conversion_event: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

impl Settings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file =
            File::open(path).map_err(|source| ConfigError::Io { path: path.to_owned(), source })?;
        let settings = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| ConfigError::Parse { path: path.to_owned(), source })?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Layers `overrides` on top of `self`; any field set in `overrides` wins.
    pub fn merge(self, overrides: Settings) -> Settings {
        Settings {
            credentials_path: overrides.credentials_path.or(self.credentials_path),
            token_cache_path: overrides.token_cache_path.or(self.token_cache_path),
            spreadsheet_id: overrides.spreadsheet_id.or(self.spreadsheet_id),
            sheet_name: overrides.sheet_name.or(self.sheet_name),
            property_id: overrides.property_id.or(self.property_id),
            site_url: overrides.site_url.or(self.site_url),
            engaged_user_event: overrides.engaged_user_event.or(self.engaged_user_event),
            conversion_event: overrides.conversion_event.or(self.conversion_event),
            request_timeout_secs: overrides.request_timeout_secs.or(self.request_timeout_secs),
        }
    }

    pub fn resolve(self) -> Result<Config, ConfigError> {
        fn required<T>(value: Option<T>, name: &'static str) -> Result<T, ConfigError> {
            value.ok_or(ConfigError::Missing(name))
        }
        fn non_empty(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
            let value = required(value, name)?;
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid { name, reason: "must not be empty".to_owned() });
            }
            Ok(value)
        }

        let timeout_secs = self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "request_timeout_secs",
                reason: "must be greater than zero".to_owned(),
            });
        }

        Ok(Config {
            credentials_path: required(self.credentials_path, "credentials_path")?,
            token_cache_path: self.token_cache_path,
            target: AppendTarget {
                spreadsheet_id: non_empty(self.spreadsheet_id, "spreadsheet_id")?,
                sheet_name: non_empty(self.sheet_name, "sheet_name")?,
            },
            property_id: normalize_property_id(non_empty(self.property_id, "property_id")?)?,
            site_url: non_empty(self.site_url, "site_url")?,
            engaged_user_event: self
                .engaged_user_event
                .unwrap_or_else(|| DEFAULT_ENGAGED_USER_EVENT.to_owned()),
            conversion_event: self
                .conversion_event
                .unwrap_or_else(|| DEFAULT_CONVERSION_EVENT.to_owned()),
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Everything a report run needs, passed explicitly into the pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Google credentials file: an authorized user or a service-account key.
    pub credentials_path: PathBuf,
    /// Where to cache access tokens between runs. No caching if `None`.
    pub token_cache_path: Option<PathBuf>,
    pub target: AppendTarget,
    /// GA4 property in `properties/<id>` form.
    pub property_id: String,
    /// Search Console site, e.g. `https://www.example.com/` or
    /// `sc-domain:example.com`.
    pub site_url: String,
    pub engaged_user_event: String,
    pub conversion_event: String,
    /// Deadline applied to every remote call.
    pub request_timeout: Duration,
}

fn normalize_property_id(property_id: String) -> Result<String, ConfigError> {
    let id = property_id.trim();
    let digits = id.strip_prefix("properties/").unwrap_or(id);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::Invalid {
            name: "property_id",
            reason: format!("expected a numeric id or `properties/<id>`, got {property_id:?}"),
        });
    }
    Ok(format!("properties/{digits}"))
}
