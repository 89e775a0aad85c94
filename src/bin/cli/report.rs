use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use sitereport::apis::google_analytics::{CustomEvents, GoogleAnalytics};
use sitereport::apis::google_sheets::GoogleSheets;
use sitereport::apis::search_console::SearchConsole;
use sitereport::apis::GoogleApiClient;
use sitereport::config::Settings;
use sitereport::output;
use sitereport::pipeline::{self, RunStatus};
use tracing::{info, warn};

#[derive(clap::Args, Debug)]
pub struct Args {
    /// JSON file with settings. Flags and environment variables take
    /// precedence over it.
    #[arg(long, env = "SITEREPORT_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    settings: SettingsArgs,

    /// Report on the month before this date instead of the month before
    /// today (YYYY-MM-DD).
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Where the report row goes.
    #[arg(long, value_enum, default_value = "google-sheets")]
    format: CliOutputFormat,
}

#[derive(clap::Args, Debug)]
struct SettingsArgs {
    /// Google credentials file, either an authorized user (client_id,
    /// client_secret, refresh_token) or a service-account key.
    #[arg(long, env = "SITEREPORT_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// File to cache access tokens in between runs.
    #[arg(long, env = "SITEREPORT_TOKEN_CACHE")]
    token_cache: Option<PathBuf>,

    /// ID of the spreadsheet to append to.
    #[arg(long, env = "SITEREPORT_SPREADSHEET_ID")]
    spreadsheet_id: Option<String>,

    /// Title of the worksheet (tab) to append to.
    #[arg(long, env = "SITEREPORT_SHEET_NAME")]
    sheet_name: Option<String>,

    /// GA4 property, either `123456789` or `properties/123456789`.
    #[arg(long, env = "SITEREPORT_PROPERTY_ID")]
    property_id: Option<String>,

    /// Search Console site, e.g. `https://www.example.com/`.
    #[arg(long, env = "SITEREPORT_SITE_URL")]
    site_url: Option<String>,

    /// Event counted in the "Engaged users" column.
    #[arg(long, env = "SITEREPORT_ENGAGED_USER_EVENT")]
    engaged_user_event: Option<String>,

    /// Event counted in the "Conversions" column.
    #[arg(long, env = "SITEREPORT_CONVERSION_EVENT")]
    conversion_event: Option<String>,

    /// Deadline in seconds for each remote call.
    #[arg(long, env = "SITEREPORT_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,
}

impl From<SettingsArgs> for Settings {
    fn from(args: SettingsArgs) -> Self {
        Settings {
            credentials_path: args.credentials,
            token_cache_path: args.token_cache,
            spreadsheet_id: args.spreadsheet_id,
            sheet_name: args.sheet_name,
            property_id: args.property_id,
            site_url: args.site_url,
            engaged_user_event: args.engaged_user_event,
            conversion_event: args.conversion_event,
            request_timeout_secs: args.request_timeout,
        }
    }
}

#[derive(Debug, clap::ValueEnum, Clone, Copy, Eq, PartialEq)]
enum CliOutputFormat {
    /// Prints the row in human-readable form without writing it anywhere.
    Human,
    /// Prints the row as CSV without writing it anywhere.
    Csv,
    /// Appends the row to the configured Google Sheet.
    GoogleSheets,
}

pub fn main(args: Args) -> anyhow::Result<RunStatus> {
    let Args { config, settings, date, format } = args;

    let file_settings = match config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    let config = file_settings.merge(settings.into()).resolve()?;

    let today = date.unwrap_or_else(|| Local::now().date_naive());
    let client = GoogleApiClient::new(&config)?;
    let analytics = GoogleAnalytics::new(
        &client,
        config.property_id.clone(),
        CustomEvents {
            engaged_user: config.engaged_user_event.clone(),
            conversion: config.conversion_event.clone(),
        },
    );
    let search = SearchConsole::new(&client, config.site_url.clone());

    let report = match format {
        CliOutputFormat::Human => {
            let report = pipeline::build_report(today, &analytics, &search);
            output::human::print_report(&report, &mut std::io::stdout().lock())?;
            report
        }
        CliOutputFormat::Csv => {
            let report = pipeline::build_report(today, &analytics, &search);
            output::csv::print_report(&report, std::io::stdout().lock())?;
            report
        }
        CliOutputFormat::GoogleSheets => {
            let sheets = GoogleSheets::new(&client);
            let summary = pipeline::run(today, &analytics, &search, &sheets, &config.target)?;
            info!(
                "Report for {} is in {} row {}",
                summary.report.window.label, summary.appended.sheet_name, summary.appended.row
            );
            summary.report
        }
    };
    let failed = report.failed_stages();
    if !failed.is_empty() {
        warn!("Zeros were recorded for failed stages: {}", failed.join(", "));
    }
    Ok(RunStatus::of_report(&report))
}
