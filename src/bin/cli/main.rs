use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::Context as _;
use clap::Parser;
use sitereport::pipeline::RunStatus;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod report;
mod window;

#[derive(Parser, Debug)]
#[command(version, about = "Appends last month's site analytics to a spreadsheet")]
struct CliArgs {
    /// Append log records to this file instead of writing them to stderr.
    #[arg(long, global = true, env = "SITEREPORT_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// The command to perform.
    #[command(subcommand)]
    command: Subcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum Subcommand {
    /// Fetch last month's metrics and append them as a new row.
    Report(report::Args),
    /// Print the reporting window that a report would cover.
    Window(window::Args),
}

fn main() -> ExitCode {
    let CliArgs { log_file, command } = CliArgs::parse();

    // set up tracing
    if let Err(err) = init_tracing(log_file.as_deref()) {
        eprintln!("failed to set up logging: {err:#}");
        return ExitCode::FAILURE;
    }

    let result = match command {
        Subcommand::Report(report_args) => report::main(report_args),
        Subcommand::Window(window_args) => window::main(window_args),
    };
    let status = match result {
        Ok(status) => status,
        Err(err) => {
            error!("error during execution: {:#}", err);
            RunStatus::Failed
        }
    };
    status.into()
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
