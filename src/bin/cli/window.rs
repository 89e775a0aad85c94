use chrono::{Local, NaiveDate};
use sitereport::pipeline::RunStatus;
use sitereport::reporting_window::compute_window;

#[derive(clap::Args, Debug)]
pub struct Args {
    /// Compute the window as if today were this date (YYYY-MM-DD).
    #[arg(long)]
    date: Option<NaiveDate>,
}

pub fn main(args: Args) -> anyhow::Result<RunStatus> {
    let Args { date } = args;
    let today = date.unwrap_or_else(|| Local::now().date_naive());
    let window = compute_window(today);
    println!("{}\t{}\t{}", window.label, window.start_str(), window.end_str());
    Ok(RunStatus::Complete)
}
