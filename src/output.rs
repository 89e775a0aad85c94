use std::io::Write;

use crate::pipeline::Report;
use crate::row::COLUMNS;

pub mod human {
    use super::*;

    /// Prints each column of the report row on its own line, followed by any
    /// stages that were zero-filled.
    pub fn print_report<W: Write>(report: &Report, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "Report for {}: ================", report.window)?;
        let width = COLUMNS.iter().map(|name| name.len()).max().unwrap_or(0);
        for (name, value) in report.row.labeled() {
            writeln!(out, "{name:width$}    {value}")?;
        }
        for (stage, error) in [
            ("analytics", report.analytics.error()),
            ("search", report.search.error()),
        ] {
            if let Some(error) = error {
                writeln!(out, "!! {stage} failed, zeros recorded: {error}")?;
            }
        }
        Ok(())
    }
}

pub mod csv {
    use super::*;

    /// Writes a header record and the report row.
    pub fn print_report<W: Write>(report: &Report, out: W) -> anyhow::Result<()> {
        let mut writer = ::csv::Writer::from_writer(out);
        writer.write_record(COLUMNS)?;
        writer.write_record(report.row.cells().iter().map(|cell| cell.to_string()))?;
        writer.flush()?;
        Ok(())
    }
}
