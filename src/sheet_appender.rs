use std::cell::RefCell;
use std::collections::HashMap;

use thiserror::Error;
use tracing::{info, warn};

use crate::apis::google_sheets::spreadsheet::{row_range, GridRange, NumberFormat};
use crate::row::{CellValue, Row, CTR_COLUMN};

/// The worksheet report rows are appended to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendTarget {
    pub spreadsheet_id: String,
    /// Title of the worksheet (tab) within the spreadsheet.
    pub sheet_name: String,
}

/// The operations the appender needs from a spreadsheet service.
pub trait SheetBackend {
    /// Number of rows currently holding data in the target worksheet.
    fn read_row_count(&self, target: &AppendTarget) -> anyhow::Result<u32>;

    /// Writes `row` as user-entered values starting at column A of the
    /// one-based `row_number`. Returns the range that was updated.
    fn write_row(&self, target: &AppendTarget, row_number: u32, row: &Row) -> anyhow::Result<String>;

    /// Looks up the worksheet's numeric id, which stays stable when the tab is
    /// renamed or moved. `None` if no worksheet has that title.
    fn resolve_sheet_id(&self, target: &AppendTarget) -> anyhow::Result<Option<i64>>;

    fn apply_number_format(
        &self,
        spreadsheet_id: &str,
        range: GridRange,
        format: NumberFormat,
    ) -> anyhow::Result<()>;
}

/// Where a report row ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedCell {
    pub sheet_name: String,
    /// One-based row number.
    pub row: u32,
    pub updated_range: String,
    pub sheet_id: Option<i64>,
    /// Whether the CTR cell was formatted as a percentage.
    pub ctr_formatted: bool,
}

#[derive(Error, Debug)]
pub enum AppendError {
    #[error("failed to read the current row count: {0:#}")]
    ReadRowCount(anyhow::Error),
    #[error("failed to write row {row}: {source:#}")]
    WriteRow { row: u32, source: anyhow::Error },
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("no worksheet titled {0:?}")]
    SheetNotFound(String),
    #[error("failed to look up the worksheet id: {0:#}")]
    Lookup(anyhow::Error),
    #[error("failed to apply the number format: {0:#}")]
    Apply(anyhow::Error),
}

/// Appends `row` after the last used row of the target worksheet, then
/// formats its CTR cell as a percentage.
///
/// The row count is read fresh on every call, so two runs racing each other
/// can both land on the same row. A failure to format the CTR cell leaves the
/// written row in place and is only logged.
pub fn append<B: SheetBackend + ?Sized>(
    backend: &B,
    target: &AppendTarget,
    row: &Row,
) -> Result<AppendedCell, AppendError> {
    let used_rows = backend.read_row_count(target).map_err(AppendError::ReadRowCount)?;
    let next_row = used_rows + 1;
    info!("Writing report row to {:?} row {}", target.sheet_name, next_row);

    let updated_range = backend
        .write_row(target, next_row, row)
        .map_err(|source| AppendError::WriteRow { row: next_row, source })?;
    info!("Wrote report row to {}", updated_range);

    let (sheet_id, formatted) = match resolve_sheet_id(backend, target) {
        Ok(sheet_id) => (Some(sheet_id), format_ctr_cell(backend, target, sheet_id, next_row)),
        Err(e) => (None, Err(e)),
    };
    let ctr_formatted = match formatted {
        Ok(()) => true,
        Err(e) => {
            warn!("Row {} was written but the CTR cell is unformatted: {}", next_row, e);
            false
        }
    };

    Ok(AppendedCell {
        sheet_name: target.sheet_name.clone(),
        row: next_row,
        updated_range,
        sheet_id,
        ctr_formatted,
    })
}

fn resolve_sheet_id<B: SheetBackend + ?Sized>(
    backend: &B,
    target: &AppendTarget,
) -> Result<i64, FormatError> {
    backend
        .resolve_sheet_id(target)
        .map_err(FormatError::Lookup)?
        .ok_or_else(|| FormatError::SheetNotFound(target.sheet_name.clone()))
}

fn format_ctr_cell<B: SheetBackend + ?Sized>(
    backend: &B,
    target: &AppendTarget,
    sheet_id: i64,
    row_number: u32,
) -> Result<(), FormatError> {
    let range = GridRange::cell(sheet_id, row_number - 1, CTR_COLUMN as u32);
    backend
        .apply_number_format(&target.spreadsheet_id, range, NumberFormat::percent_one_decimal())
        .map_err(FormatError::Apply)
}

/// An in-process spreadsheet. Rows and formats live only as long as the
/// value does.
#[derive(Debug, Default)]
pub struct MemorySheet {
    sheets: RefCell<HashMap<String, MemoryWorksheet>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryWorksheet {
    pub sheet_id: i64,
    /// Row `i` holds one-based row `i + 1`. Unwritten rows are empty.
    pub rows: Vec<Vec<CellValue>>,
    pub formats: Vec<(GridRange, NumberFormat)>,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty worksheet.
    pub fn add_sheet(&self, sheet_name: &str, sheet_id: i64) {
        self.sheets
            .borrow_mut()
            .insert(sheet_name.to_owned(), MemoryWorksheet { sheet_id, ..Default::default() });
    }

    /// A copy of the worksheet's current contents.
    pub fn sheet(&self, sheet_name: &str) -> Option<MemoryWorksheet> {
        self.sheets.borrow().get(sheet_name).cloned()
    }
}

impl SheetBackend for MemorySheet {
    fn read_row_count(&self, target: &AppendTarget) -> anyhow::Result<u32> {
        let sheets = self.sheets.borrow();
        let sheet = sheets
            .get(&target.sheet_name)
            .ok_or_else(|| anyhow::anyhow!("unable to parse range: {}", target.sheet_name))?;
        Ok(sheet.rows.len() as u32)
    }

    fn write_row(&self, target: &AppendTarget, row_number: u32, row: &Row) -> anyhow::Result<String> {
        let mut sheets = self.sheets.borrow_mut();
        let sheet = sheets
            .get_mut(&target.sheet_name)
            .ok_or_else(|| anyhow::anyhow!("unable to parse range: {}", target.sheet_name))?;
        if row_number == 0 {
            anyhow::bail!("rows are numbered from 1");
        }
        let index = row_number as usize - 1;
        if sheet.rows.len() <= index {
            sheet.rows.resize(index + 1, Vec::new());
        }
        sheet.rows[index] = row.cells().to_vec();
        Ok(row_range(&target.sheet_name, row_number, row.cells().len()))
    }

    fn resolve_sheet_id(&self, target: &AppendTarget) -> anyhow::Result<Option<i64>> {
        Ok(self.sheets.borrow().get(&target.sheet_name).map(|sheet| sheet.sheet_id))
    }

    fn apply_number_format(
        &self,
        _spreadsheet_id: &str,
        range: GridRange,
        format: NumberFormat,
    ) -> anyhow::Result<()> {
        let mut sheets = self.sheets.borrow_mut();
        let sheet = sheets
            .values_mut()
            .find(|sheet| sheet.sheet_id == range.sheet_id)
            .ok_or_else(|| anyhow::anyhow!("no grid with id: {}", range.sheet_id))?;
        sheet.formats.push((range, format));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::metrics::{AnalyticsMetrics, SearchMetrics};
    use crate::reporting_window::compute_window;
    use crate::row::assemble;

    fn target() -> AppendTarget {
        AppendTarget { spreadsheet_id: "sheet".to_owned(), sheet_name: "2024".to_owned() }
    }

    fn sample_row() -> Row {
        let window = compute_window(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assemble(
            &window,
            &AnalyticsMetrics { users: 3, ..Default::default() },
            &SearchMetrics { ctr: 0.25, ..Default::default() },
            "0:00",
        )
    }

    /// Delegates to a `MemorySheet` but fails the chosen operations.
    struct Flaky {
        inner: MemorySheet,
        fail_read: bool,
        fail_write: bool,
        fail_lookup: bool,
        fail_format: bool,
    }

    impl Flaky {
        fn new() -> Self {
            let inner = MemorySheet::new();
            inner.add_sheet("2024", 77);
            Self { inner, fail_read: false, fail_write: false, fail_lookup: false, fail_format: false }
        }
    }

    impl SheetBackend for Flaky {
        fn read_row_count(&self, target: &AppendTarget) -> anyhow::Result<u32> {
            if self.fail_read {
                anyhow::bail!("read timed out");
            }
            self.inner.read_row_count(target)
        }

        fn write_row(&self, target: &AppendTarget, row_number: u32, row: &Row) -> anyhow::Result<String> {
            if self.fail_write {
                anyhow::bail!("quota exceeded");
            }
            self.inner.write_row(target, row_number, row)
        }

        fn resolve_sheet_id(&self, target: &AppendTarget) -> anyhow::Result<Option<i64>> {
            if self.fail_lookup {
                anyhow::bail!("metadata unavailable");
            }
            self.inner.resolve_sheet_id(target)
        }

        fn apply_number_format(
            &self,
            spreadsheet_id: &str,
            range: GridRange,
            format: NumberFormat,
        ) -> anyhow::Result<()> {
            if self.fail_format {
                anyhow::bail!("formatting rejected");
            }
            self.inner.apply_number_format(spreadsheet_id, range, format)
        }
    }

    #[test]
    fn appends_after_existing_rows_and_formats_ctr() {
        let sheet = MemorySheet::new();
        sheet.add_sheet("2024", 5);
        let header = sample_row();
        sheet.write_row(&target(), 1, &header).unwrap();
        sheet.write_row(&target(), 2, &header).unwrap();

        let appended = append(&sheet, &target(), &sample_row()).unwrap();
        assert_eq!(appended.row, 3);
        assert_eq!(appended.updated_range, "'2024'!A3:O3");
        assert_eq!(appended.sheet_id, Some(5));
        assert!(appended.ctr_formatted);

        let contents = sheet.sheet("2024").unwrap();
        assert_eq!(contents.rows.len(), 3);
        assert_eq!(contents.formats, vec![(GridRange::cell(5, 2, 13), NumberFormat::percent_one_decimal())]);
    }

    #[test]
    fn first_row_of_an_empty_sheet() {
        let sheet = MemorySheet::new();
        sheet.add_sheet("2024", 0);
        let appended = append(&sheet, &target(), &sample_row()).unwrap();
        assert_eq!(appended.row, 1);
        assert_eq!(sheet.sheet("2024").unwrap().formats[0].0.start_row_index, 0);
    }

    #[test]
    fn appending_twice_adds_two_rows() {
        let sheet = MemorySheet::new();
        sheet.add_sheet("2024", 1);
        let row = sample_row();
        let first = append(&sheet, &target(), &row).unwrap();
        let second = append(&sheet, &target(), &row).unwrap();
        assert_ne!(first.row, second.row);
        let contents = sheet.sheet("2024").unwrap();
        assert_eq!(contents.rows.len(), 2);
        assert_eq!(contents.rows[0], contents.rows[1]);
    }

    #[test]
    fn read_failure_writes_nothing() {
        let backend = Flaky { fail_read: true, ..Flaky::new() };
        let err = append(&backend, &target(), &sample_row()).unwrap_err();
        assert!(matches!(err, AppendError::ReadRowCount(_)));
        assert!(backend.inner.sheet("2024").unwrap().rows.is_empty());
    }

    #[test]
    fn write_failure_is_fatal() {
        let backend = Flaky { fail_write: true, ..Flaky::new() };
        let err = append(&backend, &target(), &sample_row()).unwrap_err();
        assert!(matches!(err, AppendError::WriteRow { row: 1, .. }));
        assert!(backend.inner.sheet("2024").unwrap().formats.is_empty());
    }

    #[test]
    fn format_failure_keeps_the_row() {
        let backend = Flaky { fail_format: true, ..Flaky::new() };
        let appended = append(&backend, &target(), &sample_row()).unwrap();
        assert!(!appended.ctr_formatted);
        assert_eq!(appended.sheet_id, Some(77));
        let contents = backend.inner.sheet("2024").unwrap();
        assert_eq!(contents.rows.len(), 1);
        assert!(contents.formats.is_empty());
    }

    #[test]
    fn lookup_failure_keeps_the_row() {
        let backend = Flaky { fail_lookup: true, ..Flaky::new() };
        let appended = append(&backend, &target(), &sample_row()).unwrap();
        assert!(!appended.ctr_formatted);
        assert_eq!(appended.sheet_id, None);
        assert_eq!(backend.inner.sheet("2024").unwrap().rows.len(), 1);
    }

    #[test]
    fn unknown_sheet_cannot_be_read() {
        let sheet = MemorySheet::new();
        assert!(matches!(
            append(&sheet, &target(), &sample_row()),
            Err(AppendError::ReadRowCount(_))
        ));
    }
}
