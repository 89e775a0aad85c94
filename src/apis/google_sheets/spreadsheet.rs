//! Types mirroring the parts of the Sheets v4 REST resources this crate
//! reads and writes. See
//! https://developers.google.com/sheets/api/reference/rest/v4/spreadsheets

use serde::{Deserialize, Serialize};

/// The subset of a `Spreadsheet` resource returned with
/// `fields=sheets.properties(sheetId,title)`.
#[derive(Debug, Default, Deserialize)]
pub struct Spreadsheet {
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Sheet {
    #[serde(default)]
    pub properties: SheetProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    pub sheet_id: Option<i64>,
    pub title: Option<String>,
}

/// Returned by `spreadsheets.values.get`. `values` is absent when the range
/// holds no data.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateValuesResponse {
    pub updated_range: Option<String>,
    pub updated_cells: Option<u64>,
}

/// A rectangle of cells. Indexes are zero-based, start inclusive and end
/// exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRange {
    pub sheet_id: i64,
    pub start_row_index: u32,
    pub end_row_index: u32,
    pub start_column_index: u32,
    pub end_column_index: u32,
}

impl GridRange {
    /// The range covering the single cell at the zero-based `(row, column)`.
    pub fn cell(sheet_id: i64, row: u32, column: u32) -> Self {
        Self {
            sheet_id,
            start_row_index: row,
            end_row_index: row + 1,
            start_column_index: column,
            end_column_index: column + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NumberFormatType {
    Percent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NumberFormat {
    #[serde(rename = "type")]
    pub kind: NumberFormatType,
    pub pattern: String,
}

impl NumberFormat {
    /// Percentage with one decimal place, e.g. `1.0%`.
    pub fn percent_one_decimal() -> Self {
        Self { kind: NumberFormatType::Percent, pattern: "#0.0%".to_owned() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellFormat {
    pub number_format: NumberFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellData {
    pub user_entered_format: CellFormat,
}

pub mod update {
    use serde::Serialize;

    use super::{CellData, GridRange};

    /// One entry of a `batchUpdate` request body.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub enum Request {
        RepeatCell { range: GridRange, cell: CellData, fields: &'static str },
    }
}

/// Converts a zero-based column index into its letter name (0 -> A,
/// 25 -> Z, 26 -> AA).
pub fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8(name).expect("column names are ASCII")
}

/// Quotes a sheet title for use in A1 notation.
pub fn quote_sheet_name(sheet_name: &str) -> String {
    format!("'{}'", sheet_name.replace('\'', "''"))
}

/// A1 range spanning `width` cells of the one-based `row`, from column A.
pub fn row_range(sheet_name: &str, row: u32, width: usize) -> String {
    let last = column_name(width.saturating_sub(1));
    format!("{}!A{row}:{last}{row}", quote_sheet_name(sheet_name))
}
