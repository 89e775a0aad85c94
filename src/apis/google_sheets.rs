pub mod spreadsheet;

use anyhow::{anyhow, Context as _};
use serde_json::json;
use spreadsheet::update::Request;
use spreadsheet::{
    CellData, CellFormat, GridRange, NumberFormat, Spreadsheet, UpdateValuesResponse, ValueRange,
};
use tracing::{debug, trace, warn};
use url::Url;

use super::GoogleApiClient;
use crate::row::Row;
use crate::sheet_appender::{AppendTarget, SheetBackend};

/// `SheetBackend` over the Google Sheets v4 REST API.
pub struct GoogleSheets<'c> {
    client: &'c GoogleApiClient,
}

impl<'c> GoogleSheets<'c> {
    pub fn new(client: &'c GoogleApiClient) -> Self {
        Self { client }
    }
}

/// Builds `spreadsheets/{id}/...` with every segment percent-encoded.
fn endpoint(base: &str, segments: &[&str]) -> anyhow::Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("invalid Sheets endpoint {base}"))?;
    url.path_segments_mut()
        .map_err(|()| anyhow!("endpoint URL cannot have path segments"))?
        .extend(segments);
    Ok(url)
}

impl GoogleSheets<'_> {
    fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        endpoint(&self.client.endpoints().sheets, segments)
    }
}

impl SheetBackend for GoogleSheets<'_> {
    fn read_row_count(&self, target: &AppendTarget) -> anyhow::Result<u32> {
        let range = spreadsheet::quote_sheet_name(&target.sheet_name);
        let url = self.endpoint(&[target.spreadsheet_id.as_str(), "values", range.as_str()])?;
        let value_range: ValueRange = self.client.call("read the sheet values", |http| {
            http.get(url.clone()).query(&[("majorDimension", "ROWS")])
        })?;
        let count = value_range.values.len();
        debug!("Sheet {:?} has {} used rows", target.sheet_name, count);
        u32::try_from(count).context("row count does not fit in a sheet")
    }

    fn write_row(&self, target: &AppendTarget, row_number: u32, row: &Row) -> anyhow::Result<String> {
        let range = spreadsheet::row_range(&target.sheet_name, row_number, row.cells().len());
        let url = self.endpoint(&[target.spreadsheet_id.as_str(), "values", range.as_str()])?;
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": [row],
        });
        let response: UpdateValuesResponse = self.client.call("write the report row", |http| {
            http.put(url.clone()).query(&[("valueInputOption", "USER_ENTERED")]).json(&body)
        })?;
        trace!("Updated {:?} cells", response.updated_cells);
        Ok(response.updated_range.unwrap_or_else(|| {
            warn!("No updated range returned in response to writing the row");
            range
        }))
    }

    fn resolve_sheet_id(&self, target: &AppendTarget) -> anyhow::Result<Option<i64>> {
        let url = self.endpoint(&[target.spreadsheet_id.as_str()])?;
        let spreadsheet: Spreadsheet = self.client.call("read the spreadsheet metadata", |http| {
            http.get(url.clone()).query(&[("fields", "sheets.properties(sheetId,title)")])
        })?;
        Ok(find_sheet_id(&spreadsheet, &target.sheet_name))
    }

    fn apply_number_format(
        &self,
        spreadsheet_id: &str,
        range: GridRange,
        format: NumberFormat,
    ) -> anyhow::Result<()> {
        let batch_update = format!("{spreadsheet_id}:batchUpdate");
        let url = self.endpoint(&[batch_update.as_str()])?;
        let requests = [Request::RepeatCell {
            range,
            cell: CellData { user_entered_format: CellFormat { number_format: format } },
            fields: "userEnteredFormat.numberFormat",
        }];
        let body = json!({ "requests": requests });
        let response: serde_json::Value = self
            .client
            .call("format the CTR cell", |http| http.post(url.clone()).json(&body))?;
        trace!("Received replies to formatting: {}", response);
        Ok(())
    }
}

fn find_sheet_id(spreadsheet: &Spreadsheet, sheet_name: &str) -> Option<i64> {
    spreadsheet
        .sheets
        .iter()
        .map(|sheet| &sheet.properties)
        .find(|properties| properties.title.as_deref() == Some(sheet_name))
        .and_then(|properties| properties.sheet_id)
}
