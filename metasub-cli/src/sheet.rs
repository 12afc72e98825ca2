//! Workbook reading
//!
//! Thin layer over calamine: pulls each category worksheet into raw typed
//! cells and checks its header row against the catalog. All normalization
//! and validation happens later, in the validator.

use std::path::Path;

use anyhow::{Context, Result};
use calamine::{Data, Reader, Xlsx, open_workbook};
use chrono::{Duration, NaiveDate};

use crate::catalog::SchemaCatalog;

/// Row index of the column header row (row 0 names the sheet itself)
pub const HEADER_ROW: usize = 1;
/// Row index of the first data row
pub const DATA_START_ROW: usize = 2;

/// Worksheets that never hold records
const SKIPPED_SHEETS: [&str; 2] = ["Instructions", "Lists"];

/// One workbook cell, typed the way the spreadsheet typed it
#[derive(Debug, Clone, PartialEq)]
pub enum SheetCell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
}

impl SheetCell {
    pub fn is_empty(&self) -> bool {
        matches!(self, SheetCell::Empty)
    }

    /// The cell as display text, the way it would read in the workbook
    pub fn as_text(&self) -> String {
        match self {
            SheetCell::Empty => String::new(),
            SheetCell::Text(s) => s.clone(),
            SheetCell::Number(n) => format!("{}", n),
            SheetCell::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            SheetCell::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

/// One data row with its 1-based workbook row number for error context
#[derive(Debug, Clone)]
pub struct RawRow {
    pub row_number: usize,
    pub cells: Vec<SheetCell>,
}

/// One category worksheet, headers and data rows as read
#[derive(Debug, Clone)]
pub struct RawSheet {
    /// Worksheet name, matching a catalog sheet name (e.g., "Biosample")
    pub category: String,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Read every recognized category worksheet from an xlsx workbook.
///
/// Unknown worksheets are skipped with a warning; header mismatches against
/// the catalog are warned about but never fatal, since the validator filters
/// columns again per cell.
pub fn read_workbook(path: &Path, catalog: &SchemaCatalog) -> Result<Vec<RawSheet>> {
    let mut workbook: Xlsx<_> = open_workbook(path)
        .with_context(|| format!("Failed to open workbook: {}", path.display()))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let mut sheets = Vec::new();

    for sheet_name in sheet_names {
        if SKIPPED_SHEETS.contains(&sheet_name.as_str()) {
            continue;
        }
        if !catalog.contains(&sheet_name) {
            log::warn!("skipping unrecognized worksheet {}", sheet_name);
            continue;
        }

        let range = workbook
            .worksheet_range(&sheet_name)
            .with_context(|| format!("Failed to read worksheet: {}", sheet_name))?;
        let rows: Vec<Vec<Data>> = range.rows().map(|r| r.to_vec()).collect();

        if rows.len() <= HEADER_ROW {
            log::warn!("worksheet {} has no header row, skipping", sheet_name);
            continue;
        }

        let headers: Vec<String> = rows[HEADER_ROW]
            .iter()
            .map(|c| match c {
                Data::String(s) => s.trim_end().to_string(),
                other => cell_from_data(other).as_text(),
            })
            .collect();

        let mut data_rows = Vec::new();
        for (index, row) in rows.iter().enumerate().skip(DATA_START_ROW) {
            let cells: Vec<SheetCell> = row.iter().map(cell_from_data).collect();
            if cells.iter().all(SheetCell::is_empty) {
                continue;
            }
            data_rows.push(RawRow {
                row_number: index + 1,
                cells,
            });
        }

        let sheet = RawSheet {
            category: sheet_name,
            headers,
            rows: data_rows,
        };
        verify_headers(catalog, &sheet);
        sheets.push(sheet);
    }

    Ok(sheets)
}

/// Warn about columns the catalog expects but the worksheet lacks, and
/// columns the worksheet carries but the catalog does not know.
fn verify_headers(catalog: &SchemaCatalog, sheet: &RawSheet) {
    let Ok(schema) = catalog.schema_for(&sheet.category) else {
        return;
    };
    let expected = schema.all_column_labels();

    for label in &expected {
        if !sheet.headers.iter().any(|h| h == label) {
            log::warn!(
                "column {} is missing in worksheet {}; the template may predate store version {}",
                label,
                sheet.category,
                catalog.version()
            );
        }
    }
    for header in &sheet.headers {
        if header.is_empty() {
            continue;
        }
        if !expected.iter().any(|label| label == header) {
            log::warn!(
                "the store does not know column {} in worksheet {}; its cells will be skipped",
                header,
                sheet.category
            );
        }
    }
}

fn cell_from_data(data: &Data) -> SheetCell {
    match data {
        Data::Empty => SheetCell::Empty,
        Data::String(s) => {
            let trimmed = s.trim_end();
            if trimmed.is_empty() {
                SheetCell::Empty
            } else {
                SheetCell::Text(trimmed.to_string())
            }
        }
        Data::Int(i) => SheetCell::Number(*i as f64),
        Data::Float(f) => SheetCell::Number(*f),
        Data::Bool(b) => SheetCell::Bool(*b),
        Data::DateTime(dt) => match excel_serial_to_date(dt.as_f64()) {
            Some(date) => SheetCell::Date(date),
            None => SheetCell::Empty,
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => SheetCell::Text(s.clone()),
        Data::Error(_) => SheetCell::Empty,
    }
}

/// Serial day count in the 1900 date system (day 0 = 1899-12-30)
pub(crate) fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(Duration::days(serial as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excel_serial_to_date() {
        assert_eq!(
            excel_serial_to_date(25569.0),
            NaiveDate::from_ymd_opt(1970, 1, 1)
        );
        assert_eq!(
            excel_serial_to_date(43831.0),
            NaiveDate::from_ymd_opt(2020, 1, 1)
        );
    }

    #[test]
    fn test_cell_from_data_trims_and_empties() {
        assert_eq!(
            cell_from_data(&Data::String("Liver  ".to_string())),
            SheetCell::Text("Liver".to_string())
        );
        assert_eq!(cell_from_data(&Data::String("   ".to_string())), SheetCell::Empty);
        assert_eq!(cell_from_data(&Data::Empty), SheetCell::Empty);
        assert_eq!(cell_from_data(&Data::Int(3)), SheetCell::Number(3.0));
        assert_eq!(cell_from_data(&Data::Bool(true)), SheetCell::Bool(true));
    }

    #[test]
    fn test_as_text() {
        assert_eq!(SheetCell::Number(5.0).as_text(), "5");
        assert_eq!(SheetCell::Number(5.25).as_text(), "5.25");
        assert_eq!(SheetCell::Bool(false).as_text(), "FALSE");
        assert_eq!(
            SheetCell::Date(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()).as_text(),
            "1970-01-01"
        );
        assert_eq!(SheetCell::Empty.as_text(), "");
    }
}
