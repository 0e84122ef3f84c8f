use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

use crate::error::ComposeError;
use crate::grouping::VendorPayload;
use crate::roster::{CellValue, RosterRow, RosterSet};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Excel's limit on worksheet name length
const MAX_SHEET_NAME: usize = 31;

/// Rows to write on one worksheet
pub struct SheetData<'a> {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<&'a RosterRow>,
}

impl From<XlsxError> for ComposeError {
    fn from(err: XlsxError) -> Self {
        ComposeError::Export(err.to_string())
    }
}

/// Convert a set of sheets to XLSX bytes
///
/// Each sheet gets a bold header row with its column names followed by one
/// line per roster row. Cells missing from a row are written empty.
pub fn to_xlsx(sheets: &[SheetData<'_>]) -> Result<Vec<u8>, ComposeError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let mut used_names: Vec<String> = Vec::new();

    for sheet in sheets {
        let mut worksheet = Worksheet::new();
        let name = unique_sheet_name(&sheet.name, &used_names);
        worksheet.set_name(&name)?;
        used_names.push(name);

        for (c, column) in sheet.columns.iter().enumerate() {
            worksheet.write_string_with_format(0, c as u16, column.as_str(), &header_format)?;
        }

        for (r, row) in sheet.rows.iter().enumerate() {
            let r = (r + 1) as u32;
            for (c, column) in sheet.columns.iter().enumerate() {
                let c = c as u16;
                match row.get(column) {
                    Some(CellValue::Text(s)) => {
                        worksheet.write_string(r, c, s.as_str())?;
                    }
                    Some(CellValue::Int(i)) => {
                        worksheet.write_number(r, c, *i as f64)?;
                    }
                    Some(CellValue::Float(f)) => {
                        worksheet.write_number(r, c, *f)?;
                    }
                    Some(CellValue::Bool(b)) => {
                        worksheet.write_boolean(r, c, *b)?;
                    }
                    None => {}
                }
            }
        }

        workbook.push_worksheet(worksheet);
    }

    Ok(workbook.save_to_buffer()?)
}

/// The whole roster on a single worksheet
pub fn roster_to_xlsx(roster: &RosterSet, sheet_name: &str) -> Result<Vec<u8>, ComposeError> {
    to_xlsx(&[SheetData {
        name: sheet_name.to_string(),
        columns: roster.columns().to_vec(),
        rows: roster.rows().iter().collect(),
    }])
}

/// Vendor workbook: all of the vendor's rows first, then one sheet per route.
/// Only `selected` columns are written when given, in the order the roster has them.
pub fn vendor_workbook(
    payload: &VendorPayload<'_>,
    selected: &[String],
) -> Result<Vec<u8>, ComposeError> {
    let all_columns = payload
        .rows
        .first()
        .map(|row| row.columns().to_vec())
        .unwrap_or_default();
    let columns: Vec<String> = if selected.is_empty() {
        all_columns
    } else {
        all_columns
            .into_iter()
            .filter(|c| selected.contains(c))
            .collect()
    };

    let mut sheets = vec![SheetData {
        name: payload.vendor.clone(),
        columns: columns.clone(),
        rows: payload.rows.clone(),
    }];
    for route in &payload.routes {
        sheets.push(SheetData {
            name: format!("Route {}", route.key),
            columns: columns.clone(),
            rows: route.rows.clone(),
        });
    }

    to_xlsx(&sheets)
}

/// Make a valid, unused worksheet name: no `[]:*?/\`, at most 31 characters
fn unique_sheet_name(raw: &str, used: &[String]) -> String {
    let cleaned: String = raw
        .chars()
        .map(|ch| match ch {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            other => other,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'');
    let base: String = if cleaned.is_empty() {
        "Sheet".to_string()
    } else {
        cleaned.chars().take(MAX_SHEET_NAME).collect()
    };

    let taken = |name: &str| used.iter().any(|u| u.eq_ignore_ascii_case(name));
    if !taken(&base) {
        return base;
    }

    let mut n = 2;
    loop {
        let suffix = format!(" ({})", n);
        let keep = MAX_SHEET_NAME - suffix.chars().count();
        let candidate: String = base.chars().take(keep).chain(suffix.chars()).collect();
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestLimits;
    use crate::grouping::{GroupingPolicy, vendor_payloads};
    use crate::loader::{Ingestor, UploadedFile};

    #[test]
    fn test_sheet_names() {
        assert_eq!(unique_sheet_name("Blue/Cabs [North]", &[]), "Blue_Cabs _North_");
        assert_eq!(unique_sheet_name("", &[]), "Sheet");
        let long = "x".repeat(40);
        assert_eq!(unique_sheet_name(&long, &[]).chars().count(), 31);

        let used = vec!["Route 1".to_string()];
        assert_eq!(unique_sheet_name("route 1", &used), "route 1 (2)");
    }

    #[test]
    fn test_roster_export_reparses() {
        let csv = "Name,Route No,Score\nAsha,4,9.5\nRavi,5,\n";
        let roster = Ingestor::new(IngestLimits::default())
            .ingest(Some(&UploadedFile::new("r.csv", csv.as_bytes().to_vec())))
            .unwrap();

        let bytes = roster_to_xlsx(&roster, "Employees").unwrap();
        let back = Ingestor::new(IngestLimits::default())
            .ingest(Some(&UploadedFile::new("r.xlsx", bytes)))
            .unwrap();

        assert_eq!(back.columns(), roster.columns());
        assert_eq!(back.len(), roster.len());
        assert_eq!(back.rows()[0].get("Route No"), Some(&CellValue::Int(4)));
        assert_eq!(back.rows()[0].get("Score"), Some(&CellValue::Float(9.5)));
        assert_eq!(back.rows()[1].text("Score").as_deref(), Some("N/A"));
    }

    #[test]
    fn test_vendor_workbook_selected_columns() {
        let csv = "S No,Route No,Name,Vendor Names,Vendor Emails\n\
                   1,10,A,Blue Cabs,ops@blue.example\n\
                   2,11,B,Blue Cabs,ops@blue.example\n";
        let roster = Ingestor::new(IngestLimits::default())
            .ingest(Some(&UploadedFile::new("v.csv", csv.as_bytes().to_vec())))
            .unwrap();
        let payloads = vendor_payloads(&roster, GroupingPolicy::Partition);

        let selected = vec!["Name".to_string(), "Route No".to_string()];
        let bytes = vendor_workbook(&payloads[0], &selected).unwrap();
        let back = Ingestor::new(IngestLimits::default())
            .ingest(Some(&UploadedFile::new("v.xlsx", bytes)))
            .unwrap();
        assert_eq!(back.columns(), ["Route No", "Name"]);
        assert_eq!(back.len(), 2);
    }
}
