use calamine::{Data, Range, Reader, open_workbook_auto_from_rs};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::config::{ALLOWED_EXTENSIONS, IngestLimits};
use crate::error::FileError;
use crate::roster::{CellValue, RosterSet};
use crate::sanitize_name;

/// A file received from an upload form
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Lowercased extension, if the name has one
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }
}

/// Turns uploaded CSV/Excel bytes into a [`RosterSet`]
#[derive(Debug, Clone)]
pub struct Ingestor {
    limits: IngestLimits,
    required_columns: Vec<String>,
}

impl Ingestor {
    pub fn new(limits: IngestLimits) -> Self {
        Self {
            limits,
            required_columns: Vec::new(),
        }
    }

    /// Require these columns to be present after truncation
    pub fn with_required_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Check presence, extension and size of an upload
    pub fn validate<'a>(
        &self,
        upload: Option<&'a UploadedFile>,
    ) -> Result<&'a UploadedFile, FileError> {
        let file = upload.ok_or(FileError::Missing)?;
        info!("Validating file: {}", file.name);

        match file.extension() {
            Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => {}
            _ => {
                return Err(FileError::InvalidType {
                    allowed: ALLOWED_EXTENSIONS.join(", "),
                });
            }
        }

        if file.bytes.len() > self.limits.max_file_size {
            return Err(FileError::TooLarge {
                limit_mb: self.limits.max_file_size / (1024 * 1024),
            });
        }

        Ok(file)
    }

    /// Validate and parse an upload into a roster
    pub fn ingest(&self, upload: Option<&UploadedFile>) -> Result<RosterSet, FileError> {
        let file = self.validate(upload)?;
        self.parse(file)
    }

    /// Parse an already validated upload
    pub fn parse(&self, file: &UploadedFile) -> Result<RosterSet, FileError> {
        let table = match file.extension().as_deref() {
            Some("csv") => {
                debug!("Reading CSV in chunks of size: {}", self.limits.chunk_size);
                read_csv(&file.bytes, self.limits.chunk_size)?
            }
            _ => read_excel(&file.bytes)?,
        };

        let roster = self.build_roster(table)?;
        info!(
            "Processed {}: {} rows x {} columns",
            file.name,
            roster.len(),
            roster.columns().len()
        );
        Ok(roster)
    }

    fn build_roster(&self, table: RawTable) -> Result<RosterSet, FileError> {
        let width = table.header.len().min(self.limits.max_columns);
        if table.header.len() > width {
            debug!("Truncating {} columns to {}", table.header.len(), width);
        }

        let mut header = table.header;
        header.truncate(width);
        let mut roster = RosterSet::new(header);
        for row in table.rows {
            roster.push(row);
        }

        if roster.is_empty() {
            return Err(FileError::Empty);
        }

        let missing: Vec<String> = self
            .required_columns
            .iter()
            .filter(|c| !roster.has_column(c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(FileError::MissingColumns(missing));
        }

        Ok(roster)
    }
}

/// Header plus typed data rows, before truncation
struct RawTable {
    header: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

fn read_csv(bytes: &[u8], chunk_size: usize) -> Result<RawTable, FileError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => normalize_header(record?.iter().map(str::to_string).collect()),
        None => return Err(FileError::Empty),
    };

    let mut rows = Vec::new();
    let mut chunk = Vec::with_capacity(chunk_size);
    for record in records {
        let record = record?;
        chunk.push(record.iter().map(CellValue::infer).collect::<Vec<_>>());
        if chunk.len() == chunk_size {
            debug!("Read CSV chunk of {} rows", chunk.len());
            rows.append(&mut chunk);
        }
    }
    rows.append(&mut chunk);

    Ok(RawTable { header, rows })
}

fn read_excel(bytes: &[u8]) -> Result<RawTable, FileError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range: Range<Data> = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| FileError::Unreadable("No sheets found in Excel file".to_string()))??;

    let mut sheet_rows = range.rows();
    let header = match sheet_rows.next() {
        Some(cells) => normalize_header(
            cells
                .iter()
                .map(|c| match c {
                    Data::Empty => String::new(),
                    other => cell_to_value(other).to_string(),
                })
                .collect(),
        ),
        None => return Err(FileError::Empty),
    };
    let rows = sheet_rows
        .map(|cells| cells.iter().map(cell_to_value).collect())
        .collect();

    Ok(RawTable { header, rows })
}

/// Convert a calamine cell to a roster value
fn cell_to_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::missing(),
        Data::String(s) => text_cell(s),
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                CellValue::Int(*f as i64)
            } else {
                CellValue::Float(*f)
            }
        }
        Data::Bool(b) => CellValue::Bool(*b),
        Data::Error(e) => CellValue::Text(format!("#ERROR: {:?}", e)),
        Data::DateTime(dt) => CellValue::Text(format!("{}", dt)),
        Data::DateTimeIso(s) => CellValue::Text(s.clone()),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

/// Excel string cells are kept as text, only trimmed
fn text_cell(raw: &str) -> CellValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        CellValue::missing()
    } else {
        CellValue::Text(trimmed.to_string())
    }
}

/// Name blank headers `Unnamed: <i>` and suffix duplicates with `.1`, `.2`, ...
fn normalize_header(raw: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.into_iter()
        .enumerate()
        .map(|(i, name)| {
            let name = name.trim();
            let base = if name.is_empty() {
                format!("Unnamed: {}", i)
            } else {
                name.to_string()
            };
            let count = seen.entry(base.clone()).or_insert(0);
            let unique = if *count == 0 {
                base
            } else {
                format!("{}.{}", base, count)
            };
            *count += 1;
            unique
        })
        .collect()
}

/// Save an upload under `<root>/<subdir>/` with a timestamped name, returning the full path
pub fn store_upload(root: &Path, subdir: &str, file: &UploadedFile) -> std::io::Result<PathBuf> {
    let dir = root.join(subdir);
    fs::create_dir_all(&dir)?;

    let path = Path::new(&file.name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(sanitize_name)
        .unwrap_or_else(|| "upload".to_string());
    let ext = file.extension().unwrap_or_default();
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");

    let mut target = dir.join(format!("{}_{}.{}", stem, stamp, ext));
    let mut attempt = 1;
    while target.exists() {
        target = dir.join(format!("{}_{}_{}.{}", stem, stamp, attempt, ext));
        attempt += 1;
    }

    fs::write(&target, &file.bytes)?;
    info!("Saved upload to {}", target.display());
    Ok(target)
}

/// Remove a saved upload after a failed parse
pub fn discard_upload(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}
