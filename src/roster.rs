use serde::ser::{Serialize, SerializeMap, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Placeholder stored for every missing or empty cell
pub const MISSING_PLACEHOLDER: &str = "N/A";

/// Recipient column of the employee roster
pub const EMAIL_COLUMN: &str = "Email";
pub const ROUTE_COLUMN: &str = "Route No";
pub const VENDOR_NAME_COLUMN: &str = "Vendor Names";
pub const VENDOR_EMAIL_COLUMN: &str = "Vendor Emails";

/// Columns a vendor roster must carry to be accepted
pub const VENDOR_REQUIRED_COLUMNS: [&str; 5] =
    ["S No", "Route No", "Name", "Vendor Names", "Vendor Emails"];

/// A single cell as read from the uploaded sheet
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl CellValue {
    pub fn missing() -> Self {
        CellValue::Text(MISSING_PLACEHOLDER.to_string())
    }

    /// Parse a raw text cell the way a dataframe reader types it: integer, then float, then text.
    /// Empty input becomes the missing placeholder.
    pub fn infer(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::missing();
        }
        if let Ok(i) = raw.parse::<i64>() {
            return CellValue::Int(i);
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => CellValue::Float(f),
            // "nan", "inf" and friends stay text
            _ => CellValue::Text(raw.to_string()),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            CellValue::Bool(_) => 0,
            CellValue::Int(_) | CellValue::Float(_) => 1,
            CellValue::Text(_) => 2,
        }
    }

    /// Total order used for sorting: numbers numerically, text lexically,
    /// and across kinds booleans < numbers < text.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (CellValue::Int(a), CellValue::Int(b)) => a.cmp(b),
            (CellValue::Int(a), CellValue::Float(b)) => (*a as f64).total_cmp(b),
            (CellValue::Float(a), CellValue::Int(b)) => a.total_cmp(&(*b as f64)),
            (CellValue::Float(a), CellValue::Float(b)) => a.total_cmp(b),
            (CellValue::Text(a), CellValue::Text(b)) => a.cmp(b),
            (CellValue::Bool(a), CellValue::Bool(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Text(s) => serializer.serialize_str(s),
            CellValue::Int(i) => serializer.serialize_i64(*i),
            CellValue::Float(v) => serializer.serialize_f64(*v),
            CellValue::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

/// One roster record. All rows of a set share the same column schema.
#[derive(Clone, Debug, PartialEq)]
pub struct RosterRow {
    columns: Arc<[String]>,
    cells: Vec<CellValue>,
}

impl RosterRow {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.cells.get(idx))
    }

    /// Cell rendered as text, trimmed; `None` when the column does not exist.
    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).map(|v| v.to_string().trim().to_string())
    }

    pub fn values(&self) -> impl Iterator<Item = &CellValue> {
        self.cells.iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.cells.iter())
    }
}

// Serialized as a JSON object with keys in column order
impl Serialize for RosterRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Ordered rows of one upload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RosterSet {
    columns: Arc<[String]>,
    rows: Vec<RosterRow>,
}

impl RosterSet {
    pub fn new(columns: Vec<String>) -> Self {
        RosterSet {
            columns: columns.into(),
            rows: Vec::new(),
        }
    }

    /// Append a row. Cells beyond the schema are dropped, missing ones padded with the placeholder.
    pub fn push(&mut self, mut cells: Vec<CellValue>) {
        cells.truncate(self.columns.len());
        while cells.len() < self.columns.len() {
            cells.push(CellValue::missing());
        }
        self.rows.push(RosterRow {
            columns: Arc::clone(&self.columns),
            cells,
        });
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn rows(&self) -> &[RosterRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<'a> IntoIterator for &'a RosterSet {
    type Item = &'a RosterRow;
    type IntoIter = std::slice::Iter<'a, RosterRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
