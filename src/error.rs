//! Error types for the roster pipeline.

use thiserror::Error;

/// Errors raised while validating or parsing an uploaded roster file
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileError {
    /// No file was attached to the request
    #[error("No file uploaded")]
    Missing,

    /// Extension is not one of the accepted spreadsheet types
    #[error("Invalid file type. Allowed types: {allowed}")]
    InvalidType { allowed: String },

    /// File is bigger than the configured byte limit
    #[error("File size exceeds {limit_mb}MB limit")]
    TooLarge { limit_mb: usize },

    /// Parsed file holds no data rows
    #[error("File contains no data")]
    Empty,

    /// Required columns are absent from the parsed header
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// The content could not be decoded as CSV or Excel
    #[error("Error processing file: {0}")]
    Unreadable(String),
}

impl From<csv::Error> for FileError {
    fn from(err: csv::Error) -> Self {
        FileError::Unreadable(err.to_string())
    }
}

impl From<calamine::Error> for FileError {
    fn from(err: calamine::Error) -> Self {
        FileError::Unreadable(err.to_string())
    }
}

/// Errors in process configuration or batch setup
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Email credentials not properly configured")]
    MissingCredentials,

    #[error("Invalid value {value:?} for {key}")]
    Invalid { key: String, value: String },

    #[error("SMTP setup failed: {0}")]
    Smtp(String),
}

/// Per-recipient delivery failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("Invalid address {0:?}")]
    Address(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Transport(String),

    #[error("Send timed out")]
    Timeout,

    #[error("Send aborted before completion")]
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Column not found: {0}")]
    KeyMissing(String),
}

/// Errors while rendering a message body or building its attachments
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Template error: {0}")]
    Template(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Composition did not finish: {0}")]
    Interrupted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message_lists_names() {
        let err = FileError::MissingColumns(vec!["Route No".into(), "Name".into()]);
        assert_eq!(err.to_string(), "Missing required columns: Route No, Name");
    }

    #[test]
    fn test_too_large_message() {
        let err = FileError::TooLarge { limit_mb: 25 };
        assert_eq!(err.to_string(), "File size exceeds 25MB limit");
    }
}
