use arrow_schema::ArrowError;
use std::fmt;

use crate::structs::PartialTable;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Error connecting to store: {0}")]
    StoreConnection(String),
    #[error("Store Error: {0}")]
    Store(String),
    #[error("Malformed item at index {index}: {message}")]
    MalformedItem { index: usize, message: String },
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("Secret Error: {0}")]
    Secret(String),
    #[error("Base64 Error in '{field}': {source}")]
    Base64 {
        field: &'static str,
        source: base64::DecodeError,
    },
    #[error("UTF-8 Error in '{field}': {source}")]
    Utf8 {
        field: &'static str,
        source: std::string::FromUtf8Error,
    },
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parquet Error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Arrow Error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Data Error: {0}")]
    Data(String),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Record field that failed to convert during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Time,
    Value,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Time => f.write_str("time"),
            Field::Value => f.write_str("value"),
        }
    }
}

/// A row whose `time` or `value` could not be parsed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Error converting '{field}' at row {row} ({raw:?}): {message}")]
pub struct ConversionError {
    pub field: Field,
    pub row: usize,
    pub raw: String,
    pub message: String,
}

/// Normalization failure together with the table state at the point of failure.
///
/// `partial.converted` holds every row converted before the failing one and
/// `partial.pending` starts with the offending row.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct NormalizeFailure {
    #[source]
    pub error: ConversionError,
    pub partial: PartialTable,
}

impl From<NormalizeFailure> for PipelineError {
    fn from(failure: NormalizeFailure) -> Self {
        PipelineError::Conversion(failure.error)
    }
}
