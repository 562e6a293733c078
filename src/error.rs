use chrono::NaiveDateTime;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessingError>;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),

    #[error("Attribute table error: {0}")]
    AttributeTable(#[from] shapefile::dbase::Error),

    #[error("Failed to replace output file: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    Settings(#[from] ::config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Fragment {path} unavailable: {reason}")]
    FragmentUnavailable { path: PathBuf, reason: String },

    #[error("Fragment {fragment} does not match the merged cube: {detail}")]
    SchemaMismatch { fragment: String, detail: String },

    #[error("Timestamp {timestamp} appears more than once")]
    DuplicateTimestamp { timestamp: NaiveDateTime },

    #[error("Region {region_code} does not overlap any grid cell")]
    NoOverlap { region_code: String },

    #[error("Region code {region_code} appears more than once in the boundary set")]
    DuplicateRegion { region_code: String },

    #[error("Duplicate statistic for region {region_code} on {date}")]
    DuplicateStatistic {
        region_code: String,
        date: chrono::NaiveDate,
    },

    #[error("Missing required data: {0}")]
    MissingData(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
}

impl ProcessingError {
    /// Wrap any read failure of a single fragment so the loader can skip it.
    pub fn fragment_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ProcessingError::FragmentUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
