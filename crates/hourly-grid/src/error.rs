//! Error types for hourly grid storage.

use thiserror::Error;

/// Errors that can occur while reading or updating an hourly grid dataset.
#[derive(Error, Debug)]
pub enum GridStoreError {
    /// The hour lies outside the dataset's fixed time window.
    #[error("hour {hour} is outside the dataset window {start} thru {end}")]
    OutOfRange {
        hour: String,
        start: String,
        end: String,
    },

    /// A slice does not fit inside the time dimension of the array.
    #[error("slice of {count} hours at offset {offset} exceeds dataset length of {len} hours")]
    Bounds {
        offset: usize,
        count: usize,
        len: usize,
    },

    /// The write would replace data from a more trusted stream.
    #[error("{stream} data at {hour} may not replace or overlap {senior} data ending at {senior_end}")]
    PrecedenceViolation {
        stream: String,
        hour: String,
        senior: String,
        senior_end: String,
    },

    /// Unknown gap fill policy.
    #[error("\"{0}\" fill method is not supported, must be one of \"average\", \"copy\", \"scaled\" or a number")]
    UnsupportedFillMethod(String),

    /// A grid does not match the dataset's (lat, lon) shape.
    #[error("grid shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// The caller passed something unusable (e.g. an empty batch).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Dataset attributes are missing or malformed.
    #[error("invalid dataset metadata: {0}")]
    InvalidMetadata(String),

    /// Storage/IO error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A time string could not be parsed.
    #[error("invalid time: {0}")]
    TimeParse(String),
}

impl GridStoreError {
    /// Create a Storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an InvalidMetadata error.
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// True for errors raised by the source precedence rules.
    pub fn is_precedence_violation(&self) -> bool {
        matches!(self, Self::PrecedenceViolation { .. })
    }
}

impl From<std::io::Error> for GridStoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for GridStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

impl From<serde_yaml::Error> for GridStoreError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for hourly grid operations.
pub type Result<T> = std::result::Result<T, GridStoreError>;
