//! Error types for settings loading and persistence.

use thiserror::Error;

/// Errors raised while loading, validating or saving settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error while touching the settings file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The blob could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// One or more settings failed validation.
    #[error("Invalid settings: {}", format_validation(.0))]
    Invalid(Vec<ValidationError>),

    /// The host refused to persist the blob.
    #[error("Settings store error: {0}")]
    Store(String),
}

/// A single settings validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A numeric value is outside its accepted range
    OutOfRange {
        /// Setting name as it appears in the persisted blob
        field: &'static str,
        /// Offending value
        value: u64,
        /// Inclusive lower bound
        min: u64,
        /// Inclusive upper bound
        max: u64,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange {
                field,
                value,
                min,
                max,
            } => write!(f, "{field} = {value} (expected {min}..={max})"),
        }
    }
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
