//! Error types for patch indexing, cropping and stitching.

use thiserror::Error;

use crate::split::DataSplit;

/// Result type alias using SplitError.
pub type SplitResult<T> = Result<T, SplitError>;

/// Primary error type for the patch-grid subsystem.
#[derive(Debug, Error)]
pub enum SplitError {
    // === Configuration Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown {kind}: '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    // === Addressing Errors ===
    #[error("Patch index {index} out of range (grid count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Region {requested} is outside bounds {bounds}")]
    OutOfBounds { requested: String, bounds: String },

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("No index manager registered for split '{0}'")]
    NotRegistered(DataSplit),

    // === Infrastructure Errors ===
    #[error("IO error: {0}")]
    Io(String),

    #[error("Image encoding error: {0}")]
    Image(String),
}

impl SplitError {
    /// Create an InvalidConfig error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an OutOfBounds error.
    pub fn out_of_bounds(requested: impl Into<String>, bounds: impl Into<String>) -> Self {
        Self::OutOfBounds {
            requested: requested.into(),
            bounds: bounds.into(),
        }
    }

    /// Create a ShapeMismatch error from anything debug-printable.
    pub fn shape_mismatch(expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> Self {
        Self::ShapeMismatch {
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }

    /// Whether this error points at a caller bug rather than bad input data.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            SplitError::IndexOutOfRange { .. } | SplitError::NotRegistered(_)
        )
    }
}

impl From<std::io::Error> for SplitError {
    fn from(err: std::io::Error) -> Self {
        SplitError::Io(err.to_string())
    }
}

impl From<image::ImageError> for SplitError {
    fn from(err: image::ImageError) -> Self {
        SplitError::Image(err.to_string())
    }
}

impl From<serde_json::Error> for SplitError {
    fn from(err: serde_json::Error) -> Self {
        SplitError::InvalidConfig(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SplitError::IndexOutOfRange { index: 12, count: 12 };
        assert_eq!(err.to_string(), "Patch index 12 out of range (grid count 12)");

        let err = SplitError::NotRegistered(DataSplit::Val);
        assert_eq!(err.to_string(), "No index manager registered for split 'val'");
    }

    #[test]
    fn test_programmer_errors() {
        assert!(SplitError::IndexOutOfRange { index: 1, count: 0 }.is_programmer_error());
        assert!(!SplitError::invalid_config("bad").is_programmer_error());
        assert!(!SplitError::shape_mismatch((1, 2), (3, 4)).is_programmer_error());
    }
}
