use thiserror::Error;

use crate::geometry::Dimensions;

pub type Result<T, E = DriftwatchError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum DriftwatchError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("capture error: {0}")]
    Capture(String),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: Dimensions,
        actual: Dimensions,
    },
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("artifact error: {0}")]
    Artifact(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DriftwatchError {
    /// Capture failures are retried by the live loop; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriftwatchError::Capture(_))
    }

    pub fn mismatch(expected: Dimensions, actual: Dimensions) -> Self {
        DriftwatchError::DimensionMismatch { expected, actual }
    }
}
