use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors raised while analysing droplet data
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// No bin reaches the density threshold
    #[error("no liquid bins found at or above the density threshold")]
    EmptyDroplet,

    /// Liquid split into disconnected islands in single-droplet mode
    #[error("droplet is fragmented into {islands} disconnected islands")]
    DegenerateGeometry { islands: usize },

    /// Fit window exceeds the branch length
    #[error("contour branch has {available} points, fit window needs {required}")]
    InsufficientPoints { required: usize, available: usize },

    /// Droplet does not reach the requested substrate row
    #[error("droplet does not touch the substrate at z = {floor}")]
    NoSubstrateContact { floor: f64 },

    /// Timestamp is not strictly greater than the previous one
    #[error("timestamp {given} does not follow previous timestamp {last}")]
    NonMonotonicTime { last: f64, given: f64 },

    /// Aggregator was already finalized
    #[error("time series has already been finalized")]
    SeriesFinalized,

    #[error("invalid parameter {name} = {value}: expected {expected}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reason code recorded for a frame that could not be analysed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureReason {
    EmptyDroplet,
    DegenerateGeometry,
    InsufficientPoints,
    NoSubstrateContact,
    Other,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyDroplet => "empty_droplet",
            Self::DegenerateGeometry => "degenerate_geometry",
            Self::InsufficientPoints => "insufficient_points",
            Self::NoSubstrateContact => "no_substrate_contact",
            Self::Other => "other",
        }
    }
}

impl AnalysisError {
    /// Map an error to the reason code stored for a failed frame
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::EmptyDroplet => FailureReason::EmptyDroplet,
            Self::DegenerateGeometry { .. } => FailureReason::DegenerateGeometry,
            Self::InsufficientPoints { .. } => FailureReason::InsufficientPoints,
            Self::NoSubstrateContact { .. } => FailureReason::NoSubstrateContact,
            _ => FailureReason::Other,
        }
    }

    /// Whether the error describes bad frame data rather than misuse of the API
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyDroplet
                | Self::DegenerateGeometry { .. }
                | Self::InsufficientPoints { .. }
                | Self::NoSubstrateContact { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_codes() {
        let err = AnalysisError::InsufficientPoints { required: 5, available: 2 };
        assert_eq!(err.failure_reason(), FailureReason::InsufficientPoints);
        assert_eq!(err.failure_reason().code(), "insufficient_points");
        assert!(err.is_frame_error());
        assert!(!AnalysisError::SeriesFinalized.is_frame_error());
        assert_eq!(AnalysisError::SeriesFinalized.failure_reason(), FailureReason::Other);
    }
}
