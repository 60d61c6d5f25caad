//! Error types for the trend pipeline
//!
//! Data-quality problems (malformed dates, unidentified species codes) are
//! recovered where they are found and only logged. Fit failures are isolated
//! per fit unit. Key-merge violations are fatal for the whole pipeline run.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrendError>;

#[derive(Debug, Error)]
pub enum TrendError {
    /// A date string did not match any accepted format.
    #[error("Malformed date '{value}' (expected one of {formats:?})")]
    MalformedDate { value: String, formats: Vec<String> },

    /// A species code is in the excluded sentinel set.
    #[error("Unidentified category '{code}'")]
    UnidentifiedCategory { code: String },

    /// The chosen model could not be fitted for one unit of work.
    #[error("Model did not converge for {unit}: {reason}")]
    ModelNonConvergence { unit: String, reason: String },

    /// Aggregated counts and the complete key set disagree.
    #[error("Dimension mismatch while merging counts: {reason}")]
    DimensionMismatch { reason: String },

    /// Not enough data to compute a quantity.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// A required input column is absent after header sanitization.
    #[error("Missing column '{column}' (available: {available:?})")]
    MissingColumn { column: String, available: Vec<String> },

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),
}

impl TrendError {
    pub(crate) fn non_convergence(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        TrendError::ModelNonConvergence {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that must halt the pipeline instead of being reported per unit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TrendError::DimensionMismatch { .. } | TrendError::Polars(_)
        )
    }
}
