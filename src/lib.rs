//! Survey Trends
//!
//! Population trend analysis for repeated wildlife transect surveys
//! (amphibian egg masses, amphibian adults, squirrel calls).
//!
//! Module layout follows the processing order:
//! - `data`: table loading with Polars
//! - `utils`: header, date and label normalization
//! - `trend`: aggregation, imputation, model selection, fitting, diagnostics
//! - `stats`: GLM and mixed-model numerics
//! - `pipeline`: per-configuration coordinator
//! - `report`: output tables

pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod stats;
pub mod trend;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::{AnalysisConfig, GroupingScheme, LogOffset, PipelineConfig};
pub use error::{Result, TrendError};
pub use pipeline::{FailureStage, PipelineReport, TrendPipeline, UnitFailure, UnitTrend};
pub use trend::{FittedCurve, FittedModel, ModelKind, ResidualDiagnostics, TrendModel};
pub use types::{CountRecord, FitUnit, GroupKey, Observation, ALL_SPECIES};
