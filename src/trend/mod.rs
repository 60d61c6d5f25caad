//! Trend pipeline stages
//!
//! Each stage lives in its own module and takes immutable input:
//! aggregator → imputer → selector → fitter → diagnostics.

pub mod aggregator;
pub mod diagnostics;
pub mod fitter;
pub mod imputer;
pub mod selector;

// Re-export stage functions
pub use aggregator::{aggregate, Aggregation, DataQuality};
pub use diagnostics::{check_residuals, durbin_watson, ResidualDiagnostics};
pub use fitter::{fit_trend, fitted_curve, CurvePoint, FittedCurve, FittedModel, TrendModel};
pub use imputer::{average_visits, complete_key_set, impute};
pub use selector::ModelKind;
