//! Statistical models behind the trend fits
//!
//! - `glm`: quasi-Poisson regression (single transect)
//! - `mixed`: linear mixed model with crossed random intercepts, fitted by REML
//!   (multiple transects)
//! - `distributions`: t and normal tail probabilities
//! - `optimize`: bounded Nelder-Mead used to profile REML

pub mod distributions;
pub mod glm;
pub mod mixed;
pub mod optimize;

pub use distributions::{normal_cdf, student_t_two_sided};
pub use glm::{fit_quasi_poisson, GlmFit};
pub use mixed::{fit_crossed_intercepts, GroupingFactor, MixedFit};

use serde::Serialize;

/// Estimate and Wald-type test for one coefficient
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoefficientSummary {
    pub estimate: f64,
    pub std_error: f64,
    pub t_value: f64,
    /// Degrees of freedom used for the p-value
    pub df: f64,
    /// Two-sided p-value
    pub p_value: f64,
}

pub(crate) fn covariance_to_summary(estimate: f64, variance: f64, df: f64) -> CoefficientSummary {
    let std_error = variance.max(0.0).sqrt();
    let t_value = estimate / std_error;
    CoefficientSummary {
        estimate,
        std_error,
        t_value,
        df,
        p_value: student_t_two_sided(t_value, df),
    }
}
