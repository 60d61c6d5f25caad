//! Residual diagnostics
//!
//! Residuals are averaged within each year, an intercept-only model is fitted
//! to the yearly means, and its residuals are tested for serial correlation.
//!
//! Durbin-Watson p-values use the exact null mean and variance of d for an
//! intercept-only design with `n` years:
//!   E[d] = 2,  Var[d] = 4(n − 2) / ((n − 1)(n + 1))
//! and a normal approximation. Results are reported for review only.

use crate::error::{Result, TrendError};
use crate::stats::normal_cdf;
use crate::trend::fitter::FittedModel;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResidualDiagnostics {
    /// (year, mean residual)
    pub yearly_residuals: Vec<(i32, f64)>,
    pub durbin_watson: f64,
    pub lag1_autocorrelation: f64,
    /// H1: positive autocorrelation (d < 2)
    pub p_positive: f64,
    /// H1: negative autocorrelation (d > 2)
    pub p_negative: f64,
    pub p_two_sided: f64,
}

/// Mean residual per year, in year order
pub fn yearly_mean_residuals(fitted: &FittedModel) -> Vec<(i32, f64)> {
    let mut sums: BTreeMap<i32, (f64, usize)> = BTreeMap::new();
    for (record, residual) in fitted.records.iter().zip(&fitted.residuals) {
        let entry = sums.entry(record.key.year).or_insert((0.0, 0));
        entry.0 += residual;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(year, (sum, n))| (year, sum / n as f64))
        .collect()
}

/// Durbin-Watson statistic of a residual series
pub fn durbin_watson(residuals: &[f64]) -> f64 {
    let num: f64 = residuals.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    let den: f64 = residuals.iter().map(|e| e * e).sum();
    num / den
}

fn lag1_autocorrelation(residuals: &[f64]) -> f64 {
    let num: f64 = residuals.windows(2).map(|w| w[0] * w[1]).sum();
    let den: f64 = residuals.iter().map(|e| e * e).sum();
    num / den
}

/// Autocorrelation checks on the year-averaged residuals of a fit
pub fn check_residuals(fitted: &FittedModel) -> Result<ResidualDiagnostics> {
    if fitted.residuals.iter().any(|r| !r.is_finite()) {
        return Err(TrendError::InsufficientData(format!(
            "{}: non-finite residuals (log of zero count without offset)",
            fitted.unit
        )));
    }

    let yearly = yearly_mean_residuals(fitted);
    let n = yearly.len();
    if n < 3 {
        return Err(TrendError::InsufficientData(format!(
            "{}: {} years is too few for a serial-correlation test",
            fitted.unit, n
        )));
    }

    // Intercept-only model: residuals are deviations from the grand mean
    let grand_mean = yearly.iter().map(|(_, r)| r).sum::<f64>() / n as f64;
    let null_residuals: Vec<f64> = yearly.iter().map(|(_, r)| r - grand_mean).collect();
    if null_residuals.iter().all(|e| e.abs() < 1e-14) {
        return Err(TrendError::InsufficientData(format!(
            "{}: yearly residuals have no variation",
            fitted.unit
        )));
    }

    let d = durbin_watson(&null_residuals);
    let nf = n as f64;
    let variance = 4.0 * (nf - 2.0) / ((nf - 1.0) * (nf + 1.0));
    let z = (d - 2.0) / variance.sqrt();

    let p_positive = normal_cdf(z);
    let p_negative = 1.0 - p_positive;
    let p_two_sided = (2.0 * p_positive.min(p_negative)).min(1.0);

    Ok(ResidualDiagnostics {
        yearly_residuals: yearly,
        durbin_watson: d,
        lag1_autocorrelation: lag1_autocorrelation(&null_residuals),
        p_positive,
        p_negative,
        p_two_sided,
    })
}
