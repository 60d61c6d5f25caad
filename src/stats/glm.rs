//! Quasi-Poisson GLM with log link
//!
//! Fitted by iteratively reweighted least squares on the design
//! `[1, year - mean(year)]`. Centering keeps X'WX well conditioned for
//! calendar years; coefficients are reported on the uncentered scale.
//!
//! Dispersion is the Pearson statistic over residual degrees of freedom, and
//! coefficient tests use the t distribution with those degrees of freedom.

use super::{covariance_to_summary, CoefficientSummary};
use crate::error::{Result, TrendError};
use nalgebra::{DMatrix, DVector};

const MAX_ITERATIONS: usize = 25;
const CONVERGENCE_EPS: f64 = 1e-8;

/// Fitted quasi-Poisson regression of counts on year
#[derive(Debug, Clone)]
pub struct GlmFit {
    pub intercept: CoefficientSummary,
    pub slope: CoefficientSummary,
    /// Pearson χ² / residual df
    pub dispersion: f64,
    pub deviance: f64,
    pub df_residual: usize,
    pub iterations: usize,
    /// Linear predictor per input row
    pub linear_predictor: Vec<f64>,
}

impl GlmFit {
    /// Prediction on the log (link) scale
    pub fn predict_link(&self, year: f64) -> f64 {
        self.intercept.estimate + self.slope.estimate * year
    }

    /// Prediction on the count (response) scale
    pub fn predict_response(&self, year: f64) -> f64 {
        self.predict_link(year).exp()
    }
}

fn poisson_deviance(y: &DVector<f64>, mu: &DVector<f64>) -> f64 {
    2.0 * y
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| {
            let term = if yi > 0.0 { yi * (yi / mi).ln() } else { 0.0 };
            term - (yi - mi)
        })
        .sum::<f64>()
}

/// Fit `log E[count] = b0 + b1 * year` with quasi-Poisson variance
///
/// `unit` only labels errors.
pub fn fit_quasi_poisson(unit: &str, years: &[f64], counts: &[f64]) -> Result<GlmFit> {
    let n = counts.len();
    const P: usize = 2;

    if years.len() != n {
        return Err(TrendError::non_convergence(unit, "years and counts differ in length"));
    }
    if n <= P {
        return Err(TrendError::non_convergence(
            unit,
            format!("{} rows is too few for a two-parameter model", n),
        ));
    }
    if counts.iter().any(|&y| !y.is_finite() || y < 0.0) {
        return Err(TrendError::non_convergence(unit, "counts must be finite and non-negative"));
    }
    if counts.iter().all(|&y| y == 0.0) {
        return Err(TrendError::non_convergence(unit, "all counts are zero"));
    }

    let center = years.iter().sum::<f64>() / n as f64;
    if years.iter().all(|&x| (x - center).abs() < 1e-12) {
        return Err(TrendError::non_convergence(unit, "only one distinct year"));
    }

    let x = DMatrix::from_fn(n, P, |i, j| if j == 0 { 1.0 } else { years[i] - center });
    let y = DVector::from_column_slice(counts);

    // Same starting point as the usual Poisson initialization
    let mut mu = y.map(|v| v + 0.1);
    let mut eta = mu.map(f64::ln);
    let mut deviance = poisson_deviance(&y, &mu);
    let mut beta = DVector::zeros(P);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=MAX_ITERATIONS {
        iterations = iter;

        let z = DVector::from_fn(n, |i, _| eta[i] + (y[i] - mu[i]) / mu[i]);
        let w = mu.clone();

        let xtw = DMatrix::from_fn(P, n, |j, i| x[(i, j)] * w[i]);
        let xtwx = &xtw * &x;
        let xtwz = &xtw * &z;

        let chol = xtwx.cholesky().ok_or_else(|| {
            TrendError::non_convergence(unit, "weighted normal equations are singular")
        })?;
        beta = chol.solve(&xtwz);

        eta = &x * &beta;
        mu = eta.map(f64::exp);
        if mu.iter().any(|m| !m.is_finite() || *m <= 0.0) {
            return Err(TrendError::non_convergence(unit, "fitted means left the valid range"));
        }

        let new_deviance = poisson_deviance(&y, &mu);
        let change = (new_deviance - deviance).abs() / (new_deviance.abs() + 0.1);
        deviance = new_deviance;
        if change < CONVERGENCE_EPS {
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(TrendError::non_convergence(
            unit,
            format!("IRLS did not converge in {} iterations", MAX_ITERATIONS),
        ));
    }

    let df_residual = n - P;
    let pearson: f64 = y
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| (yi - mi).powi(2) / mi)
        .sum();
    let dispersion = pearson / df_residual as f64;

    let xtw = DMatrix::from_fn(P, n, |j, i| x[(i, j)] * mu[i]);
    let unscaled = (&xtw * &x)
        .try_inverse()
        .ok_or_else(|| TrendError::non_convergence(unit, "information matrix is singular"))?;
    let centered_cov = unscaled * dispersion;

    // Undo centering: b0 = c0 - b1 * center
    let transform = DMatrix::from_row_slice(2, 2, &[1.0, -center, 0.0, 1.0]);
    let cov = &transform * centered_cov * transform.transpose();
    let estimates = [beta[0] - beta[1] * center, beta[1]];

    let df = df_residual as f64;
    let intercept = covariance_to_summary(estimates[0], cov[(0, 0)], df);
    let slope = covariance_to_summary(estimates[1], cov[(1, 1)], df);

    Ok(GlmFit {
        intercept,
        slope,
        dispersion,
        deviance,
        df_residual,
        iterations,
        linear_predictor: eta.iter().copied().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_recovers_exact_log_linear_trend() {
        let years: Vec<f64> = (2010..2020).map(|y| y as f64).collect();
        let counts: Vec<f64> = years.iter().map(|y| (1.2 + 0.15 * (y - 2010.0)).exp()).collect();

        let fit = fit_quasi_poisson("test", &years, &counts).unwrap();
        assert_relative_eq!(fit.slope.estimate, 0.15, epsilon = 1e-6);
        assert_relative_eq!(fit.predict_link(2010.0), 1.2, epsilon = 1e-6);
        assert!(fit.dispersion < 1e-8);
        assert_eq!(fit.df_residual, 8);
    }

    #[test]
    fn test_back_transform_matches_response_prediction() {
        let years = [2013.0, 2013.0, 2014.0, 2015.0, 2016.0, 2017.0];
        let counts = [3.0, 5.0, 2.0, 7.0, 9.0, 6.0];
        let fit = fit_quasi_poisson("test", &years, &counts).unwrap();

        for year in [2013.0, 2014.5, 2017.0] {
            assert_relative_eq!(
                fit.predict_link(year).exp(),
                fit.predict_response(year),
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn test_zero_counts_are_allowed() {
        let years = [2013.0, 2014.0, 2015.0, 2016.0, 2017.0];
        let counts = [0.0, 1.0, 0.0, 4.0, 6.0];
        let fit = fit_quasi_poisson("test", &years, &counts).unwrap();
        assert!(fit.slope.estimate > 0.0);
        assert!(fit.slope.p_value > 0.0 && fit.slope.p_value <= 1.0);
        // Score equations: fitted total equals observed total
        let fitted_total: f64 = fit.linear_predictor.iter().map(|e| e.exp()).sum();
        assert_relative_eq!(fitted_total, 11.0, epsilon = 1e-4);
    }

    #[test]
    fn test_all_zero_series_fails() {
        let err =
            fit_quasi_poisson("SpX", &[2013.0, 2014.0, 2015.0], &[0.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, TrendError::ModelNonConvergence { .. }));
    }

    #[test]
    fn test_single_year_fails() {
        let err =
            fit_quasi_poisson("SpX", &[2013.0, 2013.0, 2013.0], &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, TrendError::ModelNonConvergence { .. }));
    }
}
