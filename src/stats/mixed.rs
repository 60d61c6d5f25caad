//! Linear mixed model with crossed random intercepts
//!
//! Model: `y = b0 + b1 * year + Σ_k Z_k b_k + e`, with `b_k ~ N(0, σ_k²)`
//! independent per grouping factor and `e ~ N(0, σ²)`.
//!
//! Fitted by REML on the profiled deviance. For relative standard deviations
//! θ_k = σ_k / σ the penalized system
//!
//! ```text
//! | ZθᵀZθ + I   ZθᵀX | |u|   |Zθᵀy|
//! | XᵀZθ        XᵀX  | |β| = |Xᵀy |
//! ```
//!
//! is solved by one Cholesky factorization, whose log-determinant equals
//! log|L_θ|² + log|R_X|². The criterion is minimized over θ ≥ 0 with
//! Nelder-Mead; θ_k at the boundary is reported as a singular fit.

use super::optimize::{nelder_mead, NelderMeadOptions};
use super::{covariance_to_summary, CoefficientSummary};
use crate::error::{Result, TrendError};
use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;

const P: usize = 2;
const SINGULAR_THETA: f64 = 1e-4;

/// One random-intercept grouping (e.g. transect identity, year identity)
#[derive(Debug, Clone)]
pub struct GroupingFactor {
    pub name: String,
    /// Level index per observation
    pub levels: Vec<usize>,
    pub n_levels: usize,
}

impl GroupingFactor {
    /// Index distinct labels in sorted order
    pub fn from_labels<T: Ord + Clone>(name: &str, labels: &[T]) -> Self {
        let mut distinct: Vec<T> = labels.to_vec();
        distinct.sort();
        distinct.dedup();
        let levels = labels
            .iter()
            .map(|l| distinct.binary_search(l).unwrap_or(0))
            .collect();
        Self {
            name: name.to_string(),
            levels,
            n_levels: distinct.len(),
        }
    }
}

/// Estimated variance component and conditional modes for one factor
#[derive(Debug, Clone)]
pub struct RandomEffect {
    pub name: String,
    pub theta: f64,
    pub std_dev: f64,
    /// Conditional mode per level
    pub modes: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct MixedFit {
    pub intercept: CoefficientSummary,
    pub slope: CoefficientSummary,
    /// Residual standard deviation
    pub sigma: f64,
    pub random_effects: Vec<RandomEffect>,
    pub reml_criterion: f64,
    /// Some variance component collapsed to zero
    pub singular: bool,
    pub iterations: usize,
    /// Conditional fitted values (random effects included)
    pub fitted: Vec<f64>,
}

impl MixedFit {
    /// Population-level prediction; random effects excluded
    pub fn predict_link(&self, year: f64) -> f64 {
        self.intercept.estimate + self.slope.estimate * year
    }

    pub fn predict_response(&self, year: f64) -> f64 {
        self.predict_link(year).exp()
    }
}

struct RemlProblem<'a> {
    x: DMatrix<f64>,
    y: DVector<f64>,
    factors: &'a [GroupingFactor],
    offsets: Vec<usize>,
    q: usize,
}

struct RemlSolution {
    criterion: f64,
    solution: DVector<f64>,
    fitted: DVector<f64>,
    r2: f64,
    inverse: DMatrix<f64>,
}

impl<'a> RemlProblem<'a> {
    fn new(x: DMatrix<f64>, y: DVector<f64>, factors: &'a [GroupingFactor]) -> Self {
        let mut offsets = Vec::with_capacity(factors.len());
        let mut q = 0;
        for factor in factors {
            offsets.push(q);
            q += factor.n_levels;
        }
        Self { x, y, factors, offsets, q }
    }

    /// `[Zθ | X]`
    fn augmented_design(&self, theta: &[f64]) -> DMatrix<f64> {
        let n = self.y.len();
        let mut w = DMatrix::zeros(n, self.q + P);
        for (k, factor) in self.factors.iter().enumerate() {
            for (i, &level) in factor.levels.iter().enumerate() {
                w[(i, self.offsets[k] + level)] = theta[k];
            }
        }
        for i in 0..n {
            for j in 0..P {
                w[(i, self.q + j)] = self.x[(i, j)];
            }
        }
        w
    }

    fn solve(&self, theta: &[f64], want_inverse: bool) -> Option<RemlSolution> {
        let n = self.y.len();
        let w = self.augmented_design(theta);
        let wt = w.transpose();

        let mut a = &wt * &w;
        for j in 0..self.q {
            a[(j, j)] += 1.0;
        }
        let rhs = &wt * &self.y;

        let chol = a.cholesky()?;
        let l = chol.l_dirty();
        let log_det: f64 = (0..self.q + P).map(|i| 2.0 * l[(i, i)].ln()).sum();

        let solution = chol.solve(&rhs);
        let fitted = &w * &solution;
        let u = solution.rows(0, self.q);
        let r2 = (&self.y - &fitted).norm_squared() + u.norm_squared();
        if !(r2 > 0.0) || !log_det.is_finite() {
            return None;
        }

        let dof = (n - P) as f64;
        let criterion = log_det + dof * (1.0 + (2.0 * PI * r2 / dof).ln());
        let inverse = if want_inverse { chol.inverse() } else { DMatrix::zeros(0, 0) };

        Some(RemlSolution { criterion, solution, fitted, r2, inverse })
    }
}

/// Fit `response ~ year + (1 | factor_1) + ... + (1 | factor_k)` by REML
///
/// `inference_df` sets the degrees of freedom of the coefficient t tests.
pub fn fit_crossed_intercepts(
    unit: &str,
    years: &[f64],
    response: &[f64],
    factors: &[GroupingFactor],
    inference_df: f64,
) -> Result<MixedFit> {
    let n = response.len();

    if years.len() != n {
        return Err(TrendError::non_convergence(unit, "years and response differ in length"));
    }
    if n <= P + 1 {
        return Err(TrendError::non_convergence(unit, format!("{} rows is too few", n)));
    }
    if response.iter().any(|v| !v.is_finite()) {
        return Err(TrendError::non_convergence(unit, "non-finite log response"));
    }
    if factors.is_empty() {
        return Err(TrendError::non_convergence(unit, "no grouping factors"));
    }
    for factor in factors {
        if factor.levels.len() != n || factor.levels.iter().any(|&l| l >= factor.n_levels) {
            return Err(TrendError::non_convergence(
                unit,
                format!("grouping factor '{}' does not match the data", factor.name),
            ));
        }
        if factor.n_levels < 2 {
            return Err(TrendError::non_convergence(
                unit,
                format!("grouping factor '{}' has a single level", factor.name),
            ));
        }
    }

    let center = years.iter().sum::<f64>() / n as f64;
    if years.iter().all(|&x| (x - center).abs() < 1e-12) {
        return Err(TrendError::non_convergence(unit, "only one distinct year"));
    }

    let x = DMatrix::from_fn(n, P, |i, j| if j == 0 { 1.0 } else { years[i] - center });
    let y = DVector::from_column_slice(response);
    let problem = RemlProblem::new(x, y, factors);

    let objective = |theta: &[f64]| -> f64 {
        problem
            .solve(theta, false)
            .map(|s| s.criterion)
            .unwrap_or(f64::INFINITY)
    };

    let opts = NelderMeadOptions::default();
    let start = vec![1.0; factors.len()];
    let first = nelder_mead(&objective, &start, &opts)
        .map_err(|reason| TrendError::non_convergence(unit, reason))?;
    // Restart from the optimum to escape a collapsed simplex
    let polish_opts = NelderMeadOptions { initial_step: 0.1, ..opts };
    let best = nelder_mead(&objective, &first.x, &polish_opts)
        .map_err(|reason| TrendError::non_convergence(unit, reason))?;
    let best = if best.value <= first.value { best } else { first };

    let theta = best.x.clone();
    let solution = problem
        .solve(&theta, true)
        .ok_or_else(|| {
            TrendError::non_convergence(unit, "penalized system is not positive definite")
        })?;

    let q = problem.q;
    let sigma2 = solution.r2 / (n - P) as f64;
    let beta_cov = solution.inverse.view((q, q), (P, P)) * sigma2;

    // Undo centering: b0 = c0 - b1 * center
    let b = solution.solution.rows(q, P);
    let var_intercept = beta_cov[(0, 0)] - 2.0 * center * beta_cov[(0, 1)]
        + center * center * beta_cov[(1, 1)];
    let intercept = covariance_to_summary(b[0] - b[1] * center, var_intercept, inference_df);
    let slope = covariance_to_summary(b[1], beta_cov[(1, 1)], inference_df);

    let sigma = sigma2.sqrt();
    let random_effects = factors
        .iter()
        .enumerate()
        .map(|(k, factor)| RandomEffect {
            name: factor.name.clone(),
            theta: theta[k],
            std_dev: theta[k] * sigma,
            modes: (0..factor.n_levels)
                .map(|level| theta[k] * solution.solution[problem.offsets[k] + level])
                .collect(),
        })
        .collect::<Vec<_>>();
    let singular = theta.iter().any(|&t| t < SINGULAR_THETA);

    Ok(MixedFit {
        intercept,
        slope,
        sigma,
        random_effects,
        reml_criterion: solution.criterion,
        singular,
        iterations: best.iterations,
        fitted: solution.fitted.iter().copied().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 3 transects × 6 years, balanced, with transect and year offsets
    fn balanced_design() -> (Vec<f64>, Vec<f64>, Vec<usize>, Vec<usize>) {
        let transect_offsets = [0.0, 0.3, -0.4];
        let year_noise = [0.05, -0.1, 0.08, -0.02, 0.04, -0.06];

        let mut years = Vec::new();
        let mut response = Vec::new();
        let mut transects = Vec::new();
        let mut year_ids = Vec::new();
        for (t, offset) in transect_offsets.iter().enumerate() {
            for (j, noise) in year_noise.iter().enumerate() {
                let year = 2010.0 + j as f64;
                let cell = 0.03 * ((t * 6 + j) as f64 * 1.7).sin();
                years.push(year);
                response.push(0.5 + 0.2 * (year - 2010.0) + offset + noise + cell);
                transects.push(t);
                year_ids.push(j);
            }
        }
        (years, response, transects, year_ids)
    }

    fn factors(transects: &[usize], year_ids: &[usize]) -> Vec<GroupingFactor> {
        vec![
            GroupingFactor::from_labels("transect", transects),
            GroupingFactor::from_labels("year", year_ids),
        ]
    }

    fn ols_slope(x: &[f64], y: &[f64]) -> f64 {
        let n = x.len() as f64;
        let mx = x.iter().sum::<f64>() / n;
        let my = y.iter().sum::<f64>() / n;
        let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
        let sxx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
        sxy / sxx
    }

    #[test]
    fn test_balanced_slope_equals_ols() {
        let (years, response, transects, year_ids) = balanced_design();
        let grouping = factors(&transects, &year_ids);
        let fit = fit_crossed_intercepts("test", &years, &response, &grouping, 4.0).unwrap();

        assert_relative_eq!(fit.slope.estimate, ols_slope(&years, &response), epsilon = 1e-7);
        assert!(fit.slope.std_error > 0.0);
        assert_eq!(fit.slope.df, 4.0);
        assert_eq!(fit.random_effects.len(), 2);
    }

    #[test]
    fn test_transect_variance_detected() {
        let (years, response, transects, year_ids) = balanced_design();
        let grouping = factors(&transects, &year_ids);
        let fit = fit_crossed_intercepts("test", &years, &response, &grouping, 4.0).unwrap();

        let transect = &fit.random_effects[0];
        assert!(transect.std_dev > 0.1);
        // Transect 1 sits above transect 2
        assert!(transect.modes[1] > transect.modes[2]);
    }

    #[test]
    fn test_fitted_decomposes_into_fixed_plus_modes() {
        let (years, response, transects, year_ids) = balanced_design();
        let grouping = factors(&transects, &year_ids);
        let fit = fit_crossed_intercepts("test", &years, &response, &grouping, 4.0).unwrap();

        for i in 0..years.len() {
            let expected = fit.predict_link(years[i])
                + fit.random_effects[0].modes[transects[i]]
                + fit.random_effects[1].modes[year_ids[i]];
            assert_relative_eq!(fit.fitted[i], expected, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_single_level_factor_rejected() {
        let years = [2010.0, 2011.0, 2012.0, 2013.0];
        let response = [1.0, 1.2, 1.1, 1.4];
        let factors = vec![GroupingFactor::from_labels("transect", &["T1", "T1", "T1", "T1"])];
        let err = fit_crossed_intercepts("test", &years, &response, &factors, 2.0).unwrap_err();
        assert!(matches!(err, TrendError::ModelNonConvergence { .. }));
    }

    #[test]
    fn test_non_finite_response_rejected() {
        let years = [2010.0, 2011.0, 2012.0, 2013.0];
        let response = [1.0, f64::NEG_INFINITY, 1.1, 1.4];
        let factors = vec![GroupingFactor::from_labels("transect", &["T1", "T2", "T1", "T2"])];
        assert!(fit_crossed_intercepts("test", &years, &response, &factors, 2.0).is_err());
    }
}
