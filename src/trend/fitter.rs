//! Trend Fitter
//!
//! Fits the selected model to one fit unit's imputed series and exposes a
//! single interface over both model kinds:
//! - `SingleTransectGlm` → quasi-Poisson GLM on raw counts (log link)
//! - `MultiTransectMixed` → REML mixed model on log(count + offset) with
//!   transect and year-identity random intercepts
//!
//! Slopes, standard errors and p-values are on the log scale in both cases.

use crate::config::LogOffset;
use crate::error::{Result, TrendError};
use crate::stats::{
    fit_crossed_intercepts, fit_quasi_poisson, CoefficientSummary, GlmFit, GroupingFactor,
    MixedFit,
};
use crate::trend::selector::ModelKind;
use crate::types::{CountRecord, FitUnit};
use std::collections::BTreeSet;

/// Fitted model, tagged by kind
#[derive(Debug, Clone)]
pub enum TrendModel {
    SingleTransect(GlmFit),
    MultiTransect(MixedFit),
}

impl TrendModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            TrendModel::SingleTransect(_) => ModelKind::SingleTransectGlm,
            TrendModel::MultiTransect(_) => ModelKind::MultiTransectMixed,
        }
    }

    pub fn intercept(&self) -> &CoefficientSummary {
        match self {
            TrendModel::SingleTransect(fit) => &fit.intercept,
            TrendModel::MultiTransect(fit) => &fit.intercept,
        }
    }

    /// Year coefficient
    pub fn slope(&self) -> &CoefficientSummary {
        match self {
            TrendModel::SingleTransect(fit) => &fit.slope,
            TrendModel::MultiTransect(fit) => &fit.slope,
        }
    }

    /// Population-level prediction on the log scale
    pub fn predict_link(&self, year: f64) -> f64 {
        match self {
            TrendModel::SingleTransect(fit) => fit.predict_link(year),
            TrendModel::MultiTransect(fit) => fit.predict_link(year),
        }
    }

    /// Population-level prediction back-transformed to counts
    pub fn predict_response(&self, year: f64) -> f64 {
        match self {
            TrendModel::SingleTransect(fit) => fit.predict_response(year),
            TrendModel::MultiTransect(fit) => fit.predict_response(year),
        }
    }

    /// Per-record fitted values on the log scale (random effects included)
    pub fn fitted_link(&self) -> &[f64] {
        match self {
            TrendModel::SingleTransect(fit) => &fit.linear_predictor,
            TrendModel::MultiTransect(fit) => &fit.fitted,
        }
    }

    pub fn singular(&self) -> bool {
        match self {
            TrendModel::SingleTransect(_) => false,
            TrendModel::MultiTransect(fit) => fit.singular,
        }
    }
}

/// Model plus the series it was fitted to
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub unit: FitUnit,
    pub model: TrendModel,
    /// Constant added to counts before logs
    pub log_offset: f64,
    pub records: Vec<CountRecord>,
    /// log(count + offset) − fitted link, per record
    pub residuals: Vec<f64>,
    pub n_transects: usize,
    pub n_years: usize,
}

impl FittedModel {
    pub fn kind(&self) -> ModelKind {
        self.model.kind()
    }

    pub fn year_range(&self) -> (i32, i32) {
        let min = self.records.iter().map(|r| r.key.year).min().unwrap_or(0);
        let max = self.records.iter().map(|r| r.key.year).max().unwrap_or(0);
        (min, max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub year: f64,
    pub predicted: f64,
}

/// Back-transformed population-level trend over a fine year grid
#[derive(Debug, Clone)]
pub struct FittedCurve {
    pub unit: FitUnit,
    pub points: Vec<CurvePoint>,
}

/// Fit the model of the given kind to one fit unit
pub fn fit_trend(
    unit: &FitUnit,
    records: &[CountRecord],
    kind: ModelKind,
    log_offset: &LogOffset,
) -> Result<FittedModel> {
    let label = unit.to_string();
    if records.is_empty() {
        return Err(TrendError::non_convergence(&label, "empty series"));
    }

    let years: Vec<f64> = records.iter().map(|r| r.key.year as f64).collect();
    let counts: Vec<f64> = records.iter().map(|r| r.count).collect();
    let offset = log_offset.resolve(&counts);

    let transect_labels: Vec<&str> = records.iter().map(|r| r.key.transect.as_str()).collect();
    let year_labels: Vec<i32> = records.iter().map(|r| r.key.year).collect();
    let n_transects = transect_labels.iter().collect::<BTreeSet<_>>().len();
    let n_years = year_labels.iter().collect::<BTreeSet<_>>().len();

    let model = match kind {
        ModelKind::SingleTransectGlm => {
            TrendModel::SingleTransect(fit_quasi_poisson(&label, &years, &counts)?)
        }
        ModelKind::MultiTransectMixed => {
            if n_years < 3 {
                return Err(TrendError::non_convergence(
                    &label,
                    format!("{} distinct years cannot support a year random effect", n_years),
                ));
            }
            let response: Vec<f64> = counts.iter().map(|&y| (y + offset).ln()).collect();
            let factors = [
                GroupingFactor::from_labels("transect", &transect_labels),
                GroupingFactor::from_labels("year", &year_labels),
            ];
            // Year-level variation is the error term for the year slope
            let inference_df = (n_years - 2) as f64;
            let fit = fit_crossed_intercepts(&label, &years, &response, &factors, inference_df)?;
            if fit.singular {
                tracing::warn!("{}: boundary (singular) mixed-model fit", label);
            }
            TrendModel::MultiTransect(fit)
        }
    };

    let residuals = counts
        .iter()
        .zip(model.fitted_link())
        .map(|(&y, &fitted)| (y + offset).ln() - fitted)
        .collect();

    Ok(FittedModel {
        unit: unit.clone(),
        model,
        log_offset: offset,
        records: records.to_vec(),
        residuals,
        n_transects,
        n_years,
    })
}

/// Evaluate the trend from the first to the last observed year in `step` increments
///
/// The grid is built by integer stepping so it ends exactly on the last year.
/// Predictions are population-level, so they are already the average over
/// transect levels.
pub fn fitted_curve(fitted: &FittedModel, step: f64) -> FittedCurve {
    let (min, max) = fitted.year_range();
    let span = (max - min) as f64;
    let steps = if step > 0.0 { (span / step).round() as usize } else { 0 };

    let points = (0..=steps)
        .map(|i| {
            let year = if steps == 0 {
                min as f64
            } else {
                min as f64 + span * i as f64 / steps as f64
            };
            CurvePoint {
                year,
                predicted: fitted.model.predict_response(year),
            }
        })
        .collect();

    FittedCurve {
        unit: fitted.unit.clone(),
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupKey;
    use approx::assert_relative_eq;

    fn unit() -> FitUnit {
        FitUnit {
            site: "SiteA".to_string(),
            species: "SpX".to_string(),
        }
    }

    fn rec(transect: &str, year: i32, count: f64) -> CountRecord {
        CountRecord::new(GroupKey::new("SiteA", transect, "SpX", year), count)
    }

    fn fit_default(records: &[CountRecord], kind: ModelKind) -> FittedModel {
        fit_trend(&unit(), records, kind, &LogOffset::default()).unwrap()
    }

    fn single_transect_series() -> Vec<CountRecord> {
        [4.0, 6.0, 5.0, 9.0, 0.0, 12.0]
            .iter()
            .enumerate()
            .map(|(i, &c)| rec("T1", 2013 + i as i32, c))
            .collect()
    }

    fn multi_transect_series() -> Vec<CountRecord> {
        let mut out = Vec::new();
        let t1 = [5.0, 7.0, 6.0, 10.0, 12.0, 11.0];
        let t2 = [2.0, 1.0, 3.0, 4.0, 3.0, 6.0];
        for (i, (&a, &b)) in t1.iter().zip(&t2).enumerate() {
            out.push(rec("T1", 2013 + i as i32, a));
            out.push(rec("T2", 2013 + i as i32, b));
        }
        out
    }

    #[test]
    fn test_single_transect_fit() {
        let records = single_transect_series();
        let fitted = fit_default(&records, ModelKind::SingleTransectGlm);

        assert_eq!(fitted.kind(), ModelKind::SingleTransectGlm);
        assert_eq!(fitted.n_transects, 1);
        assert_eq!(fitted.residuals.len(), records.len());
        // Zero present, so the offset applies
        assert_eq!(fitted.log_offset, 0.1);
        assert!(fitted.residuals.iter().all(|r| r.is_finite()));
    }

    #[test]
    fn test_residual_definition() {
        let records = single_transect_series();
        let fitted = fit_default(&records, ModelKind::SingleTransectGlm);

        for (i, record) in records.iter().enumerate() {
            let fitted_link = fitted.model.predict_link(record.key.year as f64);
            let expected = (record.count + 0.1).ln() - fitted_link;
            assert_relative_eq!(fitted.residuals[i], expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_multi_transect_fit() {
        let records = multi_transect_series();
        let fitted = fit_default(&records, ModelKind::MultiTransectMixed);

        assert_eq!(fitted.kind(), ModelKind::MultiTransectMixed);
        assert_eq!(fitted.n_transects, 2);
        assert_eq!(fitted.n_years, 6);
        // No zeros: no offset under the default policy
        assert_eq!(fitted.log_offset, 0.0);
        assert!(fitted.model.slope().estimate > 0.0);
        assert_eq!(fitted.model.slope().df, 4.0);
    }

    #[test]
    fn test_mixed_needs_three_years() {
        let records = vec![
            rec("T1", 2013, 1.0),
            rec("T2", 2013, 2.0),
            rec("T1", 2014, 3.0),
            rec("T2", 2014, 1.0),
        ];
        let err = fit_trend(&unit(), &records, ModelKind::MultiTransectMixed, &LogOffset::default())
            .unwrap_err();
        assert!(matches!(err, TrendError::ModelNonConvergence { .. }));
    }

    #[test]
    fn test_mixed_without_offset_rejects_zero_counts() {
        let mut records = multi_transect_series();
        records[3].count = 0.0;
        let err = fit_trend(&unit(), &records, ModelKind::MultiTransectMixed, &LogOffset::Never)
            .unwrap_err();
        assert!(matches!(err, TrendError::ModelNonConvergence { .. }));
    }

    #[test]
    fn test_curve_grid_and_back_transform() {
        let records = single_transect_series();
        let fitted = fit_default(&records, ModelKind::SingleTransectGlm);
        let curve = fitted_curve(&fitted, 0.1);

        // 2013..=2018 in 0.1 steps
        assert_eq!(curve.points.len(), 51);
        assert_relative_eq!(curve.points[0].year, 2013.0);
        assert_relative_eq!(curve.points[50].year, 2018.0);
        assert_relative_eq!(curve.points[1].year, 2013.1, epsilon = 1e-9);

        for point in &curve.points {
            assert_relative_eq!(
                point.predicted,
                fitted.model.predict_link(point.year).exp(),
                max_relative = 1e-12
            );
        }
    }
}
