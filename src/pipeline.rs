//! Trend Pipeline - coordinator for one survey analysis
//!
//! Runs aggregate → impute → (visit averaging) → per-unit select/fit/curve/diagnose
//! for one `PipelineConfig`. The amphibian egg, amphibian adult and squirrel
//! call analyses are three instances of this struct.
//!
//! Failure policy:
//! - key-merge violations abort the run before any model is fitted
//! - a model that cannot be fitted becomes a `UnitFailure`; other units proceed
//! - diagnostics that cannot be computed are recorded without dropping the fit

use crate::config::{GroupingScheme, PipelineConfig};
use crate::error::{Result, TrendError};
use crate::trend::{
    aggregate, average_visits, check_residuals, fit_trend, fitted_curve, impute, DataQuality,
    FittedCurve, FittedModel, ModelKind, ResidualDiagnostics,
};
use crate::types::{CountRecord, FitUnit, Observation};
use std::collections::BTreeMap;
use std::fmt;

/// Pipeline stage at which a unit failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Selection,
    Fit,
    Diagnostics,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureStage::Selection => "selection",
            FailureStage::Fit => "fit",
            FailureStage::Diagnostics => "diagnostics",
        })
    }
}

#[derive(Debug, Clone)]
pub struct UnitFailure {
    pub unit: FitUnit,
    pub stage: FailureStage,
    pub message: String,
}

/// Everything produced for one fit unit
#[derive(Debug, Clone)]
pub struct UnitTrend {
    pub fitted: FittedModel,
    pub curve: FittedCurve,
    pub diagnostics: Option<ResidualDiagnostics>,
}

impl UnitTrend {
    pub fn kind(&self) -> ModelKind {
        self.fitted.kind()
    }
}

/// Output of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub config: PipelineConfig,
    pub quality: DataQuality,
    /// Zero-filled records over the complete key set
    pub imputed: Vec<CountRecord>,
    /// Records the models were fitted to (visit-averaged for the visit scheme)
    pub series: Vec<CountRecord>,
    pub trends: Vec<UnitTrend>,
    pub failures: Vec<UnitFailure>,
}

impl PipelineReport {
    pub fn trend(&self, site: &str, species: &str) -> Option<&UnitTrend> {
        self.trends
            .iter()
            .find(|t| t.fitted.unit.site == site && t.fitted.unit.species == species)
    }
}

pub struct TrendPipeline {
    config: PipelineConfig,
}

impl TrendPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full pipeline over a flat observation table
    pub fn run(&self, observations: &[Observation]) -> Result<PipelineReport> {
        tracing::info!(
            "Running '{}' pipeline (target code {}) on {} observations",
            self.config.count_field,
            self.config.target_code,
            observations.len()
        );

        // STEP 1: Aggregate observed keys
        let aggregation = aggregate(observations, &self.config);

        // STEP 2: Complete the key set (fatal on key bugs)
        let imputed = impute(&aggregation.records)?;

        // STEP 3: Build the modelled series
        let series = match self.config.grouping {
            GroupingScheme::SpeciesByYear => imputed.clone(),
            GroupingScheme::VisitByYear => average_visits(&imputed),
        };

        // STEP 4: Fit each unit independently
        let mut units: BTreeMap<FitUnit, Vec<CountRecord>> = BTreeMap::new();
        for record in &series {
            units
                .entry(FitUnit::of(&record.key))
                .or_default()
                .push(record.clone());
        }

        let mut trends = Vec::with_capacity(units.len());
        let mut failures = Vec::new();
        for (unit, records) in &units {
            match self.analyze_unit(unit, records) {
                Ok((trend, diagnostics_failure)) => {
                    trends.push(trend);
                    failures.extend(diagnostics_failure);
                }
                Err((stage, error)) => {
                    if error.is_fatal() {
                        return Err(error);
                    }
                    tracing::warn!("{}: {} failed: {}", unit, stage, error);
                    failures.push(UnitFailure {
                        unit: unit.clone(),
                        stage,
                        message: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "'{}': {} units fitted, {} failures",
            self.config.count_field,
            trends.len(),
            failures.len()
        );

        Ok(PipelineReport {
            config: self.config.clone(),
            quality: aggregation.quality,
            imputed,
            series,
            trends,
            failures,
        })
    }

    /// Select, fit, and diagnose one unit
    fn analyze_unit(
        &self,
        unit: &FitUnit,
        records: &[CountRecord],
    ) -> std::result::Result<(UnitTrend, Option<UnitFailure>), (FailureStage, TrendError)> {
        let kind = ModelKind::select(records).map_err(|e| (FailureStage::Selection, e))?;
        let fitted = fit_trend(unit, records, kind, &self.config.log_offset)
            .map_err(|e| (FailureStage::Fit, e))?;
        let curve = fitted_curve(&fitted, self.config.curve_step);

        tracing::debug!(
            "{}: {} slope {:.4} (SE {:.4}, p {:.4})",
            unit,
            kind,
            fitted.model.slope().estimate,
            fitted.model.slope().std_error,
            fitted.model.slope().p_value
        );

        let (diagnostics, failure) = match check_residuals(&fitted) {
            Ok(d) => (Some(d), None),
            Err(e) => {
                tracing::warn!("{}: diagnostics skipped: {}", unit, e);
                let failure = UnitFailure {
                    unit: unit.clone(),
                    stage: FailureStage::Diagnostics,
                    message: e.to_string(),
                };
                (None, Some(failure))
            }
        };

        Ok((UnitTrend { fitted, curve, diagnostics }, failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ALL_SPECIES;
    use chrono::NaiveDate;

    fn obs(
        site: &str,
        transect: &str,
        date: (i32, u32, u32),
        species: &str,
        stage: &str,
    ) -> Observation {
        let date = NaiveDate::from_ymd_opt(date.0, date.1, date.2);
        Observation {
            site: site.to_string(),
            transect: transect.to_string(),
            date,
            year: date.map(|d| chrono::Datelike::year(&d)),
            species: species.to_string(),
            stage: stage.to_string(),
            survey_type: "Transect".to_string(),
        }
    }

    #[test]
    fn test_failing_unit_does_not_abort_batch() {
        let mut data = Vec::new();
        for (i, n) in [3, 5, 4, 8, 9].iter().enumerate() {
            for _ in 0..*n {
                data.push(obs("SiteA", "T1", (2013 + i as i32, 4, 10), "SpX", "EG"));
            }
        }
        // SpW only ever seen at SiteB, so (SiteA, SpW) is an all-zero series
        data.push(obs("SiteB", "T1", (2014, 4, 10), "SpW", "EG"));
        // A different life stage creates no egg keys
        data.push(obs("SiteA", "T1", (2015, 4, 10), "SpZ", "AD"));

        let report = TrendPipeline::new(PipelineConfig::amphibian_eggs())
            .run(&data)
            .unwrap();

        assert!(report.trend("SiteA", "SpX").is_some());
        assert!(report.trend("SiteA", ALL_SPECIES).is_some());
        assert!(report.trend("SiteB", "SpW").is_some());
        assert!(report.trend("SiteA", "SpZ").is_none());
        assert!(report.failures.iter().any(|f| {
            f.unit.site == "SiteA" && f.unit.species == "SpW" && f.stage == FailureStage::Fit
        }));
        assert_eq!(report.quality.other_stage, 1);
        // 2 sites × 1 transect × 3 species labels × 5 years
        assert_eq!(report.imputed.len(), 30);
    }

    #[test]
    fn test_visit_scheme_models_averaged_series() {
        let mut data = Vec::new();
        for year in 2012..2017 {
            for (transect, calls) in [("T1", 3), ("T2", 1)] {
                for _ in 0..calls + (year - 2012) as usize {
                    data.push(obs("Wood", transect, (year, 5, 2), "SQ", "CA"));
                }
                data.push(obs("Wood", transect, (year, 6, 9), "SQ", "CA"));
            }
        }

        let report = TrendPipeline::new(PipelineConfig::squirrel_calls())
            .run(&data)
            .unwrap();

        // Visit-level: 2 transects × 2 species labels × 10 visits
        assert_eq!(report.imputed.len(), 40);
        // Averaged: 2 transects × 2 species labels × 5 years
        assert_eq!(report.series.len(), 20);
        let trend = report.trend("Wood", "SQ").unwrap();
        assert_eq!(trend.kind(), ModelKind::MultiTransectMixed);
        assert!(trend.fitted.model.slope().estimate > 0.0);
    }

    #[test]
    fn test_sites_keep_their_own_transects() {
        let mut data = Vec::new();
        for (i, n) in [3, 5, 4, 8, 9].iter().enumerate() {
            for _ in 0..*n {
                data.push(obs("SiteA", "A1", (2013 + i as i32, 4, 10), "SpX", "EG"));
                data.push(obs("SiteB", "B1", (2013 + i as i32, 4, 11), "SpX", "EG"));
            }
        }

        let report = TrendPipeline::new(PipelineConfig::amphibian_eggs())
            .run(&data)
            .unwrap();

        let trend = report.trend("SiteA", "SpX").unwrap();
        assert_eq!(trend.kind(), ModelKind::SingleTransectGlm);
        assert_eq!(trend.fitted.n_transects, 1);
        assert!(report
            .series
            .iter()
            .filter(|r| r.key.site == "SiteA")
            .all(|r| r.key.transect == "A1"));
    }
}
