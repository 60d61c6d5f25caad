//! Aggregator
//!
//! Counts observations matching the pipeline's target code per group key,
//! plus an all-species row per (site, transect, year[, visit]).
//!
//! Rows are dropped before counting when:
//! - the site or transect label is blank
//! - the year is unknown (malformed date)
//! - the species code is a known data-entry-error sentinel
//! - the survey type is not in the configured set
//!
//! Only observed keys are emitted; zero rows are the imputer's job.

use crate::config::{GroupingScheme, PipelineConfig};
use crate::error::TrendError;
use crate::types::{CountRecord, GroupKey, Observation, ALL_SPECIES};
use std::collections::BTreeMap;

/// Rows removed during aggregation, by reason
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataQuality {
    pub malformed_dates: usize,
    /// Excluded species code → row count
    pub unidentified_species: BTreeMap<String, usize>,
    pub other_stage: usize,
    pub other_survey_type: usize,
    /// Rows with a blank site or transect label
    pub blank_location: usize,
}

impl DataQuality {
    pub fn unidentified_total(&self) -> usize {
        self.unidentified_species.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    /// Sorted by key, unique keys, all counts > 0
    pub records: Vec<CountRecord>,
    pub quality: DataQuality,
}

/// Group observations and count target-code rows
pub fn aggregate(observations: &[Observation], config: &PipelineConfig) -> Aggregation {
    let mut quality = DataQuality::default();
    let mut counts: BTreeMap<GroupKey, f64> = BTreeMap::new();

    for obs in observations {
        if !obs.stage.eq_ignore_ascii_case(&config.target_code) {
            quality.other_stage += 1;
            continue;
        }
        if !config.accepts_survey_type(&obs.survey_type) {
            quality.other_survey_type += 1;
            continue;
        }
        if obs.site.trim().is_empty() || obs.transect.trim().is_empty() {
            quality.blank_location += 1;
            continue;
        }
        let Some(year) = obs.year else {
            quality.malformed_dates += 1;
            continue;
        };
        if config.is_excluded_species(&obs.species) {
            *quality
                .unidentified_species
                .entry(obs.species.clone())
                .or_insert(0) += 1;
            continue;
        }

        let mut key = GroupKey::new(&obs.site, &obs.transect, &obs.species, year);
        if config.grouping == GroupingScheme::VisitByYear {
            // Year came from the date, so the date is present
            if let Some(date) = obs.date {
                key = key.with_visit(date);
            }
        }

        let mut all_key = key.clone();
        all_key.species = ALL_SPECIES.to_string();

        *counts.entry(key).or_insert(0.0) += 1.0;
        *counts.entry(all_key).or_insert(0.0) += 1.0;
    }

    if quality.blank_location > 0 {
        tracing::warn!(
            "{}: {} '{}' rows excluded with a blank site or transect",
            config.count_field,
            quality.blank_location,
            config.target_code
        );
    }
    if quality.malformed_dates > 0 {
        tracing::warn!(
            "{}: {} '{}' rows excluded with missing or malformed dates",
            config.count_field,
            quality.malformed_dates,
            config.target_code
        );
    }
    for (code, n) in &quality.unidentified_species {
        let issue = TrendError::UnidentifiedCategory { code: code.clone() };
        tracing::warn!("{}: {} rows dropped: {}", config.count_field, n, issue);
    }

    let records = counts
        .into_iter()
        .map(|(key, count)| CountRecord::new(key, count))
        .collect::<Vec<_>>();

    tracing::debug!(
        "{}: aggregated {} observations into {} keys",
        config.count_field,
        observations.len(),
        records.len()
    );

    Aggregation { records, quality }
}
