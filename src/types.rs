//! Core record types shared by every pipeline stage

use chrono::NaiveDate;
use std::fmt;

/// Species label used for the all-species pseudo-group
pub const ALL_SPECIES: &str = "ALL.species";

/// One recorded sighting or call event
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub site: String,
    pub transect: String,
    pub date: Option<NaiveDate>,
    /// Derived from `date`; `None` when the date failed to parse
    pub year: Option<i32>,
    pub species: String,
    /// Life stage (amphibians) or detection type (squirrels)
    pub stage: String,
    pub survey_type: String,
}

/// Unit of aggregation
///
/// `visit` is only populated for visit-level grouping (one key per survey
/// date). Ordering is lexicographic over (site, transect, species, year, visit),
/// which fixes the row order of every output table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub site: String,
    pub transect: String,
    pub species: String,
    pub year: i32,
    pub visit: Option<NaiveDate>,
}

impl GroupKey {
    pub fn new(site: &str, transect: &str, species: &str, year: i32) -> Self {
        Self {
            site: site.to_string(),
            transect: transect.to_string(),
            species: species.to_string(),
            year,
            visit: None,
        }
    }

    pub fn with_visit(mut self, visit: NaiveDate) -> Self {
        self.visit = Some(visit);
        self
    }

    pub fn is_all_species(&self) -> bool {
        self.species == ALL_SPECIES
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.site, self.transect, self.species, self.year)?;
        if let Some(visit) = self.visit {
            write!(f, "/{}", visit)?;
        }
        Ok(())
    }
}

/// Aggregated count for one key
///
/// Counts are integers for raw aggregation and means after visit averaging,
/// so both are carried as `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct CountRecord {
    pub key: GroupKey,
    pub count: f64,
}

impl CountRecord {
    pub fn new(key: GroupKey, count: f64) -> Self {
        Self { key, count }
    }
}

/// Identity of one independent model fit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FitUnit {
    pub site: String,
    pub species: String,
}

impl FitUnit {
    pub fn of(key: &GroupKey) -> Self {
        Self {
            site: key.site.clone(),
            species: key.species.clone(),
        }
    }
}

impl fmt::Display for FitUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.site, self.species)
    }
}
