//! Imputer
//!
//! Completes aggregated counts over the full cross-product of grouping keys.
//!
//! The complete key set is built from distinct values present in the
//! aggregated records themselves, with transects nested inside the site
//! they were observed at:
//!   site × transects(site) × species × time
//! where "time" is either the distinct years or, for visit-level records,
//! the (year, survey date) pairs observed at that site. A date is never
//! combined with a year it was not observed in, and a site never inherits
//! another site's transects or survey visits.
//!
//! The merge is an explicit left join: the key set on the left, an
//! `FxHashMap` of observed counts on the right, absent keys filled with 0.

use crate::error::{Result, TrendError};
use crate::types::{CountRecord, GroupKey};
use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet};

/// Transects and survey visits observed at one site
#[derive(Default)]
struct SiteLayout<'a> {
    transects: BTreeSet<&'a str>,
    visits: BTreeSet<(i32, Option<NaiveDate>)>,
}

/// Enumerate the complete key set, in sorted order
///
/// Years are shared across sites in the species scheme; survey visits are not.
pub fn complete_key_set(records: &[CountRecord]) -> Result<Vec<GroupKey>> {
    let with_visit = records.iter().filter(|r| r.key.visit.is_some()).count();
    if with_visit != 0 && with_visit != records.len() {
        return Err(TrendError::DimensionMismatch {
            reason: format!(
                "{} of {} records carry a survey visit; visit and year keys cannot be mixed",
                with_visit,
                records.len()
            ),
        });
    }

    // STEP 1: Distinct values; transects and visits are tracked per site
    let mut layout: BTreeMap<&str, SiteLayout<'_>> = BTreeMap::new();
    let mut species = BTreeSet::new();
    let mut years = BTreeSet::new();
    for record in records {
        let site = layout.entry(record.key.site.as_str()).or_default();
        site.transects.insert(record.key.transect.as_str());
        site.visits.insert((record.key.year, record.key.visit));
        species.insert(record.key.species.as_str());
        years.insert(record.key.year);
    }

    // STEP 2: Enumerate in key order
    let visit_keys = with_visit != 0;
    let mut keys = Vec::new();
    for (site, SiteLayout { transects, visits }) in &layout {
        let times: Vec<(i32, Option<NaiveDate>)> = if visit_keys {
            visits.iter().copied().collect()
        } else {
            years.iter().map(|&year| (year, None)).collect()
        };
        for transect in transects {
            for sp in &species {
                for &(year, visit) in &times {
                    keys.push(GroupKey {
                        site: site.to_string(),
                        transect: transect.to_string(),
                        species: sp.to_string(),
                        year,
                        visit,
                    });
                }
            }
        }
    }

    Ok(keys)
}

/// Zero-fill `records` over their complete key set
///
/// Fails with `DimensionMismatch` on duplicate input keys or keys outside the
/// key set. Applying it to its own output returns the same rows.
pub fn impute(records: &[CountRecord]) -> Result<Vec<CountRecord>> {
    let keys = complete_key_set(records)?;

    let mut observed: FxHashMap<&GroupKey, f64> = FxHashMap::default();
    for record in records {
        if observed.insert(&record.key, record.count).is_some() {
            return Err(TrendError::DimensionMismatch {
                reason: format!("duplicate aggregated key {}", record.key),
            });
        }
    }

    let key_set: FxHashSet<&GroupKey> = keys.iter().collect();
    if let Some(orphan) = records.iter().find(|r| !key_set.contains(&r.key)) {
        return Err(TrendError::DimensionMismatch {
            reason: format!("aggregated key {} is outside the complete key set", orphan.key),
        });
    }

    let completed: Vec<CountRecord> = keys
        .iter()
        .map(|key| CountRecord::new(key.clone(), observed.get(key).copied().unwrap_or(0.0)))
        .collect();

    let filled = completed.len() - records.len();
    tracing::debug!(
        "Imputation: {} observed keys, {} zero-filled, {} total",
        records.len(),
        filled,
        completed.len()
    );

    Ok(completed)
}

/// Collapse visit-level records to the mean count per (site, transect, species, year)
///
/// Every visit of a year contributes, including zero-filled ones.
pub fn average_visits(records: &[CountRecord]) -> Vec<CountRecord> {
    let mut sums: BTreeMap<GroupKey, (f64, usize)> = BTreeMap::new();
    for record in records {
        let key = GroupKey {
            visit: None,
            ..record.key.clone()
        };
        let entry = sums.entry(key).or_insert((0.0, 0));
        entry.0 += record.count;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(key, (sum, n))| CountRecord::new(key, sum / n as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ALL_SPECIES;

    fn rec(site: &str, transect: &str, species: &str, year: i32, count: f64) -> CountRecord {
        CountRecord::new(GroupKey::new(site, transect, species, year), count)
    }

    fn find<'a>(records: &'a [CountRecord], key: &GroupKey) -> Vec<&'a CountRecord> {
        records.iter().filter(|r| &r.key == key).collect()
    }

    #[test]
    fn test_every_combination_exactly_once() {
        let records = vec![
            rec("A", "T1", "SpX", 2013, 2.0),
            rec("A", "T2", "SpY", 2014, 1.0),
            rec("B", "T1", "SpX", 2015, 4.0),
        ];
        let completed = impute(&records).unwrap();

        // A: 2 transects × 2 species × 3 years; B: 1 transect × 2 species × 3 years
        assert_eq!(completed.len(), 18);
        for (site, transects) in [("A", vec!["T1", "T2"]), ("B", vec!["T1"])] {
            for transect in transects {
                for species in ["SpX", "SpY"] {
                    for year in 2013..=2015 {
                        let key = GroupKey::new(site, transect, species, year);
                        let hits = find(&completed, &key);
                        assert_eq!(hits.len(), 1, "{}", key);
                        assert!(hits[0].count >= 0.0);
                    }
                }
            }
        }
        assert!(find(&completed, &GroupKey::new("B", "T2", "SpX", 2013)).is_empty());
    }

    #[test]
    fn test_transects_stay_within_their_site() {
        let records = vec![
            rec("SiteA", "A1", "SpX", 2013, 3.0),
            rec("SiteA", "A1", "SpX", 2014, 5.0),
            rec("SiteB", "B1", "SpX", 2013, 2.0),
            rec("SiteB", "B1", "SpY", 2014, 1.0),
        ];
        let completed = impute(&records).unwrap();

        let site_a: BTreeSet<&str> = completed
            .iter()
            .filter(|r| r.key.site == "SiteA")
            .map(|r| r.key.transect.as_str())
            .collect();
        assert_eq!(site_a, BTreeSet::from(["A1"]));
        // Species are still shared: SiteA gets an all-zero SpY series on A1
        let spy = find(&completed, &GroupKey::new("SiteA", "A1", "SpY", 2013));
        assert_eq!(spy.len(), 1);
        assert_eq!(spy[0].count, 0.0);
        // 2 sites × 1 transect × 2 species × 2 years
        assert_eq!(completed.len(), 8);
    }

    #[test]
    fn test_visits_stay_within_their_site() {
        let wood = NaiveDate::from_ymd_opt(2012, 5, 2).unwrap();
        let field = NaiveDate::from_ymd_opt(2012, 6, 9).unwrap();
        let records = vec![
            CountRecord::new(GroupKey::new("Wood", "T1", "SQ", 2012).with_visit(wood), 4.0),
            CountRecord::new(GroupKey::new("Field", "T1", "SQ", 2012).with_visit(field), 4.0),
        ];
        let completed = impute(&records).unwrap();
        assert_eq!(completed.len(), 2);

        let averaged = average_visits(&completed);
        let wood_mean = find(&averaged, &GroupKey::new("Wood", "T1", "SQ", 2012));
        assert_eq!(wood_mean[0].count, 4.0);
        let field_mean = find(&averaged, &GroupKey::new("Field", "T1", "SQ", 2012));
        assert_eq!(field_mean[0].count, 4.0);
    }

    #[test]
    fn test_zero_fill_never_missing() {
        let records = vec![rec("A", "T1", "SpX", 2013, 2.0), rec("A", "T1", "SpY", 2014, 1.0)];
        let completed = impute(&records).unwrap();

        let hits = find(&completed, &GroupKey::new("A", "T1", "SpX", 2014));
        assert_eq!(hits[0].count, 0.0);
        let hits = find(&completed, &GroupKey::new("A", "T1", "SpX", 2013));
        assert_eq!(hits[0].count, 2.0);
    }

    #[test]
    fn test_idempotent() {
        let records = vec![
            rec("A", "T1", "SpX", 2013, 2.0),
            rec("A", "T2", "SpY", 2014, 1.0),
            rec("A", "T1", ALL_SPECIES, 2013, 2.0),
        ];
        let once = impute(&records).unwrap();
        let twice = impute(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_only_observed_values_enter_key_set() {
        let records = vec![rec("A", "T1", "SpX", 2013, 1.0), rec("A", "T1", "SpX", 2015, 1.0)];
        let completed = impute(&records).unwrap();
        // 2014 never observed anywhere, so it is not invented
        assert_eq!(completed.len(), 2);
        assert!(completed.iter().all(|r| r.key.year != 2014));
    }

    #[test]
    fn test_duplicate_keys_are_fatal() {
        let records = vec![rec("A", "T1", "SpX", 2013, 1.0), rec("A", "T1", "SpX", 2013, 3.0)];
        let err = impute(&records).unwrap_err();
        assert!(matches!(err, TrendError::DimensionMismatch { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_mixed_visit_and_year_keys_are_fatal() {
        let date = NaiveDate::from_ymd_opt(2013, 5, 1).unwrap();
        let records = vec![
            rec("A", "T1", "SQ", 2013, 1.0),
            CountRecord::new(GroupKey::new("A", "T1", "SQ", 2013).with_visit(date), 2.0),
        ];
        assert!(matches!(impute(&records), Err(TrendError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_visits_stay_nested_in_their_year() {
        let d13 = NaiveDate::from_ymd_opt(2013, 5, 1).unwrap();
        let d14 = NaiveDate::from_ymd_opt(2014, 5, 2).unwrap();
        let records = vec![
            CountRecord::new(GroupKey::new("A", "T1", "SQ", 2013).with_visit(d13), 2.0),
            CountRecord::new(GroupKey::new("A", "T2", "SQ", 2014).with_visit(d14), 3.0),
        ];
        let completed = impute(&records).unwrap();

        // 2 transects × 2 visits, no (2013, d14) pairs
        assert_eq!(completed.len(), 4);
        assert!(completed
            .iter()
            .all(|r| r.key.visit.map(|d| chrono::Datelike::year(&d)) == Some(r.key.year)));
    }

    #[test]
    fn test_average_visits_includes_zero_visits() {
        let d1 = NaiveDate::from_ymd_opt(2013, 5, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2013, 6, 1).unwrap();
        let records = vec![
            CountRecord::new(GroupKey::new("A", "T1", "SQ", 2013).with_visit(d1), 3.0),
            CountRecord::new(GroupKey::new("A", "T2", "SQ", 2013).with_visit(d2), 1.0),
        ];
        let completed = impute(&records).unwrap();
        let averaged = average_visits(&completed);

        assert_eq!(averaged.len(), 2);
        let t1 = find(&averaged, &GroupKey::new("A", "T1", "SQ", 2013));
        assert_eq!(t1[0].count, 1.5);
        let t2 = find(&averaged, &GroupKey::new("A", "T2", "SQ", 2013));
        assert_eq!(t2[0].count, 0.5);
    }
}
