//! Survey Table Loading
//!
//! Reads raw survey tables (CSV or Parquet) with Polars and converts them
//! into the flat `Observation` rows the pipeline consumes. Normalization
//! happens here, once, on the way in:
//! - headers sanitized to snake_case
//! - site labels title-cased
//! - species and stage codes trimmed and upper-cased
//! - dates parsed against the configured formats (failures kept as `None`)

use crate::config::PipelineConfig;
use crate::error::TrendError;
use crate::types::Observation;
use crate::utils::normalization::{parse_date_and_year, sanitize_frame_headers, title_case};
use anyhow::{Context, Result};
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// Load one survey table, dispatching on file extension
///
/// CSV columns are all read as strings so that codes like "01" and dates
/// survive untouched.
pub fn load_table(path: &Path) -> Result<DataFrame> {
    let is_parquet = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("parquet"))
        .unwrap_or(false);

    if is_parquet {
        LazyFrame::scan_parquet(path, Default::default())
            .with_context(|| format!("Failed to scan parquet: {}", path.display()))?
            .collect()
            .with_context(|| format!("Failed to load parquet: {}", path.display()))
    } else {
        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .with_context(|| format!("Failed to create CSV reader: {}", path.display()))?
            .finish()
            .with_context(|| format!("Failed to load CSV: {}", path.display()))
    }
}

/// Pull a column as owned optional strings, casting non-string dtypes
fn string_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df
        .column(name)
        .map_err(|_| TrendError::MissingColumn {
            column: name.to_string(),
            available: df.get_column_names().iter().map(|s| s.to_string()).collect(),
        })?
        .cast(&DataType::String)
        .with_context(|| format!("Column '{}' cannot be read as text", name))?;

    let values = column
        .str()
        .with_context(|| format!("Column '{}' is not string type", name))?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect();

    Ok(values)
}

/// Convert a raw survey frame into normalized observations
pub fn observations_from_frame(
    df: &DataFrame,
    config: &PipelineConfig,
) -> Result<Vec<Observation>> {
    let df = sanitize_frame_headers(df)?;
    let columns = &config.columns;

    // STEP 1: Check required columns up front so the error names all of them
    let available: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    for required in columns.all() {
        if !available.iter().any(|c| c == required) {
            return Err(TrendError::MissingColumn {
                column: required.to_string(),
                available,
            }
            .into());
        }
    }

    // STEP 2: Extract columns
    let sites = string_column(&df, &columns.site)?;
    let transects = string_column(&df, &columns.transect)?;
    let dates = string_column(&df, &columns.date)?;
    let species = string_column(&df, &columns.species)?;
    let stages = string_column(&df, &columns.stage)?;
    let survey_types = string_column(&df, &columns.survey_type)?;

    // STEP 3: Normalize row by row
    let mut malformed = 0usize;
    let mut observations = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let (date, year) = parse_date_and_year(dates[idx].as_deref(), &config.date_formats);
        if date.is_none() {
            malformed += 1;
        }

        observations.push(Observation {
            site: title_case(sites[idx].as_deref().unwrap_or("")),
            transect: transects[idx].as_deref().unwrap_or("").trim().to_string(),
            date,
            year,
            species: species[idx].as_deref().unwrap_or("").trim().to_uppercase(),
            stage: stages[idx].as_deref().unwrap_or("").trim().to_uppercase(),
            survey_type: survey_types[idx].as_deref().unwrap_or("").trim().to_string(),
        });
    }

    if malformed > 0 {
        tracing::warn!(
            "{} of {} rows have malformed or missing dates",
            malformed,
            observations.len()
        );
    }

    Ok(observations)
}

/// Load and concatenate observations from every input table
pub fn load_observations(paths: &[PathBuf], config: &PipelineConfig) -> Result<Vec<Observation>> {
    let mut all = Vec::new();
    for path in paths {
        let df = load_table(path)?;
        tracing::info!("Loaded {}: {} rows", path.display(), df.height());
        let observations = observations_from_frame(&df, config)
            .with_context(|| format!("Failed to read observations from {}", path.display()))?;
        all.extend(observations);
    }
    Ok(all)
}
