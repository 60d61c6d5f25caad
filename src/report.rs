//! Output Tables
//!
//! Converts a `PipelineReport` into Polars DataFrames and writes the fixed
//! table set for one pipeline:
//! - `counts.csv`: zero-filled count records
//! - `slopes.csv`: one row per fitted unit, with plot annotation text
//! - `curves.csv`: back-transformed trend curves
//! - `diagnostics.csv`: Durbin-Watson results
//! - `failures.csv`: units that could not be fitted or diagnosed

use crate::error::Result;
use crate::pipeline::PipelineReport;
use crate::stats::CoefficientSummary;
use crate::utils::normalization::format_survey_date;
use anyhow::Context;
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;

/// Conventional significance stars for a p-value
pub fn significance_stars(p_value: f64) -> &'static str {
    if p_value < 0.001 {
        "***"
    } else if p_value < 0.01 {
        "**"
    } else if p_value < 0.05 {
        "*"
    } else if p_value < 0.1 {
        "."
    } else {
        ""
    }
}

/// Annotation printed on trend plots, e.g. "slope = 0.1234 (SE 0.0456), p = 0.0120 *"
pub fn slope_annotation(slope: &CoefficientSummary) -> String {
    let text = format!(
        "slope = {:.4} (SE {:.4}), p = {:.4}",
        slope.estimate, slope.std_error, slope.p_value
    );
    match significance_stars(slope.p_value) {
        "" => text,
        stars => format!("{} {}", text, stars),
    }
}

/// Zero-filled records; the count column takes the pipeline's count field name
pub fn counts_frame(report: &PipelineReport) -> Result<DataFrame> {
    let records = &report.imputed;
    let sites: Vec<&str> = records.iter().map(|r| r.key.site.as_str()).collect();
    let transects: Vec<&str> = records.iter().map(|r| r.key.transect.as_str()).collect();
    let species: Vec<&str> = records.iter().map(|r| r.key.species.as_str()).collect();
    let years: Vec<i32> = records.iter().map(|r| r.key.year).collect();
    let visits: Vec<Option<String>> = records
        .iter()
        .map(|r| r.key.visit.map(format_survey_date))
        .collect();
    let counts: Vec<f64> = records.iter().map(|r| r.count).collect();

    Ok(DataFrame::new(vec![
        Column::new("site".into(), sites),
        Column::new("transect".into(), transects),
        Column::new("species".into(), species),
        Column::new("year".into(), years),
        Column::new("visit".into(), visits),
        Column::new(report.config.count_field.as_str().into(), counts),
    ])?)
}

pub fn slopes_frame(report: &PipelineReport) -> Result<DataFrame> {
    let trends = &report.trends;
    let sites: Vec<&str> = trends.iter().map(|t| t.fitted.unit.site.as_str()).collect();
    let species: Vec<&str> = trends.iter().map(|t| t.fitted.unit.species.as_str()).collect();
    let models: Vec<&str> = trends.iter().map(|t| t.kind().as_str()).collect();
    let slopes: Vec<f64> = trends.iter().map(|t| t.fitted.model.slope().estimate).collect();
    let std_errors: Vec<f64> = trends.iter().map(|t| t.fitted.model.slope().std_error).collect();
    let p_values: Vec<f64> = trends.iter().map(|t| t.fitted.model.slope().p_value).collect();
    let n_transects: Vec<u64> = trends.iter().map(|t| t.fitted.n_transects as u64).collect();
    let singular: Vec<bool> = trends.iter().map(|t| t.fitted.model.singular()).collect();
    let annotations: Vec<String> = trends
        .iter()
        .map(|t| slope_annotation(t.fitted.model.slope()))
        .collect();

    Ok(DataFrame::new(vec![
        Column::new("site".into(), sites),
        Column::new("species".into(), species),
        Column::new("model".into(), models),
        Column::new("slope".into(), slopes),
        Column::new("std_error".into(), std_errors),
        Column::new("p_value".into(), p_values),
        Column::new("n_transects".into(), n_transects),
        Column::new("singular".into(), singular),
        Column::new("annotation".into(), annotations),
    ])?)
}

pub fn curves_frame(report: &PipelineReport) -> Result<DataFrame> {
    let mut sites = Vec::new();
    let mut species = Vec::new();
    let mut years = Vec::new();
    let mut predicted = Vec::new();

    for trend in &report.trends {
        for point in &trend.curve.points {
            sites.push(trend.curve.unit.site.as_str());
            species.push(trend.curve.unit.species.as_str());
            years.push(point.year);
            predicted.push(point.predicted);
        }
    }

    Ok(DataFrame::new(vec![
        Column::new("site".into(), sites),
        Column::new("species".into(), species),
        Column::new("year".into(), years),
        Column::new("predicted".into(), predicted),
    ])?)
}

/// Units without diagnostics are left out here and listed in `failures_frame`
pub fn diagnostics_frame(report: &PipelineReport) -> Result<DataFrame> {
    let rows: Vec<_> = report
        .trends
        .iter()
        .filter_map(|t| t.diagnostics.as_ref().map(|d| (&t.fitted.unit, d)))
        .collect();

    Ok(DataFrame::new(vec![
        Column::new(
            "site".into(),
            rows.iter().map(|(u, _)| u.site.as_str()).collect::<Vec<_>>(),
        ),
        Column::new(
            "species".into(),
            rows.iter().map(|(u, _)| u.species.as_str()).collect::<Vec<_>>(),
        ),
        Column::new(
            "durbin_watson".into(),
            rows.iter().map(|(_, d)| d.durbin_watson).collect::<Vec<_>>(),
        ),
        Column::new(
            "lag1_autocorrelation".into(),
            rows.iter().map(|(_, d)| d.lag1_autocorrelation).collect::<Vec<_>>(),
        ),
        Column::new(
            "p_positive".into(),
            rows.iter().map(|(_, d)| d.p_positive).collect::<Vec<_>>(),
        ),
        Column::new(
            "p_negative".into(),
            rows.iter().map(|(_, d)| d.p_negative).collect::<Vec<_>>(),
        ),
        Column::new(
            "p_two_sided".into(),
            rows.iter().map(|(_, d)| d.p_two_sided).collect::<Vec<_>>(),
        ),
    ])?)
}

pub fn failures_frame(report: &PipelineReport) -> Result<DataFrame> {
    let failures = &report.failures;
    let sites: Vec<&str> = failures.iter().map(|f| f.unit.site.as_str()).collect();
    let species: Vec<&str> = failures.iter().map(|f| f.unit.species.as_str()).collect();
    let stages: Vec<String> = failures.iter().map(|f| f.stage.to_string()).collect();
    let messages: Vec<&str> = failures.iter().map(|f| f.message.as_str()).collect();

    Ok(DataFrame::new(vec![
        Column::new("site".into(), sites),
        Column::new("species".into(), species),
        Column::new("stage".into(), stages),
        Column::new("message".into(), messages),
    ])?)
}

fn write_csv(df: &mut DataFrame, path: &Path) -> anyhow::Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write the full table set for one pipeline into `dir`
pub fn write_tables(report: &PipelineReport, dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let tables = [
        ("counts.csv", counts_frame(report)?),
        ("slopes.csv", slopes_frame(report)?),
        ("curves.csv", curves_frame(report)?),
        ("diagnostics.csv", diagnostics_frame(report)?),
        ("failures.csv", failures_frame(report)?),
    ];

    for (name, mut df) in tables {
        let path = dir.join(name);
        write_csv(&mut df, &path)?;
        tracing::debug!("Wrote {} ({} rows)", path.display(), df.height());
    }

    tracing::info!(
        "Wrote {} trends and {} failures to {}",
        report.trends.len(),
        report.failures.len(),
        dir.display()
    );
    Ok(())
}
