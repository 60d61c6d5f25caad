//! Normalization Utilities
//!
//! Canonicalizes raw survey input before aggregation:
//! - Column headers → snake_case identifiers (letters, digits, underscore; leading letter)
//! - Date strings → `NaiveDate` in a fixed day-month-year format, plus derived year
//! - Site labels → title case, collapsing capitalization variants
//!
//! Title casing does not fix genuine misspellings ("Lower Pnd" stays a
//! separate site). `cross_tabulate` exists so those can be spotted by eye.

use crate::error::{Result, TrendError};
use crate::types::Observation;
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Canonical output format for survey dates (e.g. "05-Apr-2014")
pub const CANONICAL_DATE_FORMAT: &str = "%d-%b-%Y";

/// Sanitize a single header into an identifier
///
/// Runs of non-alphanumeric characters collapse into one underscore, the
/// result is lower-cased, and an `x` is prepended when it would not start
/// with a letter.
pub fn sanitize_column_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;

    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    match out.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => out,
        Some(_) => format!("x{}", out),
        None => "x".to_string(),
    }
}

/// Sanitize a full header row, disambiguating duplicates with `_2`, `_3`, ...
pub fn sanitize_headers<S: AsRef<str>>(headers: &[S]) -> Vec<String> {
    let mut seen: FxHashMap<String, usize> = FxHashMap::default();
    let mut out = Vec::with_capacity(headers.len());

    for header in headers {
        let base = sanitize_column_name(header.as_ref());
        let mut candidate = base.clone();
        let mut n = seen.get(&base).copied().unwrap_or(0);
        while seen.contains_key(&candidate) {
            n += 1;
            candidate = format!("{}_{}", base, n + 1);
        }
        seen.insert(base.clone(), n);
        seen.insert(candidate.clone(), 0);
        out.push(candidate);
    }

    out
}

/// Rename every column of a DataFrame to its sanitized form
pub fn sanitize_frame_headers(df: &DataFrame) -> Result<DataFrame> {
    let raw: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    let clean = sanitize_headers(&raw);

    let columns: Vec<Column> = df
        .get_columns()
        .iter()
        .zip(clean)
        .map(|(c, name)| c.clone().with_name(name.into()))
        .collect();

    Ok(DataFrame::new(columns)?)
}

/// Parse a survey date, trying each accepted format in order
pub fn parse_survey_date(raw: &str, formats: &[String]) -> Result<NaiveDate> {
    let value = raw.trim();
    for format in formats {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(date);
        }
    }
    Err(TrendError::MalformedDate {
        value: value.to_string(),
        formats: formats.to_vec(),
    })
}

/// Parse a date and derive its year; malformed dates become `(None, None)`
///
/// Callers count the `None` results; nothing aborts on bad dates.
pub fn parse_date_and_year(
    raw: Option<&str>,
    formats: &[String],
) -> (Option<NaiveDate>, Option<i32>) {
    match raw.map(|r| parse_survey_date(r, formats)) {
        Some(Ok(date)) => (Some(date), Some(date.year())),
        _ => (None, None),
    }
}

pub fn format_survey_date(date: NaiveDate) -> String {
    date.format(CANONICAL_DATE_FORMAT).to_string()
}

/// Title-case a free-text label, collapsing internal whitespace
pub fn title_case(label: &str) -> String {
    label
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Two-way frequency table over observations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrossTab {
    pub row_label: String,
    pub column_label: String,
    pub cells: BTreeMap<(String, String), usize>,
}

impl CrossTab {
    pub fn get(&self, row: &str, column: &str) -> usize {
        self.cells
            .get(&(row.to_string(), column.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Long-format table: row label, column label, n
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let rows: Vec<&str> = self.cells.keys().map(|(r, _)| r.as_str()).collect();
        let cols: Vec<&str> = self.cells.keys().map(|(_, c)| c.as_str()).collect();
        let counts: Vec<u64> = self.cells.values().map(|&n| n as u64).collect();

        Ok(DataFrame::new(vec![
            Column::new(self.row_label.as_str().into(), rows),
            Column::new(self.column_label.as_str().into(), cols),
            Column::new("n".into(), counts),
        ])?)
    }
}

/// Count observations per (row, column) label pair, e.g. site × year
pub fn cross_tabulate<R, C>(
    observations: &[Observation],
    row_label: &str,
    column_label: &str,
    row: R,
    column: C,
) -> CrossTab
where
    R: Fn(&Observation) -> String,
    C: Fn(&Observation) -> String,
{
    let mut cells = BTreeMap::new();
    for obs in observations {
        *cells.entry((row(obs), column(obs))).or_insert(0) += 1;
    }
    CrossTab {
        row_label: row_label.to_string(),
        column_label: column_label.to_string(),
        cells,
    }
}
