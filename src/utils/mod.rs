//! Utility modules shared across pipelines
//!
//! - Normalization: header sanitization, date parsing, label casing, cross-tabulation

pub mod normalization;

// Re-export commonly used functions
pub use normalization::{
    cross_tabulate, format_survey_date, parse_date_and_year, parse_survey_date,
    sanitize_column_name, sanitize_frame_headers, sanitize_headers, title_case, CrossTab,
};
