//! Pipeline Configuration
//!
//! One `PipelineConfig` parametrizes the shared aggregate → impute → fit →
//! diagnose pipeline. The three survey analyses (amphibian egg masses,
//! amphibian adults, squirrel calls) are presets of the same struct.
//!
//! Configs are plain JSON:
//!
//! ```json
//! {
//!   "pipelines": [
//!     { "name": "eggs", "preset": "amphibian_eggs", "inputs": ["amphibians_2013.csv"] },
//!     { "name": "calls", "preset": "squirrel_calls", "inputs": ["squirrels.csv"],
//!       "overrides": { "excluded_species": ["UNK"] } }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// How raw observations are grouped before imputation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingScheme {
    /// site × transect × species × year, integer counts
    SpeciesByYear,
    /// site × transect × species × survey visit, averaged per year after imputation
    VisitByYear,
}

/// Constant added to counts before taking logs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "value", rename_all = "snake_case")]
pub enum LogOffset {
    /// Always add the constant
    Always(f64),
    /// Add the constant only when the series contains a zero count
    WhenZeroPresent(f64),
    Never,
}

impl LogOffset {
    /// Offset to use for one fit unit's series
    pub fn resolve(&self, counts: &[f64]) -> f64 {
        match *self {
            LogOffset::Always(c) => c,
            LogOffset::WhenZeroPresent(c) => {
                if counts.iter().any(|&y| y <= 0.0) {
                    c
                } else {
                    0.0
                }
            }
            LogOffset::Never => 0.0,
        }
    }
}

impl Default for LogOffset {
    fn default() -> Self {
        LogOffset::WhenZeroPresent(0.1)
    }
}

/// Sanitized input column names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    pub site: String,
    pub transect: String,
    pub date: String,
    pub species: String,
    /// Life stage or detection type
    pub stage: String,
    pub survey_type: String,
}

impl ColumnMap {
    pub fn amphibians() -> Self {
        Self {
            site: "site_name".to_string(),
            transect: "transect".to_string(),
            date: "date".to_string(),
            species: "species_code".to_string(),
            stage: "life_stage".to_string(),
            survey_type: "survey_type".to_string(),
        }
    }

    pub fn squirrels() -> Self {
        Self {
            stage: "detect_type".to_string(),
            ..Self::amphibians()
        }
    }

    pub fn all(&self) -> [&str; 6] {
        [
            &self.site,
            &self.transect,
            &self.date,
            &self.species,
            &self.stage,
            &self.survey_type,
        ]
    }
}

/// Parameters of one pipeline instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Life-stage / detection code that is counted ("EG", "AD", "CA")
    pub target_code: String,
    /// Name of the count column in output tables
    pub count_field: String,
    pub grouping: GroupingScheme,
    pub columns: ColumnMap,
    /// Data-entry-error species codes dropped before aggregation
    pub excluded_species: Vec<String>,
    /// Survey types to keep; empty keeps everything
    #[serde(default)]
    pub survey_types: Vec<String>,
    /// Accepted date formats, tried in order
    pub date_formats: Vec<String>,
    #[serde(default)]
    pub log_offset: LogOffset,
    /// Spacing of the fitted-curve year grid
    pub curve_step: f64,
}

impl PipelineConfig {
    pub fn amphibian_eggs() -> Self {
        Self {
            target_code: "EG".to_string(),
            count_field: "egg_masses".to_string(),
            grouping: GroupingScheme::SpeciesByYear,
            columns: ColumnMap::amphibians(),
            excluded_species: default_excluded_species(),
            survey_types: Vec::new(),
            date_formats: default_date_formats(),
            log_offset: LogOffset::default(),
            curve_step: 0.1,
        }
    }

    pub fn amphibian_adults() -> Self {
        Self {
            target_code: "AD".to_string(),
            count_field: "adults".to_string(),
            ..Self::amphibian_eggs()
        }
    }

    pub fn squirrel_calls() -> Self {
        Self {
            target_code: "CA".to_string(),
            count_field: "mean_calls".to_string(),
            grouping: GroupingScheme::VisitByYear,
            columns: ColumnMap::squirrels(),
            ..Self::amphibian_eggs()
        }
    }

    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "amphibian_eggs" => Ok(Self::amphibian_eggs()),
            "amphibian_adults" => Ok(Self::amphibian_adults()),
            "squirrel_calls" => Ok(Self::squirrel_calls()),
            _ => anyhow::bail!("Unknown pipeline preset: {}", name),
        }
    }

    pub fn is_excluded_species(&self, code: &str) -> bool {
        self.excluded_species.iter().any(|s| s.eq_ignore_ascii_case(code))
    }

    pub fn accepts_survey_type(&self, survey_type: &str) -> bool {
        self.survey_types.is_empty()
            || self.survey_types.iter().any(|s| s.eq_ignore_ascii_case(survey_type))
    }
}

fn default_excluded_species() -> Vec<String> {
    ["", "NA", "UNK", "UNID", "UNKNOWN", "NONE"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_date_formats() -> Vec<String> {
    vec!["%d-%b-%Y".to_string(), "%Y-%m-%d".to_string()]
}

/// Optional per-pipeline overrides applied on top of a preset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineOverrides {
    pub target_code: Option<String>,
    pub count_field: Option<String>,
    pub excluded_species: Option<Vec<String>>,
    pub survey_types: Option<Vec<String>>,
    pub date_formats: Option<Vec<String>>,
    pub log_offset: Option<LogOffset>,
    pub columns: Option<ColumnMap>,
}

/// One configured pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Output subdirectory name
    pub name: String,
    pub preset: String,
    pub inputs: Vec<PathBuf>,
    #[serde(default)]
    pub overrides: PipelineOverrides,
}

impl PipelineSpec {
    /// Preset with overrides applied
    pub fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::preset(&self.preset)
            .with_context(|| format!("Pipeline '{}'", self.name))?;
        let o = self.overrides.clone();

        if let Some(v) = o.target_code {
            config.target_code = v;
        }
        if let Some(v) = o.count_field {
            config.count_field = v;
        }
        if let Some(v) = o.excluded_species {
            config.excluded_species = v;
        }
        if let Some(v) = o.survey_types {
            config.survey_types = v;
        }
        if let Some(v) = o.date_formats {
            config.date_formats = v;
        }
        if let Some(v) = o.log_offset {
            config.log_offset = v;
        }
        if let Some(v) = o.columns {
            config.columns = v;
        }

        Ok(config)
    }
}

/// Top-level analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub pipelines: Vec<PipelineSpec>,
}

impl AnalysisConfig {
    /// Load configuration from JSON file
    ///
    /// Relative input paths are resolved against the config file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: AnalysisConfig = serde_json::from_str(&contents)
            .with_context(|| "Failed to parse config JSON")?;

        if config.pipelines.is_empty() {
            anyhow::bail!("Config {:?} declares no pipelines", path);
        }

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for pipeline in &mut config.pipelines {
            // Fail early on unknown presets
            pipeline.resolve()?;
            for input in &mut pipeline.inputs {
                if input.is_relative() {
                    *input = base.join(&*input);
                }
            }
        }

        Ok(config)
    }
}
