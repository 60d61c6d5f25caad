//! Model selection by transect cardinality
//!
//! One transect: nothing to pool across, so a quasi-Poisson GLM on the counts.
//! Several transects: a mixed model on log counts with transect and year
//! random intercepts. Decided separately for every fit unit, since transect
//! coverage differs between species.

use crate::error::{Result, TrendError};
use crate::types::CountRecord;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModelKind {
    #[serde(rename = "single-transect-glm")]
    SingleTransectGlm,
    #[serde(rename = "multi-transect-mixed")]
    MultiTransectMixed,
}

impl ModelKind {
    /// Pick the model for one fit unit's (imputed) records
    ///
    /// Zero-filled rows count: a transect present only through imputation
    /// still makes the slice multi-transect.
    pub fn select(records: &[CountRecord]) -> Result<Self> {
        let transects: BTreeSet<&str> = records.iter().map(|r| r.key.transect.as_str()).collect();
        match transects.len() {
            0 => Err(TrendError::InsufficientData("no transects in slice".to_string())),
            1 => Ok(ModelKind::SingleTransectGlm),
            _ => Ok(ModelKind::MultiTransectMixed),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::SingleTransectGlm => "single-transect-glm",
            ModelKind::MultiTransectMixed => "multi-transect-mixed",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
