// src/settings.rs
//! Batch configuration, read from JSON. Every key is optional and falls back to its default.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::acq::{AnalysisError, CurrentClampParams, EvokedParams, LfpParams, Modality};

/// 1-based amplitude slice used for the IV regression.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateParams {
    pub iv_start: usize,
    pub iv_end: usize,
}

impl Default for AggregateParams {
    fn default() -> Self {
        Self { iv_start: 1, iv_end: 6 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Analyzer tag: `current_clamp`, `lfp` or `evoked` (`oepsc` is accepted too).
    pub analysis: Modality,
    pub current_clamp: CurrentClampParams,
    pub lfp: LfpParams,
    pub evoked: EvokedParams,
    pub aggregate: AggregateParams,
}

impl AnalysisSettings {
    pub fn from_json(text: &str) -> Result<Self, AnalysisError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Checks the selected analyzer's filter against a sample rate before any trace is touched.
    pub fn validate(&self, sample_rate: f64) -> Result<(), AnalysisError> {
        let filter = match self.analysis {
            Modality::CurrentClamp => &self.current_clamp.filter,
            Modality::Lfp => &self.lfp.filter,
            Modality::Evoked => &self.evoked.filter,
        };
        filter.validate(sample_rate)?;
        Ok(())
    }
}
