// src/acq/mod.rs
// Per-acquisition analysis: modality dispatch, the three analyzers, sources and batch runs.
pub mod current_clamp;
pub mod evoked;
pub mod lfp;
pub mod pipeline;
pub mod source;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub use crate::error::{AnalysisError, FilterError, FitError};
pub use current_clamp::{CurrentClampParams, SpikeFeatures, ThresholdMethod};
pub use evoked::{EvokedFeatures, EvokedParams, PeakDirection};
pub use lfp::{LfpFeatures, LfpParams};
pub use pipeline::{
    analyze_batch, BatchOutcome, BatchPipeline, BatchReport, PairedReport, Progress,
};
pub use source::{JsonTraceSource, ManualSource, TraceSource};

use crate::record::Record;
use crate::settings::AnalysisSettings;
use crate::types::Trace;

/// Which analyzer a batch runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Modality {
    #[default]
    CurrentClamp,
    Lfp,
    Evoked,
}

/// Tag lookup, including the names older settings files use.
static MODALITY_TAGS: Lazy<HashMap<&'static str, Modality>> = Lazy::new(|| {
    HashMap::from([
        ("current_clamp", Modality::CurrentClamp),
        ("current-clamp", Modality::CurrentClamp),
        ("lfp", Modality::Lfp),
        ("evoked", Modality::Evoked),
        ("oepsc", Modality::Evoked),
    ])
});

impl Modality {
    pub fn name(&self) -> &'static str {
        match self {
            Modality::CurrentClamp => "current_clamp",
            Modality::Lfp => "lfp",
            Modality::Evoked => "evoked",
        }
    }
}

impl FromStr for Modality {
    type Err = AnalysisError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        MODALITY_TAGS
            .get(tag.trim().to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| AnalysisError::UnknownAnalyzer(tag.to_string()))
    }
}

impl TryFrom<String> for Modality {
    type Error = AnalysisError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        tag.parse()
    }
}

impl From<Modality> for String {
    fn from(modality: Modality) -> Self {
        modality.name().to_string()
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output of one analyzer run.
#[derive(Clone, Debug)]
pub enum FeatureRecord {
    CurrentClamp(SpikeFeatures),
    Lfp(LfpFeatures),
    Evoked(EvokedFeatures),
}

impl FeatureRecord {
    pub fn modality(&self) -> Modality {
        match self {
            FeatureRecord::CurrentClamp(_) => Modality::CurrentClamp,
            FeatureRecord::Lfp(_) => Modality::Lfp,
            FeatureRecord::Evoked(_) => Modality::Evoked,
        }
    }

    pub fn acq_number(&self) -> u32 {
        match self {
            FeatureRecord::CurrentClamp(f) => f.meta.acq_number,
            FeatureRecord::Lfp(f) => f.meta.acq_number,
            FeatureRecord::Evoked(f) => f.meta.acq_number,
        }
    }

    pub fn to_record(&self) -> Record {
        match self {
            FeatureRecord::CurrentClamp(f) => f.to_record(),
            FeatureRecord::Lfp(f) => f.to_record(),
            FeatureRecord::Evoked(f) => f.to_record(),
        }
    }

    pub fn as_spike(&self) -> Option<&SpikeFeatures> {
        match self {
            FeatureRecord::CurrentClamp(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_lfp(&self) -> Option<&LfpFeatures> {
        match self {
            FeatureRecord::Lfp(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_evoked(&self) -> Option<&EvokedFeatures> {
        match self {
            FeatureRecord::Evoked(f) => Some(f),
            _ => None,
        }
    }
}

/// Runs one modality's analyzer on a trace.
pub fn analyze_with(
    modality: Modality,
    trace: &Trace,
    settings: &AnalysisSettings,
) -> Result<FeatureRecord, AnalysisError> {
    match modality {
        Modality::CurrentClamp => {
            current_clamp::analyze(trace, &settings.current_clamp).map(FeatureRecord::CurrentClamp)
        }
        Modality::Lfp => lfp::analyze(trace, &settings.lfp).map(FeatureRecord::Lfp),
        Modality::Evoked => evoked::analyze(trace, &settings.evoked).map(FeatureRecord::Evoked),
    }
}

/// Validates the trace and runs the analyzer selected in `settings`.
pub fn analyze(trace: &Trace, settings: &AnalysisSettings) -> Result<FeatureRecord, AnalysisError> {
    trace.validate()?;
    analyze_with(settings.analysis, trace, settings)
}
