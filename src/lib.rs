// src/lib.rs
//! Electrophysiology sweep analysis: filtering, per-acquisition feature extraction for
//! current-clamp, field-potential and evoked-current recordings, and batch aggregation.
pub mod acq;
pub mod aggregate;
pub mod error;
pub mod filter;
pub mod fit;
pub mod record;
pub mod settings;
pub mod signal;
pub mod types;

pub use acq::{analyze, AnalysisError, FeatureRecord, Modality};
pub use settings::AnalysisSettings;
pub use types::{Trace, TraceMeta};
