// src/types.rs
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::acq::AnalysisError;

/// Scalar metadata attached to every sweep by the loader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceMeta {
    pub name: String,
    pub acq_number: u32,
    pub epoch: String,
    #[serde(default)]
    pub pulse_pattern: String,
    #[serde(default)]
    pub ramp: bool,
    #[serde(default)]
    pub pulse_amp: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl TraceMeta {
    pub fn new(name: impl Into<String>, acq_number: u32, epoch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            acq_number,
            epoch: epoch.into(),
            pulse_pattern: String::new(),
            ramp: false,
            pulse_amp: 0.0,
            timestamp: None,
        }
    }

    pub fn with_pulse(
        mut self,
        pulse_pattern: impl Into<String>,
        pulse_amp: f64,
        ramp: bool,
    ) -> Self {
        self.pulse_pattern = pulse_pattern.into();
        self.pulse_amp = pulse_amp;
        self.ramp = ramp;
        self
    }
}

/// One digitized sweep. Never mutated after creation.
#[derive(Clone, Debug)]
pub struct Trace {
    meta: TraceMeta,
    sample_rate: f64,
    array: Array1<f64>,
}

impl Trace {
    pub fn new(meta: TraceMeta, sample_rate: f64, samples: Vec<f64>) -> Self {
        Self {
            meta,
            sample_rate,
            array: Array1::from_vec(samples),
        }
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.sample_rate > 0.0) || !self.sample_rate.is_finite() {
            return Err(AnalysisError::InvalidSampleRate {
                acq_number: self.meta.acq_number,
                sample_rate: self.sample_rate,
            });
        }
        if self.array.is_empty() {
            return Err(AnalysisError::EmptyTrace(self.meta.acq_number));
        }
        if let Some(index) = self.array.iter().position(|v| !v.is_finite()) {
            return Err(AnalysisError::NonFiniteSample {
                acq_number: self.meta.acq_number,
                index,
            });
        }
        Ok(())
    }

    pub fn meta(&self) -> &TraceMeta {
        &self.meta
    }

    pub fn acq_number(&self) -> u32 {
        self.meta.acq_number
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Samples per millisecond.
    pub fn samples_per_ms(&self) -> f64 {
        self.sample_rate / 1000.0
    }

    pub fn samples(&self) -> &[f64] {
        self.array.as_slice().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// Time axis in milliseconds.
    pub fn time_ms(&self) -> Array1<f64> {
        let per_ms = self.samples_per_ms();
        Array1::from_shape_fn(self.array.len(), |i| i as f64 / per_ms)
    }

    /// Converts a millisecond position to a sample index clamped to the trace.
    pub fn ms_to_index(&self, ms: f64) -> usize {
        ms_to_index(ms, self.sample_rate, self.array.len())
    }
}

pub(crate) fn ms_to_index(ms: f64, sample_rate: f64, len: usize) -> usize {
    let index = (ms * sample_rate / 1000.0).round();
    if index <= 0.0 {
        0
    } else {
        (index as usize).min(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_bad_sample_rate_and_nan() {
        let meta = TraceMeta::new("a", 1, "0");
        assert!(Trace::new(meta.clone(), 0.0, vec![1.0]).validate().is_err());
        assert!(Trace::new(meta.clone(), 10_000.0, vec![]).validate().is_err());
        assert!(Trace::new(meta.clone(), 10_000.0, vec![1.0, f64::NAN])
            .validate()
            .is_err());
        assert!(Trace::new(meta, 10_000.0, vec![1.0, 2.0]).validate().is_ok());
    }

    #[test]
    fn ms_conversion_clamps_to_length() {
        let trace = Trace::new(TraceMeta::new("a", 1, "0"), 10_000.0, vec![0.0; 100]);
        assert_eq!(trace.ms_to_index(5.0), 50);
        assert_eq!(trace.ms_to_index(50.0), 100);
        assert_eq!(trace.ms_to_index(-1.0), 0);
        assert!((trace.time_ms()[10] - 1.0).abs() < 1e-12);
    }
}
