use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;

use crate::error::AnalysisError;
use crate::types::{Trace, TraceMeta};

/// Anything that can hand out decoded traces one at a time.
pub trait TraceSource {
    fn next_trace(&mut self) -> Result<Option<Trace>, AnalysisError>;
}

/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<Trace>,
}

impl ManualSource {
    pub fn new(traces: impl IntoIterator<Item = Trace>) -> Self {
        Self {
            queue: traces.into_iter().collect(),
        }
    }
}

impl TraceSource for ManualSource {
    fn next_trace(&mut self) -> Result<Option<Trace>, AnalysisError> {
        Ok(self.queue.pop_front())
    }
}

/// One entry of a decoded-trace JSON file: metadata fields next to the samples.
#[derive(Debug, Deserialize)]
struct DecodedTrace {
    #[serde(flatten)]
    meta: TraceMeta,
    sample_rate: f64,
    array: Vec<f64>,
}

/// Reads a JSON array of already-decoded traces. Instrument files are converted elsewhere.
pub struct JsonTraceSource {
    inner: ManualSource,
}

impl JsonTraceSource {
    pub fn from_reader(reader: impl Read) -> Result<Self, AnalysisError> {
        let decoded: Vec<DecodedTrace> = serde_json::from_reader(reader)?;
        Ok(Self {
            inner: ManualSource::new(
                decoded
                    .into_iter()
                    .map(|d| Trace::new(d.meta, d.sample_rate, d.array)),
            ),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }
}

impl TraceSource for JsonTraceSource {
    fn next_trace(&mut self) -> Result<Option<Trace>, AnalysisError> {
        self.inner.next_trace()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_source_drains_in_order() {
        let traces =
            (1..=3).map(|n| Trace::new(TraceMeta::new("t", n, "0"), 1_000.0, vec![0.0; 4]));
        let mut source = ManualSource::new(traces);
        let mut seen = Vec::new();
        while let Some(trace) = source.next_trace().unwrap() {
            seen.push(trace.acq_number());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn json_entries_carry_metadata() {
        let json = r#"[
            {"name": "cell1_1", "acq_number": 1, "epoch": "0", "pulse_pattern": "p",
             "ramp": true, "pulse_amp": 50.0, "sample_rate": 10000.0, "array": [1.0, 2.0]},
            {"name": "cell1_2", "acq_number": 2, "epoch": "1", "sample_rate": 20000.0,
             "array": [3.0]}
        ]"#;
        let mut source = JsonTraceSource::from_reader(json.as_bytes()).unwrap();
        let first = source.next_trace().unwrap().unwrap();
        assert!(first.meta().ramp);
        assert_eq!(first.meta().pulse_amp, 50.0);
        assert_eq!(first.samples(), &[1.0, 2.0]);
        let second = source.next_trace().unwrap().unwrap();
        assert_eq!(second.sample_rate(), 20_000.0);
        assert!(!second.meta().ramp);
        assert!(source.next_trace().unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        assert!(matches!(
            JsonTraceSource::from_reader("{".as_bytes()),
            Err(AnalysisError::Decode(_))
        ));
    }
}
