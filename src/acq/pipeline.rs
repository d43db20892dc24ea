// src/acq/pipeline.rs
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use log::{debug, info, warn};
use rayon::prelude::*;

use super::source::TraceSource;
use super::{AnalysisError, FeatureRecord, Modality};
use crate::aggregate::{self, Aggregate};
use crate::settings::AnalysisSettings;
use crate::types::Trace;

/// Called with (finished, total) after each acquisition; counts never go backwards.
pub type Progress<'a> = &'a (dyn Fn(usize, usize) + Sync);

/// Per-acquisition results of one batch, keyed by acquisition number.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: BTreeMap<u32, Result<FeatureRecord, AnalysisError>>,
}

impl BatchOutcome {
    /// Successful records only.
    pub fn records(&self) -> BTreeMap<u32, FeatureRecord> {
        self.results
            .iter()
            .filter_map(|(acq, r)| r.as_ref().ok().map(|f| (*acq, f.clone())))
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (u32, &AnalysisError)> {
        self.results
            .iter()
            .filter_map(|(acq, r)| r.as_ref().err().map(|e| (*acq, e)))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Analyzes every trace in parallel. Returns only after all acquisitions are done; a failing
/// acquisition becomes an `Err` entry instead of stopping the batch.
pub fn analyze_batch(
    traces: &[Trace],
    settings: &AnalysisSettings,
    progress: Option<Progress<'_>>,
) -> Result<BatchOutcome, AnalysisError> {
    let mut seen = BTreeSet::new();
    for trace in traces {
        if !seen.insert(trace.acq_number()) {
            return Err(AnalysisError::DuplicateAcquisition(trace.acq_number()));
        }
    }
    let mut rates: Vec<f64> = traces
        .iter()
        .map(Trace::sample_rate)
        .filter(|r| r.is_finite() && *r > 0.0)
        .collect();
    rates.sort_by(f64::total_cmp);
    rates.dedup();
    for rate in rates {
        settings.validate(rate)?;
    }

    let total = traces.len();
    info!("analyzing {total} acquisitions with the {} analyzer", settings.analysis);
    let done = AtomicUsize::new(0);
    let reported = Mutex::new(0usize);
    let results: BTreeMap<u32, Result<FeatureRecord, AnalysisError>> = traces
        .par_iter()
        .map(|trace| {
            let result = super::analyze(trace, settings);
            if let Err(err) = &result {
                warn!("acquisition {} failed: {err}", trace.acq_number());
            }
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            if let Ok(mut last) = reported.lock() {
                if finished > *last {
                    *last = finished;
                    debug!("progress {finished}/{total}");
                    if let Some(report) = progress {
                        report(finished, total);
                    }
                }
            }
            (trace.acq_number(), result)
        })
        .collect();

    let outcome = BatchOutcome { results };
    info!(
        "batch finished: {} ok, {} failed",
        outcome.len() - outcome.failures().count(),
        outcome.failures().count()
    );
    Ok(outcome)
}

/// Result of a full run: per-acquisition outcome plus the aggregate tables.
#[derive(Debug)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    pub aggregate: Aggregate,
}

/// Field-potential and evoked-current batches recorded together, plus their joined tables.
#[derive(Debug)]
pub struct PairedReport {
    pub field: BatchOutcome,
    pub evoked: BatchOutcome,
    pub aggregate: Aggregate,
}

fn drain_source<S: TraceSource>(source: &mut S) -> Result<Vec<Trace>, AnalysisError> {
    let mut traces = Vec::new();
    while let Some(trace) = source.next_trace()? {
        traces.push(trace);
    }
    Ok(traces)
}

/// Drains a trace source, analyzes everything, then aggregates the successful records.
pub struct BatchPipeline<S: TraceSource> {
    source: S,
    settings: AnalysisSettings,
}

impl<S: TraceSource> BatchPipeline<S> {
    pub fn new(source: S, settings: AnalysisSettings) -> Self {
        Self { source, settings }
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    pub fn drain(&mut self) -> Result<Vec<Trace>, AnalysisError> {
        drain_source(&mut self.source)
    }

    pub fn run(&mut self, progress: Option<Progress<'_>>) -> Result<BatchReport, AnalysisError> {
        let traces = self.drain()?;
        let outcome = analyze_batch(&traces, &self.settings, progress)?;
        let aggregate = aggregate::aggregate(&outcome.records(), &self.settings.aggregate)?;
        Ok(BatchReport { outcome, aggregate })
    }

    /// Runs this source as field potentials and `evoked` as the evoked currents recorded with
    /// them, then joins the two on acquisition number. Progress counts span both batches.
    pub fn run_paired<E: TraceSource>(
        &mut self,
        mut evoked: E,
        progress: Option<Progress<'_>>,
    ) -> Result<PairedReport, AnalysisError> {
        let field_traces = self.drain()?;
        let evoked_traces = drain_source(&mut evoked)?;
        let offset = field_traces.len();
        let total = offset + evoked_traces.len();

        let field_settings = AnalysisSettings {
            analysis: Modality::Lfp,
            ..self.settings.clone()
        };
        let evoked_settings = AnalysisSettings {
            analysis: Modality::Evoked,
            ..self.settings.clone()
        };
        let first = |done: usize, _: usize| {
            if let Some(report) = progress {
                report(done, total);
            }
        };
        let second = |done: usize, _: usize| {
            if let Some(report) = progress {
                report(offset + done, total);
            }
        };

        let field = analyze_batch(&field_traces, &field_settings, Some(&first))?;
        let evoked = analyze_batch(&evoked_traces, &evoked_settings, Some(&second))?;
        let aggregate = aggregate::aggregate_paired(&field.records(), &evoked.records())?;
        Ok(PairedReport {
            field,
            evoked,
            aggregate,
        })
    }
}
