// src/acq/evoked.rs
//! Evoked postsynaptic current analysis (oEPSC/IPSC).
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::filter::{self, FilterConfig};
use crate::fit::{self, Bounds, DecayFit, DecayModel};
use crate::record::Record;
use crate::signal;
use crate::types::{Trace, TraceMeta};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvokedParams {
    pub baseline_start: f64,
    pub baseline_end: f64,
    pub pulse_start: f64,
    pub n_window_start: f64,
    pub n_window_end: f64,
    pub p_window_start: f64,
    pub p_window_end: f64,
    pub charge_transfer: bool,
    pub est_decay: bool,
    pub curve_fit_decay: bool,
    pub curve_fit_type: DecayModel,
    pub filter: FilterConfig,
}

impl Default for EvokedParams {
    fn default() -> Self {
        Self {
            baseline_start: 800.0,
            baseline_end: 1000.0,
            pulse_start: 1000.0,
            n_window_start: 1001.0,
            n_window_end: 1050.0,
            p_window_start: 1045.0,
            p_window_end: 1055.0,
            charge_transfer: false,
            est_decay: false,
            curve_fit_decay: false,
            curve_fit_type: DecayModel::Single,
            filter: FilterConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakDirection {
    Positive,
    Negative,
}

impl PeakDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeakDirection::Positive => "positive",
            PeakDirection::Negative => "negative",
        }
    }

    fn of_value(y: f64) -> Self {
        if y < 0.0 {
            PeakDirection::Negative
        } else {
            PeakDirection::Positive
        }
    }
}

impl fmt::Display for PeakDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sample-index layout of one sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Layout {
    per_ms: f64,
    pulse_start: usize,
    negative: (usize, usize),
    positive: (usize, usize),
    baseline_mean: f64,
}

/// Features of one evoked-current sweep.
#[derive(Clone, Debug)]
pub struct EvokedFeatures {
    pub meta: TraceMeta,
    pub pulse_start_ms: f64,
    pub direction: PeakDirection,
    pub peak_index: usize,
    pub peak_time_ms: f64,
    /// Signed peak value.
    pub peak: f64,
    /// First sample at or after the peak that returns past the baseline; the trace length
    /// when it never does.
    pub zero_crossing: usize,
    pub charge_transfer: Option<f64>,
    /// Time from the peak to 1/e of its amplitude, ms.
    pub est_decay: Option<f64>,
    pub fit: Option<DecayFit>,
    filtered: Vec<f64>,
    layout: Layout,
    params: EvokedParams,
}

impl EvokedFeatures {
    pub fn amplitude(&self) -> f64 {
        self.peak.abs()
    }

    pub fn fit_tau(&self) -> Option<f64> {
        self.fit.as_ref().and_then(|f| signal::finite(f.tau()))
    }

    pub fn filtered(&self) -> &[f64] {
        &self.filtered
    }

    /// Moves the peak to a manually chosen point and recomputes everything that depends on it.
    pub fn with_peak(&self, x_ms: f64, y: f64) -> Self {
        let index = ((x_ms * self.layout.per_ms).max(0.0) as usize)
            .min(self.filtered.len().saturating_sub(1));
        derive(
            self.meta.clone(),
            self.filtered.clone(),
            self.layout,
            self.params.clone(),
            PeakDirection::of_value(y),
            index,
            y,
        )
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("Epoch", self.meta.epoch.as_str())
            .with("Acq number", f64::from(self.meta.acq_number))
            .with("Peak direction", self.direction.as_str())
            .with("Amplitude", self.amplitude())
            .with("Peak time (ms)", self.peak_time_ms);
        if self.params.charge_transfer {
            record.insert("Charge_transfer", self.charge_transfer);
        }
        if self.params.est_decay {
            record.insert("Est_decay", self.est_decay);
        }
        if self.params.curve_fit_decay {
            record.insert("Curve_fit_tau", self.fit_tau());
        }
        record
    }
}

/// Polarity of the larger excursion over the whole sweep. Ties count as negative.
fn direction(samples: &[f64]) -> PeakDirection {
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    if max.abs() > min.abs() {
        PeakDirection::Positive
    } else {
        PeakDirection::Negative
    }
}

fn zero_crossing(samples: &[f64], peak: usize, direction: PeakDirection, baseline: f64) -> usize {
    let tail = signal::window(samples, peak, samples.len());
    let crossed = match direction {
        PeakDirection::Negative => tail.iter().position(|&v| v > baseline),
        PeakDirection::Positive => tail.iter().position(|&v| v < baseline),
    };
    crossed.map_or(samples.len(), |i| i + peak)
}

fn time_axis(start: usize, end: usize, per_ms: f64) -> Vec<f64> {
    (start..end).map(|i| i as f64 / per_ms).collect()
}

/// Time after the peak at which the decay reaches `peak / e`, by linear interpolation.
fn estimate_decay(decay: &[f64], peak: f64, direction: PeakDirection, per_ms: f64) -> Option<f64> {
    if decay.is_empty() {
        return None;
    }
    let target = peak / std::f64::consts::E;
    let (target, rising): (f64, Vec<f64>) = match direction {
        PeakDirection::Positive => (-target, decay.iter().map(|v| -v).collect()),
        PeakDirection::Negative => (target, decay.to_vec()),
    };
    let times = time_axis(0, decay.len(), per_ms);
    signal::interp(target, &rising, &times)
}

fn fit_decay(
    decay: &[f64],
    peak: f64,
    direction: PeakDirection,
    est_tau: Option<f64>,
    model: DecayModel,
    per_ms: f64,
) -> Option<DecayFit> {
    let x = time_axis(0, decay.len(), per_ms);
    let tau = est_tau
        .filter(|t| *t > 0.0)
        .unwrap_or_else(|| (decay.len() as f64 / per_ms / 3.0).max(1.0 / per_ms));
    let guess = model.initial_guess(peak, tau);
    let bounds = Bounds::for_polarity(model, direction == PeakDirection::Positive);
    match fit::fit_decay(model, &x, decay, &guess, &bounds) {
        Ok(fit) => Some(fit),
        Err(err) => {
            warn!("decay fit failed: {err}");
            None
        }
    }
}

fn derive(
    meta: TraceMeta,
    filtered: Vec<f64>,
    layout: Layout,
    params: EvokedParams,
    direction: PeakDirection,
    peak_index: usize,
    peak: f64,
) -> EvokedFeatures {
    let per_ms = layout.per_ms;
    let zero_crossing = zero_crossing(&filtered, peak_index, direction, layout.baseline_mean);

    let charge_transfer = params.charge_transfer.then(|| {
        let segment = signal::window(&filtered, layout.pulse_start, zero_crossing);
        let x = time_axis(layout.pulse_start, layout.pulse_start + segment.len(), per_ms);
        signal::trapz(segment, &x)
    });

    let decay = signal::window(&filtered, peak_index, zero_crossing);
    let est_tau = if params.est_decay || params.curve_fit_decay {
        estimate_decay(decay, peak, direction, per_ms)
    } else {
        None
    };
    let fit = if params.curve_fit_decay {
        fit_decay(decay, peak, direction, est_tau, params.curve_fit_type, per_ms)
    } else {
        None
    };
    debug!(
        "acquisition {}: {} peak {:.3} at sample {}, crossing at {}",
        meta.acq_number, direction, peak, peak_index, zero_crossing
    );

    EvokedFeatures {
        meta,
        pulse_start_ms: layout.pulse_start as f64 / per_ms,
        direction,
        peak_index,
        peak_time_ms: peak_index as f64 / per_ms,
        peak,
        zero_crossing,
        charge_transfer: charge_transfer.and_then(signal::finite),
        est_decay: est_tau.filter(|_| params.est_decay),
        fit,
        filtered,
        layout,
        params,
    }
}

pub fn analyze(trace: &Trace, params: &EvokedParams) -> Result<EvokedFeatures, AnalysisError> {
    let len = trace.len();
    let (bs, be) = (
        trace.ms_to_index(params.baseline_start),
        trace.ms_to_index(params.baseline_end),
    );
    let filtered = filter::filter(trace.samples(), bs..be, &params.filter, trace.sample_rate())?;
    let layout = Layout {
        per_ms: trace.samples_per_ms(),
        pulse_start: trace.ms_to_index(params.pulse_start),
        negative: (
            trace.ms_to_index(params.n_window_start),
            trace.ms_to_index(params.n_window_end),
        ),
        positive: (
            trace.ms_to_index(params.p_window_start),
            trace.ms_to_index(params.p_window_end),
        ),
        baseline_mean: signal::mean(signal::window(&filtered, bs, be)).unwrap_or(0.0),
    };

    let direction = direction(&filtered);
    let (start, end) = match direction {
        PeakDirection::Positive => layout.positive,
        PeakDirection::Negative => layout.negative,
    };
    let window = signal::window(&filtered, start, end);
    let offset = match direction {
        PeakDirection::Positive => signal::argmax(window),
        PeakDirection::Negative => signal::argmin(window),
    };
    let peak_index = offset.map(|o| o + start).ok_or(AnalysisError::Window {
        name: "peak",
        start,
        end,
        len,
    })?;
    let peak = filtered[peak_index];

    Ok(derive(
        trace.meta().clone(),
        filtered,
        layout,
        params.clone(),
        direction,
        peak_index,
        peak,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 10_000.0;

    /// Linear rise from 1000 ms to a peak at `peak_ms`, exponential decay with `tau` ms,
    /// then a small rebound past the baseline 100 ms after the peak.
    fn current(amplitude: f64, peak_ms: f64, tau: f64) -> Trace {
        let samples = (0..15_000)
            .map(|i| {
                let t = i as f64 / 10.0;
                if t < 1000.0 {
                    0.0
                } else if t < peak_ms {
                    amplitude * (t - 1000.0) / (peak_ms - 1000.0)
                } else if t < peak_ms + 100.0 {
                    amplitude * (-(t - peak_ms) / tau).exp()
                } else {
                    -0.1 * amplitude.signum()
                }
            })
            .collect();
        Trace::new(TraceMeta::new("oepsc", 2, "0"), FS, samples)
    }

    fn all_measures() -> EvokedParams {
        EvokedParams {
            charge_transfer: true,
            est_decay: true,
            curve_fit_decay: true,
            ..Default::default()
        }
    }

    #[test]
    fn negative_current_is_characterised() {
        let features = analyze(&current(-50.0, 1010.0, 10.0), &all_measures()).unwrap();
        assert_eq!(features.direction, PeakDirection::Negative);
        assert_eq!(features.peak_index, 10_100);
        assert!((features.amplitude() - 50.0).abs() < 1e-9);
        assert_eq!(features.zero_crossing, 11_100);
        assert!((features.charge_transfer.unwrap() + 750.0).abs() < 1.0);
        assert!((features.est_decay.unwrap() - 10.0).abs() < 0.01);
        let tau = features.fit_tau().unwrap();
        assert!((tau - 10.0).abs() / 10.0 < 0.05, "{tau}");
    }

    #[test]
    fn positive_current_uses_positive_window() {
        let features = analyze(&current(30.0, 1050.0, 5.0), &all_measures()).unwrap();
        assert_eq!(features.direction, PeakDirection::Positive);
        assert_eq!(features.peak_index, 10_500);
        assert!((features.est_decay.unwrap() - 5.0).abs() < 0.01);
        let fit = features.fit.as_ref().unwrap();
        assert!(fit.amplitudes().iter().all(|a| *a >= 0.0));
        assert!((fit.tau() - 5.0).abs() / 5.0 < 0.05);
    }

    #[test]
    fn double_exponential_fit_stays_in_bounds() {
        let params = EvokedParams {
            curve_fit_type: DecayModel::Double,
            ..all_measures()
        };
        let features = analyze(&current(-50.0, 1010.0, 10.0), &params).unwrap();
        let fit = features.fit.as_ref().unwrap();
        assert!(fit.amplitudes().iter().all(|a| *a <= 0.0));
        assert!(fit.taus().iter().all(|t| *t > 0.0));
        assert_eq!(fit.curve.len(), features.zero_crossing - features.peak_index);
    }

    #[test]
    fn optional_fields_follow_settings() {
        let features = analyze(&current(-50.0, 1010.0, 10.0), &EvokedParams::default()).unwrap();
        let record = features.to_record();
        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(
            keys,
            ["Epoch", "Acq number", "Peak direction", "Amplitude", "Peak time (ms)"]
        );
        assert_eq!(features.charge_transfer, None);
        assert!(features.fit.is_none());

        let full = analyze(&current(-50.0, 1010.0, 10.0), &all_measures())
            .unwrap()
            .to_record();
        assert!(full.number("Charge_transfer").is_some());
        assert!(full.number("Est_decay").is_some());
        assert!(full.number("Curve_fit_tau").is_some());
        assert_eq!(full.get("Peak direction").and_then(|v| v.text()), Some("negative"));
    }

    #[test]
    fn moving_the_peak_recomputes_dependents() {
        let features = analyze(&current(-50.0, 1010.0, 10.0), &all_measures()).unwrap();
        let y = features.filtered()[10_200];
        let moved = features.with_peak(1020.0, y);
        assert_eq!(moved.peak_index, 10_200);
        assert_eq!(moved.direction, PeakDirection::Negative);
        assert!((moved.est_decay.unwrap() - 10.0).abs() < 0.01);
        assert!(moved.charge_transfer.unwrap() > features.charge_transfer.unwrap() - 1e-9);
        assert_eq!(features.peak_index, 10_100);

        let flipped = features.with_peak(1020.0, 5.0);
        assert_eq!(flipped.direction, PeakDirection::Positive);
        assert_eq!(flipped.zero_crossing, 10_200);
    }

    #[test]
    fn unresolved_crossing_runs_to_trace_end() {
        let samples = [0.0, 0.0, -1.0, -2.0, -1.5, -1.0];
        assert_eq!(zero_crossing(&samples, 3, PeakDirection::Negative, 0.0), 6);
        assert_eq!(zero_crossing(&samples, 3, PeakDirection::Positive, 0.0), 3);
    }
}
