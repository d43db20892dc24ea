// src/acq/current_clamp.rs
//! Current-clamp spike analysis.
//!
//! The analysis runs as a chain of stages. Each stage borrows the output of the previous one
//! and returns a new value; nothing is mutated after it is built. A missing upstream value
//! (no spike, no onset) makes every dependent field `None`.
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::filter::{self, FilterConfig};
use crate::record::Record;
use crate::signal::{self, PeakOptions};
use crate::types::{Trace, TraceMeta};

/// Minimum dv/dt (mV per sample) that marks a depolarisation onset.
pub const ONSET_DV_HEIGHT: f64 = 6.0;
/// Second-derivative level below which a step-pulse sample still counts as pre-spike.
pub const STEP_ONSET_DDV: f64 = 0.3;
/// Minimum prominence of a `-dv/V` peak for the max-curvature threshold.
pub const CURVATURE_PROMINENCE: f64 = 0.5;
/// Z-scored third-derivative height that marks a threshold.
pub const THIRD_DERIVATIVE_Z: f64 = 2.0;
/// Multiple of the baseline dv/dt standard deviation used as the ramp onset level.
pub const RAMP_ONSET_STD_MULT: f64 = 8.0;
/// Second-derivative level that ends the AHP search.
pub const AHP_DDV: f64 = 0.15;
/// Lead time kept before the first threshold crossing of the isolated spike.
pub const PRE_SPIKE_MS: f64 = 5.0;
/// Span after the spike peak searched for the AHP.
pub const AHP_SEARCH_MS: f64 = 5.0;

/// How the threshold sample of a step-pulse spike is located.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMethod {
    /// Last sample before the onset whose second derivative is below [`STEP_ONSET_DDV`].
    #[default]
    Legacy,
    /// Two samples before the first stimulus-window peak of `-dv/V` with prominence of at least
    /// [`CURVATURE_PROMINENCE`].
    MaxCurvature,
    /// First peak of the z-scored third derivative above [`THIRD_DERIVATIVE_Z`] between 1 ms
    /// after the stimulus start and the first spike peak, moved back one sample.
    ThirdDerivative,
}

/// Analysis windows in milliseconds plus detection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentClampParams {
    pub baseline_start: f64,
    pub baseline_end: f64,
    pub pulse_start: f64,
    pub pulse_end: f64,
    pub ramp_start: f64,
    pub ramp_end: f64,
    /// Minimum spike peak voltage (mV).
    pub threshold: f64,
    pub threshold_method: ThresholdMethod,
    pub min_spikes: usize,
    /// Moving-average window (samples) used for delta-V on spiking sweeps.
    pub delta_v_window: usize,
    pub filter: FilterConfig,
}

impl Default for CurrentClampParams {
    fn default() -> Self {
        Self {
            baseline_start: 0.0,
            baseline_end: 80.0,
            pulse_start: 300.0,
            pulse_end: 1002.0,
            ramp_start: 300.0,
            ramp_end: 4000.0,
            threshold: -15.0,
            threshold_method: ThresholdMethod::Legacy,
            min_spikes: 1,
            delta_v_window: 1000,
            filter: FilterConfig::default(),
        }
    }
}

/// Sample-index windows resolved against one trace.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Windows {
    baseline: (usize, usize),
    stimulus: (usize, usize),
    per_ms: f64,
    sample_rate: f64,
    ramp: bool,
}

impl Windows {
    fn resolve(trace: &Trace, params: &CurrentClampParams) -> Result<Self, AnalysisError> {
        let len = trace.len();
        let baseline = (
            trace.ms_to_index(params.baseline_start),
            trace.ms_to_index(params.baseline_end),
        );
        let ramp = trace.meta().ramp;
        let stimulus = if ramp {
            (trace.ms_to_index(params.ramp_start), trace.ms_to_index(params.ramp_end))
        } else {
            (trace.ms_to_index(params.pulse_start), trace.ms_to_index(params.pulse_end))
        };
        for (name, (start, end)) in [("baseline", baseline), ("stimulus", stimulus)] {
            if start >= end {
                return Err(AnalysisError::Window {
                    name,
                    start,
                    end,
                    len,
                });
            }
        }
        Ok(Self {
            baseline,
            stimulus,
            per_ms: trace.samples_per_ms(),
            sample_rate: trace.sample_rate(),
            ramp,
        })
    }

    fn ms(&self, index: usize) -> f64 {
        index as f64 / self.per_ms
    }

    fn span(&self, ms: f64) -> usize {
        (ms * self.per_ms) as usize
    }
}

/// Filtered membrane voltage with the baseline offset restored.
#[derive(Clone, Debug)]
struct Voltage {
    samples: Vec<f64>,
    dv: Vec<f64>,
    baseline: f64,
}

impl Voltage {
    fn condition(
        trace: &Trace,
        windows: &Windows,
        config: &FilterConfig,
    ) -> Result<Self, AnalysisError> {
        let (bs, be) = windows.baseline;
        let conditioned = filter::condition(trace.samples(), bs..be, config, windows.sample_rate)?;
        let offset = conditioned.baseline_offset;
        let samples: Vec<f64> = conditioned.samples.into_iter().map(|v| v + offset).collect();
        let baseline = signal::mean(signal::window(&samples, bs, be)).unwrap_or(offset);
        let dv = signal::gradient(&samples);
        Ok(Self {
            samples,
            dv,
            baseline,
        })
    }
}

/// Sub-threshold response to the stimulus.
#[derive(Clone, Copy, Debug, PartialEq)]
struct MembraneResponse {
    delta_v: Option<f64>,
    baseline_stability: Option<f64>,
}

impl MembraneResponse {
    fn measure(voltage: &Voltage, windows: &Windows, params: &CurrentClampParams) -> Self {
        let (start, end) = windows.stimulus;
        let delta_v = if windows.ramp {
            None
        } else {
            let pulse = signal::window(&voltage.samples, start, end);
            let back_half = signal::window(&voltage.samples, start + (end - start) / 2, end);
            let peak = pulse.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let level = if peak < params.threshold {
                signal::mean(back_half)
            } else {
                signal::mode(&signal::moving_mean(back_half, params.delta_v_window))
            };
            level.and_then(|l| signal::finite(l - voltage.baseline))
        };
        let before = signal::mean(signal::window(&voltage.samples, 0, start));
        let after = signal::mean(signal::window(&voltage.samples, end, voltage.samples.len()));
        Self {
            delta_v,
            baseline_stability: signal::combine(before, after, |b, a| b / a),
        }
    }
}

/// Detected spikes and the quantities derived from their timing.
#[derive(Clone, Debug, PartialEq)]
struct SpikeTrain {
    peaks: Vec<usize>,
    onset: Option<usize>,
    threshold_index: Option<usize>,
    iei: Vec<f64>,
}

impl SpikeTrain {
    fn detect(voltage: &Voltage, windows: &Windows, params: &CurrentClampParams) -> Option<Self> {
        let (start, end) = windows.stimulus;
        let search = signal::window(&voltage.samples, 0, end);
        let prominence = windows.per_ms.floor().max(1.0);
        let peaks = signal::find_peaks(
            search,
            PeakOptions::height(params.threshold).with_prominence(prominence),
        );
        if peaks.is_empty() || peaks.len() < params.min_spikes {
            debug!("{} peaks found, fewer than required {}", peaks.len(), params.min_spikes.max(1));
            return None;
        }

        let onset = signal::find_peaks(&voltage.dv, PeakOptions::height(ONSET_DV_HEIGHT))
            .into_iter()
            .find(|&p| p >= start);
        let threshold_index = onset.and_then(|onset| {
            if windows.ramp {
                ramp_threshold(voltage, windows, onset)
            } else {
                step_threshold(voltage, windows, onset, peaks[0], params.threshold_method)
            }
        });
        let iei = peaks
            .windows(2)
            .map(|w| (w[1] - w[0]) as f64 / windows.per_ms)
            .collect();
        debug!(
            "{} spikes, onset {:?}, threshold sample {:?}",
            peaks.len(),
            onset,
            threshold_index
        );
        Some(Self {
            peaks,
            onset,
            threshold_index,
            iei,
        })
    }

    fn hertz(&self, windows: &Windows) -> Option<f64> {
        let (start, end) = windows.stimulus;
        let elapsed = if windows.ramp {
            let from = self.threshold_index?;
            end.checked_sub(from)? as f64
        } else {
            (end - start) as f64
        };
        signal::finite(self.peaks.len() as f64 / (elapsed / windows.sample_rate))
    }
}

fn step_threshold(
    voltage: &Voltage,
    windows: &Windows,
    onset: usize,
    first_peak: usize,
    method: ThresholdMethod,
) -> Option<usize> {
    let start = windows.stimulus.0;
    match method {
        ThresholdMethod::Legacy => {
            let rising = signal::window(&voltage.dv, start, onset);
            signal::gradient(rising)
                .iter()
                .rposition(|&d| d < STEP_ONSET_DDV)
                .or_else(|| signal::argmin(rising))
                .map(|o| o + start)
        }
        ThresholdMethod::MaxCurvature => max_curvature_index(&voltage.samples, &voltage.dv, start),
        ThresholdMethod::ThirdDerivative => {
            third_derivative_index(&voltage.dv, start + windows.span(1.0), first_peak)
        }
    }
}

/// Peaks of `-dv/V` are found over the whole sweep so their prominence sees both sides.
fn max_curvature_index(samples: &[f64], dv: &[f64], from: usize) -> Option<usize> {
    let curvature: Vec<f64> = samples
        .iter()
        .zip(dv)
        .map(|(v, d)| signal::finite(-d / v).unwrap_or(0.0))
        .collect();
    signal::find_peaks(&curvature, PeakOptions::prominence(CURVATURE_PROMINENCE))
        .into_iter()
        .find(|&p| p >= from)?
        .checked_sub(2)
}

/// The z-score uses the whole sweep; only `from..to` is searched.
fn third_derivative_index(dv: &[f64], from: usize, to: usize) -> Option<usize> {
    let dddv = signal::gradient(&signal::gradient(dv));
    let mean = signal::mean(&dddv)?;
    let std = signal::std_dev(&dddv).filter(|s| *s > 0.0)?;
    let zscored: Vec<f64> = signal::window(&dddv, from, to)
        .iter()
        .map(|d| (d - mean) / std)
        .collect();
    let first = signal::find_peaks(&zscored, PeakOptions::height(THIRD_DERIVATIVE_Z))
        .into_iter()
        .next()?;
    (first + from).checked_sub(1)
}

fn ramp_threshold(voltage: &Voltage, windows: &Windows, onset: usize) -> Option<usize> {
    let (bs, be) = windows.baseline;
    let noise = signal::std_dev(signal::window(&voltage.dv, bs, be))?;
    let start = windows.stimulus.0;
    let rising = signal::window(&voltage.dv, start, onset);
    rising
        .iter()
        .rposition(|&d| d < RAMP_ONSET_STD_MULT * noise)
        .or_else(|| signal::argmin(rising))
        .map(|o| o + start)
}

/// The first action potential cut out of the sweep, with its shape measurements.
#[derive(Clone, Debug, PartialEq)]
struct FirstSpike {
    start: usize,
    samples: Vec<f64>,
    width_ms: f64,
    ahp_index: usize,
}

impl FirstSpike {
    fn isolate(voltage: &Voltage, windows: &Windows, train: &SpikeTrain) -> Option<Self> {
        let threshold_index = train.threshold_index?;
        let threshold = *voltage.samples.get(threshold_index)?;
        let end = windows.stimulus.1;

        let above: Vec<bool> = voltage.samples.iter().map(|&v| v > threshold).collect();
        let mut crossings: Vec<usize> = above
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0] != pair[1])
            .map(|(i, _)| i)
            .collect();
        if crossings.len() > 2 {
            crossings.retain(|&i| i >= threshold_index);
        }
        let first = *crossings.first()?;
        let start = first.saturating_sub(windows.span(PRE_SPIKE_MS));
        let stop = if crossings.len() > 2 { crossings[2] } else { end };
        let samples = signal::window(&voltage.samples, start, stop).to_vec();
        if samples.is_empty() {
            return None;
        }

        let clipped: Vec<f64> = signal::window(&voltage.samples, 0, end)
            .iter()
            .map(|&v| v.max(threshold))
            .collect();
        let first_peak = *train.peaks.first()?;
        let width_ms = signal::peak_width(&clipped, first_peak, 0.5).width / windows.per_ms;

        let ahp_index = ahp_index(&samples, windows.span(AHP_SEARCH_MS))?;
        Some(Self {
            start,
            samples,
            width_ms,
            ahp_index,
        })
    }
}

/// Sample following the last point, up to `search` samples past the peak, whose second
/// derivative reaches [`AHP_DDV`].
fn ahp_index(spike: &[f64], search: usize) -> Option<usize> {
    let peak = signal::argmax(spike)?;
    let cut = (peak + search).min(spike.len());
    let ddv = signal::gradient(&signal::gradient(&spike[..cut]));
    let index = ddv
        .iter()
        .rposition(|&d| d >= AHP_DDV)
        .map_or(cut, |last| last + 1);
    Some(index.min(spike.len() - 1))
}

/// Everything measured on one current-clamp sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct SpikeFeatures {
    pub meta: TraceMeta,
    pub pulse_start_ms: f64,
    pub baseline: f64,
    pub delta_v: Option<f64>,
    pub peaks: Vec<usize>,
    pub threshold_mv: Option<f64>,
    pub threshold_ms: Option<f64>,
    pub peak_volt: Option<f64>,
    pub first_spike_ms: Option<f64>,
    pub hertz: Option<f64>,
    /// Inter-spike intervals in ms.
    pub iei: Vec<f64>,
    pub iei_mean: Option<f64>,
    pub width_ms: Option<f64>,
    /// Peak dv/dt of the first onset, mV/ms.
    pub max_velocity: Option<f64>,
    pub adaptation: Option<f64>,
    pub local_variance: Option<f64>,
    pub divisor: Option<f64>,
    pub ahp_mv: Option<f64>,
    pub ahp_ms: Option<f64>,
    pub ramp_rheobase: Option<f64>,
    pub baseline_stability: Option<f64>,
    /// First action potential waveform (mV); empty when no spike was isolated.
    pub first_spike: Vec<f64>,
}

impl SpikeFeatures {
    pub fn spike_count(&self) -> usize {
        self.peaks.len()
    }

    pub fn to_record(&self) -> Record {
        Record::new()
            .with("Acquisition", f64::from(self.meta.acq_number))
            .with("Pulse_pattern", self.meta.pulse_pattern.as_str())
            .with("Pulse_amp", self.meta.pulse_amp)
            .with("Ramp", self.meta.ramp)
            .with("Epoch", self.meta.epoch.as_str())
            .with("Baseline", self.baseline)
            .with("Pulse_start", self.pulse_start_ms)
            .with("Delta_v", self.delta_v)
            .with("Spike_threshold (mV)", self.threshold_mv)
            .with("Spike_threshold_time (ms)", self.threshold_ms)
            .with("Spike_peak_volt", self.peak_volt)
            .with("Spike_time (ms)", self.first_spike_ms)
            .with("Hertz", self.hertz)
            .with("Spike_iei", self.iei_mean)
            .with("Spike_width", self.width_ms)
            .with("Max_AP_vel", self.max_velocity)
            .with("Spike_freq_adapt", self.adaptation)
            .with("Local_sfa", self.local_variance)
            .with("Divisor_sfa", self.divisor)
            .with("Peak_AHP (mV)", self.ahp_mv)
            .with("Peak_AHP (ms)", self.ahp_ms)
            .with("Ramp_rheobase", self.ramp_rheobase)
            .with("Baseline_stability", self.baseline_stability)
    }
}

/// Mean normalised difference of consecutive intervals. Positive values mean the train slows.
pub fn adaptation_index(iei: &[f64]) -> Option<f64> {
    if iei.len() <= 1 {
        return None;
    }
    signal::mean_present(iei.windows(2).map(|w| {
        if w[0] == 0.0 && w[1] == 0.0 {
            Some(0.0)
        } else {
            signal::finite((w[1] - w[0]) / (w[1] + w[0]))
        }
    }))
}

/// Local variation of the intervals (Shinomoto, Shima and Tanji 2003).
pub fn local_variance(iei: &[f64]) -> Option<f64> {
    if iei.len() < 2 {
        return None;
    }
    let sum: f64 = iei
        .windows(2)
        .map(|w| 3.0 * (w[0] - w[1]).powi(2) / (w[0] + w[1]).powi(2))
        .sum();
    signal::finite(sum / (iei.len() - 1) as f64)
}

/// First interval over last interval.
pub fn divisor_index(iei: &[f64]) -> Option<f64> {
    let first = iei.first()?;
    let last = iei.last()?;
    signal::finite(first / last)
}

/// Current on a linear ramp from 0 at `start` to `amplitude` at `end - 1`; zero outside.
fn ramp_current(index: usize, start: usize, end: usize, amplitude: f64) -> f64 {
    if index < start || index >= end {
        return 0.0;
    }
    let steps = (end - start).saturating_sub(1);
    if steps == 0 {
        return 0.0;
    }
    amplitude * (index - start) as f64 / steps as f64
}

pub fn analyze(trace: &Trace, params: &CurrentClampParams) -> Result<SpikeFeatures, AnalysisError> {
    let windows = Windows::resolve(trace, params)?;
    let voltage = Voltage::condition(trace, &windows, &params.filter)?;
    let response = MembraneResponse::measure(&voltage, &windows, params);
    let train = SpikeTrain::detect(&voltage, &windows, params);
    let first = train
        .as_ref()
        .and_then(|t| FirstSpike::isolate(&voltage, &windows, t));

    let meta = trace.meta().clone();
    let (stim_start, stim_end) = windows.stimulus;
    let mut features = SpikeFeatures {
        meta,
        pulse_start_ms: windows.ms(stim_start),
        baseline: voltage.baseline,
        delta_v: response.delta_v,
        peaks: Vec::new(),
        threshold_mv: None,
        threshold_ms: None,
        peak_volt: None,
        first_spike_ms: None,
        hertz: None,
        iei: Vec::new(),
        iei_mean: None,
        width_ms: None,
        max_velocity: None,
        adaptation: None,
        local_variance: None,
        divisor: None,
        ahp_mv: None,
        ahp_ms: None,
        ramp_rheobase: None,
        baseline_stability: response.baseline_stability,
        first_spike: Vec::new(),
    };

    if let Some(train) = train {
        let threshold_index = train.threshold_index;
        features.threshold_mv = threshold_index.and_then(|i| voltage.samples.get(i).copied());
        features.threshold_ms = threshold_index.map(|i| windows.ms(i));
        features.peak_volt = train.peaks.first().map(|&p| voltage.samples[p]);
        features.first_spike_ms = train.peaks.first().map(|&p| windows.ms(p));
        features.hertz = train.hertz(&windows);
        features.iei_mean = signal::mean(&train.iei);
        features.max_velocity = train
            .onset
            .and_then(|o| signal::finite(voltage.dv[o] * windows.per_ms));
        features.adaptation = adaptation_index(&train.iei);
        features.local_variance = local_variance(&train.iei);
        features.divisor = divisor_index(&train.iei);
        if windows.ramp {
            features.ramp_rheobase = threshold_index
                .map(|i| ramp_current(i, stim_start, stim_end, trace.meta().pulse_amp));
        }
        features.iei = train.iei;
        features.peaks = train.peaks;
    }
    if let Some(first) = first {
        features.width_ms = signal::finite(first.width_ms);
        features.ahp_mv = first.samples.get(first.ahp_index).copied();
        features.ahp_ms = Some(windows.ms(first.start + first.ahp_index));
        features.first_spike = first.samples;
    }
    debug!(
        "acquisition {}: {} spikes, delta-v {:?}",
        trace.acq_number(),
        features.spike_count(),
        features.delta_v
    );
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const FS: f64 = 10_000.0;

    fn add_spike(samples: &mut [f64], centre: usize) {
        let sigma = 5.0;
        for i in centre.saturating_sub(60)..(centre + 60).min(samples.len()) {
            let t = (i as f64 - centre as f64) / sigma;
            samples[i] += 95.0 * (-0.5 * t * t).exp();
        }
    }

    /// Step sweep: -65 mV rest, -60 mV during 300..1002 ms, spikes at `spike_ms`.
    fn step_sweep(spike_ms: &[f64]) -> Trace {
        let mut samples = vec![-65.0; 15_000];
        samples[3_000..10_020].iter_mut().for_each(|v| *v = -60.0);
        for ms in spike_ms {
            add_spike(&mut samples, (ms * 10.0) as usize);
        }
        let meta = TraceMeta::new("sweep", 3, "0").with_pulse("step", 100.0, false);
        Trace::new(meta, FS, samples)
    }

    fn regular_train(count: usize, iei_ms: f64) -> Vec<f64> {
        (0..count).map(|i| 400.0 + i as f64 * iei_ms).collect()
    }

    #[test]
    fn counts_spikes_and_intervals() {
        let trace = step_sweep(&regular_train(5, 50.0));
        let features = analyze(&trace, &CurrentClampParams::default()).unwrap();
        assert_eq!(features.spike_count(), 5);
        assert_eq!(features.iei.len(), 4);
        for iei in &features.iei {
            assert!((iei - 50.0).abs() < 1e-9);
        }
        let hertz = features.hertz.unwrap();
        assert!((hertz - 5.0 / 0.702).abs() < 1e-9);
        assert!((features.first_spike_ms.unwrap() - 400.0).abs() < 0.2);
        assert!((features.peak_volt.unwrap() - 35.0).abs() < 1e-6);
    }

    #[test]
    fn constant_intervals_give_neutral_adaptation() {
        let trace = step_sweep(&regular_train(6, 40.0));
        let features = analyze(&trace, &CurrentClampParams::default()).unwrap();
        assert!(features.adaptation.unwrap().abs() < 1e-12);
        assert!((features.divisor.unwrap() - 1.0).abs() < 1e-12);
        assert!(features.local_variance.unwrap().abs() < 1e-12);
    }

    #[test]
    fn threshold_precedes_first_peak() {
        let trace = step_sweep(&regular_train(3, 60.0));
        for method in [
            ThresholdMethod::Legacy,
            ThresholdMethod::MaxCurvature,
            ThresholdMethod::ThirdDerivative,
        ] {
            let params = CurrentClampParams {
                threshold_method: method,
                ..Default::default()
            };
            let features = analyze(&trace, &params).unwrap();
            let threshold_ms = features.threshold_ms.unwrap();
            assert!(threshold_ms > 300.0 && threshold_ms < 400.0, "{method:?} {threshold_ms}");
            assert!(features.threshold_mv.unwrap() < features.peak_volt.unwrap());
        }
    }

    #[test]
    fn max_curvature_sits_two_samples_before_the_steepest_approach_to_zero() {
        // 8 mV per sample from -70 to +34, then back down at 4 mV per sample
        let mut samples = vec![-70.0; 50];
        samples.extend((1..=13).map(|k| -70.0 + 8.0 * k as f64));
        samples.extend((1..=26).map(|k| 34.0 - 4.0 * k as f64));
        samples.extend(vec![-70.0; 60]);
        let dv = signal::gradient(&samples);
        // -dv/V peaks at -6 mV, sample 57
        assert_eq!(max_curvature_index(&samples, &dv, 10), Some(55));
        assert_eq!(max_curvature_index(&samples, &dv, 120), None);
    }

    #[test]
    fn third_derivative_marks_the_sample_before_acceleration() {
        // dv/dt flat until sample 40, then rising linearly
        let dv: Vec<f64> = (0..100).map(|i| (i as f64 - 40.0).max(0.0)).collect();
        assert_eq!(third_derivative_index(&dv, 10, 90), Some(39));
        assert_eq!(third_derivative_index(&dv, 45, 90), None);
        assert_eq!(third_derivative_index(&[1.0; 100], 10, 90), None);
    }

    #[test]
    fn first_spike_shape_is_measured() {
        let trace = step_sweep(&regular_train(3, 60.0));
        let features = analyze(&trace, &CurrentClampParams::default()).unwrap();
        let width = features.width_ms.unwrap();
        assert!(width > 0.0 && width < 2.0, "{width}");
        assert!(!features.first_spike.is_empty());
        assert!(features.ahp_ms.unwrap() > features.first_spike_ms.unwrap() - PRE_SPIKE_MS);
        assert!(features.max_velocity.unwrap() > ONSET_DV_HEIGHT);
    }

    #[test]
    fn delta_v_uses_plateau_with_and_without_spikes() {
        let quiet = analyze(&step_sweep(&[]), &CurrentClampParams::default()).unwrap();
        assert!((quiet.delta_v.unwrap() - 5.0).abs() < 1e-9);
        let spiking = analyze(&step_sweep(&regular_train(4, 50.0)), &CurrentClampParams::default())
            .unwrap();
        assert!((spiking.delta_v.unwrap() - 5.0).abs() < 0.5);
    }

    #[test]
    fn no_spikes_leaves_spike_fields_absent() {
        let features = analyze(&step_sweep(&[]), &CurrentClampParams::default()).unwrap();
        assert_eq!(features.spike_count(), 0);
        assert!(features.iei.is_empty());
        assert_eq!(features.hertz, None);
        assert_eq!(features.threshold_mv, None);
        assert_eq!(features.width_ms, None);
        assert_eq!(features.ahp_mv, None);
        assert_eq!(features.adaptation, None);
        assert_eq!(features.divisor, None);
        let record = features.to_record();
        assert_eq!(record.number("Spike_threshold (mV)"), None);
        assert_eq!(record.number("Pulse_start"), Some(300.0));
        assert_eq!(record.len(), 23);
    }

    #[test]
    fn min_spikes_suppresses_sparse_trains() {
        let params = CurrentClampParams {
            min_spikes: 3,
            ..Default::default()
        };
        let features = analyze(&step_sweep(&[400.0, 450.0]), &params).unwrap();
        assert_eq!(features.spike_count(), 0);
        assert_eq!(features.hertz, None);
    }

    #[test]
    fn single_spike_has_no_interval_metrics() {
        let features = analyze(&step_sweep(&[500.0]), &CurrentClampParams::default()).unwrap();
        assert_eq!(features.spike_count(), 1);
        assert_eq!(features.iei_mean, None);
        assert_eq!(features.adaptation, None);
        assert_eq!(features.local_variance, None);
        assert_eq!(features.divisor, None);
    }

    #[test]
    fn ramp_reports_rheobase_current() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut samples: Vec<f64> = (0..45_000)
            .map(|i| {
                let ramp = if (3_000..40_000).contains(&i) {
                    (i - 3_000) as f64 * 0.0005
                } else {
                    0.0
                };
                -65.0 + ramp + rng.gen_range(-0.05..0.05)
            })
            .collect();
        for centre in [20_000, 25_000, 30_000] {
            add_spike(&mut samples, centre);
        }
        let meta = TraceMeta::new("ramp", 9, "0").with_pulse("ramp", 400.0, true);
        let trace = Trace::new(meta, FS, samples);
        let features = analyze(&trace, &CurrentClampParams::default()).unwrap();

        assert_eq!(features.spike_count(), 3);
        assert_eq!(features.delta_v, None);
        let threshold_ms = features.threshold_ms.unwrap();
        assert!(threshold_ms > 1995.0 && threshold_ms < 2000.0, "{threshold_ms}");
        let rheo_index = (threshold_ms * 10.0).round();
        let expected = 400.0 * (rheo_index - 3_000.0) / 36_999.0;
        assert!((features.ramp_rheobase.unwrap() - expected).abs() < 1e-6);
        let hertz = features.hertz.unwrap();
        assert!((hertz - 3.0 / ((40_000.0 - rheo_index) / FS)).abs() < 1e-6);
    }

    #[test]
    fn empty_stimulus_window_is_an_error() {
        let params = CurrentClampParams {
            pulse_start: 900.0,
            pulse_end: 900.0,
            ..Default::default()
        };
        assert!(matches!(
            analyze(&step_sweep(&[]), &params),
            Err(AnalysisError::Window { name: "stimulus", .. })
        ));
    }

    #[test]
    fn interval_indices_handle_degenerate_input() {
        assert_eq!(adaptation_index(&[0.0, 0.0]), Some(0.0));
        assert!((adaptation_index(&[10.0, 30.0]).unwrap() - 0.5).abs() < 1e-12);
        assert!((local_variance(&[10.0, 30.0]).unwrap() - 0.75).abs() < 1e-12);
        assert_eq!(divisor_index(&[]), None);
        assert_eq!(ramp_current(5, 10, 20, 100.0), 0.0);
        assert!((ramp_current(19, 10, 20, 90.0) - 90.0).abs() < 1e-12);
    }
}
