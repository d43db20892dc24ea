// src/acq/lfp.rs
//! Field-potential analysis: field potential, fiber volley and onset slope.
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::filter::{self, FilterConfig, FilterType};
use crate::record::Record;
use crate::signal::{self, LinearFit};
use crate::types::{Trace, TraceMeta};

/// Sample rate the window offsets are expressed at.
const REFERENCE_RATE_HZ: f64 = 10_000.0;

/// Empirical window offsets, in samples at 10 kHz, measured from the stimulus.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowOffsets {
    pub fp_start: usize,
    pub fp_end: usize,
    pub fv_start: usize,
    /// Field potential times before `stimulus + early_fp` use the short gaps below.
    pub early_fp: usize,
    pub fv_gap_early: usize,
    pub fv_gap_late: usize,
    pub fv_end_cap: usize,
    pub slope_gap_early: usize,
    pub slope_gap_late: usize,
}

impl Default for WindowOffsets {
    fn default() -> Self {
        Self {
            fp_start: 44,
            fp_end: 200,
            fv_start: 9,
            early_fp: 74,
            fv_gap_early: 20,
            fv_gap_late: 40,
            fv_end_cap: 49,
            slope_gap_early: 19,
            slope_gap_late: 39,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LfpParams {
    pub baseline_start: f64,
    pub baseline_end: f64,
    pub pulse_start: f64,
    pub offsets: WindowOffsets,
    pub filter: FilterConfig,
}

impl Default for LfpParams {
    fn default() -> Self {
        Self {
            baseline_start: 0.0,
            baseline_end: 800.0,
            pulse_start: 1000.0,
            offsets: WindowOffsets::default(),
            filter: FilterConfig::new(FilterType::Remez2)
                .with_order(301)
                .with_low_pass(300.0, 100.0),
        }
    }
}

/// A located deflection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub index: usize,
    pub time_ms: f64,
    pub amplitude: f64,
}

/// Onset slope of the field potential with its regression line.
#[derive(Clone, Debug, PartialEq)]
pub struct OnsetSlope {
    /// mV/ms.
    pub value: f64,
    pub fit: LinearFit,
    /// `(time_ms, mV)` samples of the regression line.
    pub line: Vec<(f64, f64)>,
}

/// Offsets converted to sample counts at the trace's rate.
#[derive(Clone, Copy, Debug)]
struct Geometry {
    stimulus: usize,
    per_ms: f64,
    offsets: WindowOffsets,
}

impl Geometry {
    fn at(&self, reference_samples: usize) -> usize {
        let scale = self.per_ms * 1000.0 / REFERENCE_RATE_HZ;
        (reference_samples as f64 * scale).round() as usize
    }

    fn after(&self, reference_samples: usize) -> usize {
        self.stimulus + self.at(reference_samples)
    }

    fn point(&self, samples: &[f64], index: usize) -> Option<Point> {
        samples.get(index).map(|&amplitude| Point {
            index,
            time_ms: index as f64 / self.per_ms,
            amplitude,
        })
    }

    fn index_of(&self, ms: f64) -> usize {
        (ms * self.per_ms).max(0.0) as usize
    }
}

/// Features of one field-potential sweep. Keeps its filtered samples so corrections can
/// recompute the dependent values.
#[derive(Clone, Debug)]
pub struct LfpFeatures {
    pub meta: TraceMeta,
    pub pulse_start_ms: f64,
    pub fiber_volley: Option<Point>,
    pub field_potential: Option<Point>,
    /// Start of the rising segment used for the slope.
    pub slope_start: Option<Point>,
    pub slope: Option<OnsetSlope>,
    filtered: Vec<f64>,
    geometry: Geometry,
}

impl LfpFeatures {
    pub fn filtered(&self) -> &[f64] {
        &self.filtered
    }

    /// Replaces the fiber volley with a manually placed point. The slope and its start are kept
    /// as they are: the slope window is found from the field potential alone, so moving the
    /// volley never moves it.
    pub fn with_fiber_volley(&self, x_ms: f64, y: f64) -> Self {
        let index = self.geometry.index_of(x_ms);
        Self {
            fiber_volley: Some(Point {
                index,
                time_ms: x_ms,
                amplitude: y,
            }),
            ..self.clone()
        }
    }

    /// Replaces the field potential and recomputes the slope, keeping a placed slope start.
    pub fn with_field_potential(&self, x_ms: f64, y: f64) -> Self {
        let index = self.geometry.index_of(x_ms);
        let fp = Point {
            index,
            time_ms: x_ms,
            amplitude: y,
        };
        let start = self
            .slope_start
            .filter(|s| s.index < index)
            .or_else(|| slope_start(&self.filtered, &self.geometry, index));
        Self {
            field_potential: Some(fp),
            slope_start: start,
            slope: start.and_then(|s| onset_slope(&self.filtered, &self.geometry, s.index, index)),
            ..self.clone()
        }
    }

    /// Recomputes the slope from a manually chosen start.
    pub fn with_slope_start(&self, x_ms: f64) -> Self {
        let index = self.geometry.index_of(x_ms);
        let start = self.geometry.point(&self.filtered, index);
        let slope = self
            .field_potential
            .zip(start)
            .and_then(|(fp, s)| onset_slope(&self.filtered, &self.geometry, s.index, fp.index));
        Self {
            slope_start: start,
            slope,
            ..self.clone()
        }
    }

    pub fn to_record(&self) -> Record {
        Record::new()
            .with("fv_amp", self.fiber_volley.map(|p| p.amplitude))
            .with("fv_time", self.fiber_volley.map(|p| p.time_ms))
            .with("fp_amp", self.field_potential.map(|p| p.amplitude))
            .with("fp_time", self.field_potential.map(|p| p.time_ms))
            .with("fp_slope", self.slope.as_ref().map(|s| s.value))
            .with("Epoch", self.meta.epoch.as_str())
            .with("Acq number", f64::from(self.meta.acq_number))
    }
}

/// Largest negative deflection in the field-potential window. A window whose positive
/// excursion is at least as large as the negative one has no field potential.
fn field_potential(samples: &[f64], geometry: &Geometry) -> Option<usize> {
    let start = geometry.after(geometry.offsets.fp_start);
    let window = signal::window(samples, start, geometry.after(geometry.offsets.fp_end));
    let low = signal::argmin(window)?;
    let high = signal::argmax(window)?;
    (window[high].abs() < window[low].abs()).then_some(start + low)
}

/// End of the pre-field-potential search region; the gap depends on how early the field
/// potential arrives.
fn pre_fp_end(geometry: &Geometry, fp: usize, early_gap: usize, late_gap: usize) -> Option<usize> {
    let offsets = &geometry.offsets;
    if fp < geometry.after(offsets.early_fp) {
        fp.checked_sub(geometry.at(early_gap))
    } else {
        fp.checked_sub(geometry.at(late_gap))
            .map(|end| end.min(geometry.after(offsets.fv_end_cap)))
    }
}

fn fiber_volley(samples: &[f64], geometry: &Geometry, fp: usize) -> Option<usize> {
    let offsets = &geometry.offsets;
    let start = geometry.after(offsets.fv_start);
    let end = pre_fp_end(geometry, fp, offsets.fv_gap_early, offsets.fv_gap_late)?;
    signal::argmin(signal::window(samples, start, end)).map(|i| i + start)
}

/// Peak of the rise between the fiber-volley trough and the field potential.
fn slope_start(samples: &[f64], geometry: &Geometry, fp: usize) -> Option<Point> {
    let offsets = &geometry.offsets;
    let search_start = geometry.after(offsets.fv_start);
    let search_end = pre_fp_end(geometry, fp, offsets.slope_gap_early, offsets.slope_gap_late)?;
    let trough = signal::argmin(signal::window(samples, search_start, search_end))? + search_start;
    if fp < trough {
        return None;
    }
    let rise = signal::argmax(signal::window(samples, trough, fp))? + trough;
    geometry.point(samples, rise)
}

/// Regression over the 10%..90% span of `[start, end)`; needs at least six points.
fn onset_slope(
    samples: &[f64],
    geometry: &Geometry,
    start: usize,
    end: usize,
) -> Option<OnsetSlope> {
    let segment = signal::window(samples, start, end);
    let n = segment.len();
    let (lo, hi) = ((n as f64 * 0.1) as usize, (n as f64 * 0.9) as usize);
    if hi <= lo || hi - lo <= 5 {
        return None;
    }
    let x: Vec<f64> = (start + lo..start + hi)
        .map(|i| i as f64 / geometry.per_ms)
        .collect();
    let y = &segment[lo..hi];
    let fit = signal::linregress(&x, y)?;
    let line = x.iter().map(|&t| (t, fit.at(t))).collect();
    Some(OnsetSlope {
        value: signal::finite(fit.slope)?,
        fit,
        line,
    })
}

pub fn analyze(trace: &Trace, params: &LfpParams) -> Result<LfpFeatures, AnalysisError> {
    let len = trace.len();
    let (bs, be) = (
        trace.ms_to_index(params.baseline_start),
        trace.ms_to_index(params.baseline_end),
    );
    let stimulus = trace.ms_to_index(params.pulse_start);
    if stimulus >= len {
        return Err(AnalysisError::Window {
            name: "stimulus",
            start: stimulus,
            end: len,
            len,
        });
    }
    let filtered = filter::filter(trace.samples(), bs..be, &params.filter, trace.sample_rate())?;
    let geometry = Geometry {
        stimulus,
        per_ms: trace.samples_per_ms(),
        offsets: params.offsets,
    };

    let fp = field_potential(&filtered, &geometry);
    let fiber_volley = fp
        .and_then(|fp| fiber_volley(&filtered, &geometry, fp))
        .and_then(|i| geometry.point(&filtered, i));
    let start = fp.and_then(|fp| slope_start(&filtered, &geometry, fp));
    let slope = fp
        .zip(start)
        .and_then(|(fp, s)| onset_slope(&filtered, &geometry, s.index, fp));
    debug!(
        "acquisition {}: field potential {:?}, fiber volley {:?}",
        trace.acq_number(),
        fp,
        fiber_volley.map(|p| p.index)
    );

    Ok(LfpFeatures {
        meta: trace.meta().clone(),
        pulse_start_ms: stimulus as f64 / geometry.per_ms,
        fiber_volley,
        field_potential: fp.and_then(|i| geometry.point(&filtered, i)),
        slope_start: start,
        slope,
        filtered,
        geometry,
    })
}
