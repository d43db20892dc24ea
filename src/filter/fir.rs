// src/filter/fir.rs
//! Frequency-sampling FIR design and the linear filtering used by all FIR/recursive
//! variants (causal pass, forward-backward pass, group-delay compensated pass).
use std::f64::consts::PI;

use rustfft::{num_complex::Complex64, FftPlanner};

use crate::error::FilterError;
use crate::filter::iir::odd_extend;
use crate::filter::window::WindowKind;

/// Piecewise-constant band layout in Hz: `edges` holds band start/stop pairs from 0 to the
/// Nyquist frequency, `desired` one gain per band.
#[derive(Clone, Debug, PartialEq)]
pub struct BandLayout {
    pub edges: Vec<f64>,
    pub desired: Vec<f64>,
}

impl BandLayout {
    pub fn validate(&self, nyquist: f64) -> Result<(), FilterError> {
        let edges = &self.edges;
        let ordered = edges.windows(2).all(|w| w[0] < w[1]);
        let inside = edges.first() == Some(&0.0) && edges.last() == Some(&nyquist);
        if !ordered || !inside || edges.len() != 2 * self.desired.len() {
            return Err(FilterError::BadBandEdges(edges.clone()));
        }
        Ok(())
    }
}

/// Linear-phase FIR from a linearly interpolated magnitude response, tapered by `window`.
pub fn firwin2(
    numtaps: usize,
    layout: &BandLayout,
    sample_rate: f64,
    window: WindowKind,
) -> Result<Vec<f64>, FilterError> {
    let nyquist = sample_rate / 2.0;
    layout.validate(nyquist)?;
    let freq: Vec<f64> = layout.edges.iter().map(|f| f / nyquist).collect();
    let gain: Vec<f64> = layout.desired.iter().flat_map(|&g| [g, g]).collect();
    if numtaps % 2 == 0 && gain.last().copied().unwrap_or(0.0) != 0.0 {
        return Err(FilterError::EvenOrder {
            filter: "fir design with gain at nyquist",
            order: numtaps,
        });
    }

    let nfreqs = 1 + (numtaps as f64).log2().ceil().exp2() as usize;
    let grid: Vec<f64> = (0..nfreqs)
        .map(|i| i as f64 / (nfreqs - 1) as f64)
        .collect();
    let shift = -((numtaps - 1) as f64) / 2.0 * PI;

    let size = 2 * (nfreqs - 1);
    let mut spectrum = vec![Complex64::new(0.0, 0.0); size];
    for (i, &x) in grid.iter().enumerate() {
        let magnitude = interp_response(x, &freq, &gain);
        let value = Complex64::from_polar(magnitude, shift * x);
        spectrum[i] = value;
        if i > 0 && i < nfreqs - 1 {
            spectrum[size - i] = value.conj();
        }
    }
    // the Nyquist bin of a real signal is real
    spectrum[nfreqs - 1] = Complex64::new(spectrum[nfreqs - 1].re, 0.0);

    let mut planner = FftPlanner::<f64>::new();
    let ifft = planner.plan_fft_inverse(size);
    ifft.process(&mut spectrum);

    let taper = window.samples(numtaps);
    Ok(spectrum
        .iter()
        .take(numtaps)
        .zip(taper)
        .map(|(c, w)| c.re / size as f64 * w)
        .collect())
}

/// Magnitude at normalised frequency `x`; a jump at a shared edge takes the upper side.
fn interp_response(x: f64, freq: &[f64], gain: &[f64]) -> f64 {
    if x <= freq[0] {
        return gain[0];
    }
    for i in 1..freq.len() {
        if x <= freq[i] {
            let span = freq[i] - freq[i - 1];
            if span <= 0.0 {
                return gain[i];
            }
            return gain[i - 1] + (x - freq[i - 1]) * (gain[i] - gain[i - 1]) / span;
        }
    }
    gain[gain.len() - 1]
}

/// Transfer function `b / a` with `a[0]` normalised to one.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferFunction {
    b: Vec<f64>,
    a: Vec<f64>,
}

impl TransferFunction {
    pub fn fir(taps: Vec<f64>) -> Self {
        Self { b: taps, a: vec![1.0] }
    }

    pub fn new(b: Vec<f64>, a: Vec<f64>) -> Self {
        let a0 = a.first().copied().unwrap_or(1.0);
        Self {
            b: b.iter().map(|v| v / a0).collect(),
            a: a.iter().map(|v| v / a0).collect(),
        }
    }

    pub fn taps(&self) -> &[f64] {
        &self.b
    }

    fn state_len(&self) -> usize {
        self.a.len().max(self.b.len()) - 1
    }

    fn coeff(values: &[f64], i: usize) -> f64 {
        values.get(i).copied().unwrap_or(0.0)
    }

    /// Direct form II transposed pass starting from `state`.
    fn run(&self, input: &[f64], state: &mut [f64]) -> Vec<f64> {
        let n = state.len();
        input
            .iter()
            .map(|&x| {
                let y = Self::coeff(&self.b, 0) * x + state.first().copied().unwrap_or(0.0);
                for k in 0..n {
                    let next = if k + 1 < n { state[k + 1] } else { 0.0 };
                    state[k] = Self::coeff(&self.b, k + 1) * x - Self::coeff(&self.a, k + 1) * y
                        + next;
                }
                y
            })
            .collect()
    }

    /// Causal filtering from rest.
    pub fn lfilter(&self, input: &[f64]) -> Vec<f64> {
        let mut state = vec![0.0; self.state_len()];
        self.run(input, &mut state)
    }

    /// Steady-state delay line for a unit step input.
    fn steady_state(&self) -> Vec<f64> {
        let n = self.state_len();
        let h = self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>();
        (0..n)
            .map(|i| {
                ((i + 1)..=n)
                    .map(|k| Self::coeff(&self.b, k) - Self::coeff(&self.a, k) * h)
                    .sum()
            })
            .collect()
    }

    /// Forward-backward filtering with odd extension of `3 * max(len(a), len(b))` samples.
    pub fn filtfilt(&self, input: &[f64]) -> Result<Vec<f64>, FilterError> {
        let padlen = 3 * self.a.len().max(self.b.len());
        let extended = odd_extend(input, padlen)?;
        let zi = self.steady_state();
        let scaled = |x0: f64| -> Vec<f64> { zi.iter().map(|z| z * x0).collect() };

        let mut forward = self.run(&extended, &mut scaled(extended[0]));
        forward.reverse();
        let mut backward = self.run(&forward, &mut scaled(forward[0]));
        backward.reverse();
        Ok(backward[padlen..backward.len() - padlen].to_vec())
    }

    /// Single causal pass corrected for the linear-phase group delay `(taps - 1) / 2`:
    /// the input is extended with copies of its last sample and the head is dropped.
    pub fn delay_compensated(&self, input: &[f64]) -> Vec<f64> {
        let delay = self.b.len().saturating_sub(1) / 2;
        let last = input.last().copied().unwrap_or(0.0);
        let mut padded = Vec::with_capacity(input.len() + delay);
        padded.extend_from_slice(input);
        padded.extend(std::iter::repeat(last).take(delay));
        let mut out = self.lfilter(&padded);
        out.drain(..delay);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gain_at(taps: &[f64], hz: f64, fs: f64) -> f64 {
        let w = 2.0 * PI * hz / fs;
        taps.iter()
            .enumerate()
            .map(|(n, t)| Complex64::from_polar(*t, -w * n as f64))
            .sum::<Complex64>()
            .norm()
    }

    fn lowpass_layout(fs: f64) -> BandLayout {
        BandLayout {
            edges: vec![0.0, 500.0, 800.0, fs / 2.0],
            desired: vec![1.0, 0.0],
        }
    }

    #[test]
    fn firwin2_lowpass_is_symmetric_with_unity_passband() {
        let taps = firwin2(101, &lowpass_layout(10_000.0), 10_000.0, WindowKind::Hann).unwrap();
        assert_eq!(taps.len(), 101);
        for i in 0..101 {
            assert!((taps[i] - taps[100 - i]).abs() < 1e-12);
        }
        assert!((gain_at(&taps, 0.0, 10_000.0) - 1.0).abs() < 0.01);
        assert!(gain_at(&taps, 2_000.0, 10_000.0) < 0.01);
    }

    #[test]
    fn firwin2_rejects_even_highpass() {
        let layout = BandLayout {
            edges: vec![0.0, 50.0, 100.0, 5_000.0],
            desired: vec![0.0, 1.0],
        };
        assert!(firwin2(100, &layout, 10_000.0, WindowKind::Hann).is_err());
    }

    #[test]
    fn layout_rejects_unordered_edges() {
        let layout = BandLayout {
            edges: vec![0.0, 900.0, 800.0, 5_000.0],
            desired: vec![1.0, 0.0],
        };
        assert!(layout.validate(5_000.0).is_err());
    }

    #[test]
    fn first_order_recursion_matches_hand_computation() {
        let tf = TransferFunction::new(vec![0.5], vec![1.0, -0.5]);
        let out = tf.lfilter(&[1.0, 0.0, 0.0]);
        assert_eq!(out, vec![0.5, 0.25, 0.125]);
    }

    #[test]
    fn delay_compensation_keeps_length_and_alignment() {
        let taps = firwin2(51, &lowpass_layout(10_000.0), 10_000.0, WindowKind::Hann).unwrap();
        let tf = TransferFunction::fir(taps);
        let mut input = vec![0.0; 400];
        for (i, v) in input.iter_mut().enumerate().skip(190).take(21) {
            *v = 1.0 - ((i as f64 - 200.0) / 10.0).abs();
        }
        let out = tf.delay_compensated(&input);
        assert_eq!(out.len(), input.len());
        let peak = crate::signal::argmax(&out).unwrap();
        assert!((peak as i64 - 200).abs() <= 1);
    }

    #[test]
    fn fir_filtfilt_passes_dc() {
        let taps = firwin2(51, &lowpass_layout(10_000.0), 10_000.0, WindowKind::Hamming).unwrap();
        let tf = TransferFunction::fir(taps);
        let out = tf.filtfilt(&vec![2.0; 600]).unwrap();
        let dc = tf.taps().iter().sum::<f64>().powi(2) * 2.0;
        assert!(out.iter().all(|v| (v - dc).abs() < 1e-9));
    }
}
