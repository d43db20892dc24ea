// src/filter/mod.rs
// Filter engine: baseline subtraction followed by one configurable filter.
pub mod fir;
pub mod iir;
pub mod remez;
pub mod smooth;
pub mod window;

use std::ops::Range;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::signal;

pub use fir::{BandLayout, TransferFunction};
pub use iir::{BandKind, IirFamily, SosChain};
pub use window::WindowKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    #[default]
    None,
    Median,
    Bessel,
    BesselZero,
    Butterworth,
    ButterworthZero,
    Elliptic,
    EllipticZero,
    #[serde(rename = "fir_zero_1")]
    FirZero1,
    #[serde(rename = "fir_zero_2")]
    FirZero2,
    #[serde(rename = "remez_1")]
    Remez1,
    #[serde(rename = "remez_2")]
    Remez2,
    Savgol,
    Subtractive,
    Ewma,
    EwmaA,
}

impl FilterType {
    pub fn name(&self) -> &'static str {
        match self {
            FilterType::None => "none",
            FilterType::Median => "median",
            FilterType::Bessel => "bessel",
            FilterType::BesselZero => "bessel_zero",
            FilterType::Butterworth => "butterworth",
            FilterType::ButterworthZero => "butterworth_zero",
            FilterType::Elliptic => "elliptic",
            FilterType::EllipticZero => "elliptic_zero",
            FilterType::FirZero1 => "fir_zero_1",
            FilterType::FirZero2 => "fir_zero_2",
            FilterType::Remez1 => "remez_1",
            FilterType::Remez2 => "remez_2",
            FilterType::Savgol => "savgol",
            FilterType::Subtractive => "subtractive",
            FilterType::Ewma => "ewma",
            FilterType::EwmaA => "ewma_a",
        }
    }

    fn iir_family(&self, config: &FilterConfig) -> Option<IirFamily> {
        match self {
            FilterType::Bessel | FilterType::BesselZero => Some(IirFamily::Bessel),
            FilterType::Butterworth | FilterType::ButterworthZero => Some(IirFamily::Butterworth),
            FilterType::Elliptic | FilterType::EllipticZero => Some(IirFamily::Elliptic {
                rp: config.passband_ripple_db,
                rs: config.stopband_atten_db,
            }),
            _ => None,
        }
    }

    fn is_zero_phase_iir(&self) -> bool {
        matches!(
            self,
            FilterType::BesselZero | FilterType::ButterworthZero | FilterType::EllipticZero
        )
    }

    fn is_band_fir(&self) -> bool {
        matches!(
            self,
            FilterType::FirZero1
                | FilterType::FirZero2
                | FilterType::Remez1
                | FilterType::Remez2
                | FilterType::Subtractive
        )
    }
}

/// Filter parameters. Cutoffs and widths are in Hz; the sample rate comes from the trace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub filter_type: FilterType,
    pub order: Option<usize>,
    pub high_pass: Option<f64>,
    pub high_width: Option<f64>,
    pub low_pass: Option<f64>,
    pub low_width: Option<f64>,
    pub window: WindowKind,
    /// Savitzky-Golay polynomial order, or the EWMA weight proportion.
    pub polyorder: Option<f64>,
    pub passband_ripple_db: f64,
    pub stopband_atten_db: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            filter_type: FilterType::None,
            order: None,
            high_pass: None,
            high_width: None,
            low_pass: None,
            low_width: None,
            window: WindowKind::Hann,
            polyorder: None,
            passband_ripple_db: 0.1,
            stopband_atten_db: 40.0,
        }
    }
}

impl FilterConfig {
    pub fn new(filter_type: FilterType) -> Self {
        Self {
            filter_type,
            ..Self::default()
        }
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_low_pass(mut self, cutoff_hz: f64, width_hz: f64) -> Self {
        self.low_pass = Some(cutoff_hz);
        self.low_width = Some(width_hz);
        self
    }

    pub fn with_high_pass(mut self, cutoff_hz: f64, width_hz: f64) -> Self {
        self.high_pass = Some(cutoff_hz);
        self.high_width = Some(width_hz);
        self
    }

    pub fn with_polyorder(mut self, polyorder: f64) -> Self {
        self.polyorder = Some(polyorder);
        self
    }

    fn require_order(&self) -> Result<usize, FilterError> {
        match self.order {
            Some(order) if order > 0 => Ok(order),
            _ => Err(FilterError::MissingOrder {
                filter: self.filter_type.name(),
            }),
        }
    }

    fn check_cutoff(cutoff_hz: f64, nyquist: f64) -> Result<f64, FilterError> {
        if cutoff_hz > 0.0 && cutoff_hz < nyquist {
            Ok(cutoff_hz)
        } else {
            Err(FilterError::CutoffOutOfRange {
                cutoff_hz,
                nyquist_hz: nyquist,
            })
        }
    }

    /// Band inferred from which cutoffs are set.
    pub fn band(&self, sample_rate: f64) -> Result<BandKind, FilterError> {
        let nyquist = sample_rate / 2.0;
        match (self.high_pass, self.low_pass) {
            (Some(hp), Some(lp)) => {
                let hp = Self::check_cutoff(hp, nyquist)?;
                let lp = Self::check_cutoff(lp, nyquist)?;
                if hp >= lp {
                    return Err(FilterError::InvertedBand {
                        high_pass: hp,
                        low_pass: lp,
                    });
                }
                Ok(BandKind::Bandpass(hp, lp))
            }
            (Some(hp), None) => Ok(BandKind::Highpass(Self::check_cutoff(hp, nyquist)?)),
            (None, Some(lp)) => Ok(BandKind::Lowpass(Self::check_cutoff(lp, nyquist)?)),
            (None, None) => Err(FilterError::MissingCutoff {
                filter: self.filter_type.name(),
            }),
        }
    }

    /// Piecewise band layout for the FIR designs, including transition widths.
    pub fn band_layout(&self, sample_rate: f64) -> Result<BandLayout, FilterError> {
        let nyquist = sample_rate / 2.0;
        let width = |value: Option<f64>, edge: &'static str| {
            value.filter(|w| *w > 0.0).ok_or(FilterError::MissingWidth {
                filter: self.filter_type.name(),
                edge,
            })
        };
        let layout = match self.band(sample_rate)? {
            BandKind::Highpass(hp) => BandLayout {
                edges: vec![0.0, hp - width(self.high_width, "high_pass")?, hp, nyquist],
                desired: vec![0.0, 1.0],
            },
            BandKind::Lowpass(lp) => BandLayout {
                edges: vec![0.0, lp, lp + width(self.low_width, "low_pass")?, nyquist],
                desired: vec![1.0, 0.0],
            },
            BandKind::Bandpass(hp, lp) => BandLayout {
                edges: vec![
                    0.0,
                    hp - width(self.high_width, "high_pass")?,
                    hp,
                    lp,
                    lp + width(self.low_width, "low_pass")?,
                    nyquist,
                ],
                desired: vec![0.0, 1.0, 0.0],
            },
        };
        layout.validate(nyquist)?;
        Ok(layout)
    }

    fn proportion(&self) -> Result<f64, FilterError> {
        let value = self.polyorder.unwrap_or(f64::NAN);
        if value > 0.0 && value < 1.0 {
            Ok(value)
        } else {
            Err(FilterError::EwmaProportion(value))
        }
    }

    fn savgol_polyorder(&self, window: usize) -> Result<usize, FilterError> {
        match self.polyorder {
            Some(p) if p >= 0.0 && p.fract() == 0.0 && (p as usize) < window => Ok(p as usize),
            Some(p) => Err(FilterError::SavgolWindow {
                window,
                polyorder: p.max(0.0) as usize,
            }),
            None => Err(FilterError::MissingOrder { filter: "savgol polyorder" }),
        }
    }

    /// Checks every parameter the configured variant needs, before any samples are touched.
    pub fn validate(&self, sample_rate: f64) -> Result<(), FilterError> {
        if !(sample_rate > 0.0) {
            return Err(FilterError::InvalidSampleRate);
        }
        let kind = self.filter_type;
        match kind {
            FilterType::None => Ok(()),
            FilterType::Median => {
                let order = self.require_order()?;
                if order % 2 == 0 {
                    return Err(FilterError::EvenOrder {
                        filter: kind.name(),
                        order,
                    });
                }
                Ok(())
            }
            FilterType::Savgol => {
                let order = self.require_order()?;
                self.savgol_polyorder(order).map(|_| ())
            }
            FilterType::Ewma | FilterType::EwmaA => {
                self.require_order()?;
                self.proportion().map(|_| ())
            }
            _ if kind.iir_family(self).is_some() => {
                self.require_order()?;
                self.band(sample_rate)?;
                if let Some(IirFamily::Elliptic { rp, rs }) = kind.iir_family(self) {
                    if !(rp > 0.0) || !(rs > 0.0) {
                        return Err(FilterError::EllipticRipple { rp, rs });
                    }
                }
                Ok(())
            }
            _ => {
                let order = self.require_order()?;
                let causal = matches!(
                    kind,
                    FilterType::FirZero2 | FilterType::Remez2 | FilterType::Subtractive
                );
                if causal && order % 2 == 0 {
                    return Err(FilterError::EvenOrder {
                        filter: kind.name(),
                        order,
                    });
                }
                self.band_layout(sample_rate).map(|_| ())
            }
        }
    }

    fn design_fir(&self, sample_rate: f64) -> Result<TransferFunction, FilterError> {
        let order = self.require_order()?;
        let layout = self.band_layout(sample_rate)?;
        let taps = match self.filter_type {
            FilterType::Remez1 | FilterType::Remez2 => remez::remez(order, &layout, sample_rate)?,
            _ => fir::firwin2(order, &layout, sample_rate, self.window)?,
        };
        Ok(TransferFunction::fir(taps))
    }

    /// Applies the configured filter to an already baselined array.
    pub fn apply(&self, baselined: &[f64], sample_rate: f64) -> Result<Vec<f64>, FilterError> {
        self.validate(sample_rate)?;
        let kind = self.filter_type;
        if let Some(family) = kind.iir_family(self) {
            let order = self.require_order()?;
            let chain = SosChain::design(family, order, self.band(sample_rate)?, sample_rate)?;
            return if kind.is_zero_phase_iir() {
                chain.filtfilt(baselined)
            } else {
                Ok(chain.filter(baselined))
            };
        }
        if kind.is_band_fir() {
            let tf = self.design_fir(sample_rate)?;
            return match kind {
                FilterType::FirZero1 | FilterType::Remez1 => tf.filtfilt(baselined),
                FilterType::Subtractive => {
                    let smooth = tf.delay_compensated(baselined);
                    Ok(baselined.iter().zip(smooth).map(|(x, s)| x - s).collect())
                }
                _ => Ok(tf.delay_compensated(baselined)),
            };
        }
        match kind {
            FilterType::Median => smooth::median(baselined, self.require_order()?),
            FilterType::Savgol => {
                let window = self.require_order()?;
                smooth::savgol(baselined, window, self.savgol_polyorder(window)?)
            }
            FilterType::Ewma => smooth::ewma(baselined, self.require_order()?, self.proportion()?),
            FilterType::EwmaA => {
                smooth::ewma_fir(baselined, self.require_order()?, self.proportion()?)
            }
            _ => Ok(baselined.to_vec()),
        }
    }
}

/// Subtracts the mean of `array[baseline]` from every sample.
pub fn baseline_subtract(
    array: &[f64],
    baseline: Range<usize>,
) -> Result<(Vec<f64>, f64), FilterError> {
    let Range { start, end } = baseline;
    if start >= end || end > array.len() {
        return Err(FilterError::BaselineWindow {
            start,
            end,
            len: array.len(),
        });
    }
    let offset = signal::mean(&array[start..end]).unwrap_or(0.0);
    Ok((array.iter().map(|v| v - offset).collect(), offset))
}

/// Baselined and filtered copy of `array`, plus the subtracted baseline mean.
///
/// The output always has the input's length.
#[derive(Clone, Debug)]
pub struct ConditionedTrace {
    pub samples: Vec<f64>,
    pub baseline_offset: f64,
}

pub fn condition(
    array: &[f64],
    baseline: Range<usize>,
    config: &FilterConfig,
    sample_rate: f64,
) -> Result<ConditionedTrace, FilterError> {
    config.validate(sample_rate)?;
    let (baselined, offset) = baseline_subtract(array, baseline)?;
    let samples = config.apply(&baselined, sample_rate)?;
    debug!(
        "filtered {} samples with {} (baseline offset {:.4})",
        samples.len(),
        config.filter_type.name(),
        offset
    );
    Ok(ConditionedTrace {
        samples,
        baseline_offset: offset,
    })
}

/// Convenience form returning only the conditioned samples.
pub fn filter(
    array: &[f64],
    baseline: Range<usize>,
    config: &FilterConfig,
    sample_rate: f64,
) -> Result<Vec<f64>, FilterError> {
    condition(array, baseline, config, sample_rate).map(|c| c.samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 10_000.0;

    fn pulse_trace() -> Vec<f64> {
        // flat offset, then a symmetric Gaussian bump centred at sample 1500
        (0..3000)
            .map(|i| {
                let t = (i as f64 - 1500.0) / 40.0;
                -65.0 + 10.0 * (-0.5 * t * t).exp()
            })
            .collect()
    }

    #[test]
    fn none_filter_returns_baselined_input() {
        let trace = pulse_trace();
        let out = filter(&trace, 0..500, &FilterConfig::default(), FS).unwrap();
        let baseline = signal::mean(&trace[0..500]).unwrap();
        assert_eq!(out.len(), trace.len());
        for (o, t) in out.iter().zip(&trace) {
            assert_eq!(*o, t - baseline);
        }
    }

    #[test]
    fn zero_phase_variants_preserve_pulse_centre() {
        let trace = pulse_trace();
        let configs = [
            FilterConfig::new(FilterType::BesselZero).with_order(4).with_low_pass(600.0, 300.0),
            FilterConfig::new(FilterType::ButterworthZero)
                .with_order(4)
                .with_low_pass(600.0, 300.0),
            FilterConfig::new(FilterType::EllipticZero)
                .with_order(4)
                .with_low_pass(600.0, 300.0),
            FilterConfig::new(FilterType::FirZero1).with_order(201).with_low_pass(600.0, 300.0),
            FilterConfig::new(FilterType::Remez1).with_order(201).with_low_pass(600.0, 300.0),
        ];
        for config in configs {
            let out = filter(&trace, 0..500, &config, FS).unwrap();
            assert_eq!(out.len(), trace.len());
            let centre = signal::argmax(&out).unwrap() as i64;
            let kind = config.filter_type;
            assert!((centre - 1500).abs() <= 1, "{kind:?} moved centre to {centre}");
        }
    }

    #[test]
    fn causal_fir_variants_keep_length() {
        let trace = pulse_trace();
        for kind in [FilterType::FirZero2, FilterType::Remez2, FilterType::Subtractive] {
            let config = FilterConfig::new(kind).with_order(201).with_low_pass(600.0, 300.0);
            let out = filter(&trace, 0..500, &config, FS).unwrap();
            assert_eq!(out.len(), trace.len(), "{kind:?}");
        }
    }

    #[test]
    fn plain_iir_runs_forward_only() {
        let trace = pulse_trace();
        let config = FilterConfig::new(FilterType::Butterworth)
            .with_order(4)
            .with_low_pass(300.0, 100.0);
        let out = filter(&trace, 0..500, &config, FS).unwrap();
        // a causal lowpass delays the bump
        assert!(signal::argmax(&out).unwrap() > 1500);
    }

    #[test]
    fn subtractive_removes_slow_component() {
        let trace = pulse_trace();
        let config = FilterConfig::new(FilterType::Subtractive)
            .with_order(201)
            .with_low_pass(600.0, 300.0);
        let out = filter(&trace, 0..500, &config, FS).unwrap();
        // the bump is slow relative to the cutoff, so little is left
        assert!(out.iter().map(|v| v.abs()).fold(0.0, f64::max) < 1.0);
    }

    #[test]
    fn band_filters_without_cutoff_are_configuration_errors() {
        for kind in [
            FilterType::Bessel,
            FilterType::ButterworthZero,
            FilterType::FirZero1,
            FilterType::Remez2,
        ] {
            let config = FilterConfig::new(kind).with_order(5);
            let err = config.validate(FS).unwrap_err();
            assert!(matches!(err, FilterError::MissingCutoff { .. }), "{kind:?}");
        }
        let median = FilterConfig::new(FilterType::Median).with_order(4);
        assert!(median.validate(FS).is_err());
        let inverted = FilterConfig::new(FilterType::Butterworth)
            .with_order(2)
            .with_high_pass(500.0, 10.0)
            .with_low_pass(100.0, 10.0);
        assert!(matches!(
            inverted.validate(FS),
            Err(FilterError::InvertedBand { .. })
        ));
        let even = FilterConfig::new(FilterType::FirZero2)
            .with_order(200)
            .with_low_pass(600.0, 300.0);
        assert!(matches!(even.validate(FS), Err(FilterError::EvenOrder { .. })));
    }

    #[test]
    fn savgol_and_median_need_no_cutoff() {
        let trace = pulse_trace();
        let savgol = FilterConfig::new(FilterType::Savgol).with_order(11).with_polyorder(3.0);
        assert_eq!(filter(&trace, 0..500, &savgol, FS).unwrap().len(), trace.len());
        let median = FilterConfig::new(FilterType::Median).with_order(5);
        assert_eq!(filter(&trace, 0..500, &median, FS).unwrap().len(), trace.len());
    }

    #[test]
    fn baseline_window_must_fit() {
        assert!(baseline_subtract(&[1.0, 2.0], 1..5).is_err());
        assert!(baseline_subtract(&[1.0, 2.0], 1..1).is_err());
    }

    #[test]
    fn config_deserializes_legacy_names() {
        let config: FilterConfig = serde_json::from_str(
            r#"{"filter_type":"fir_zero_2","order":301,"low_pass":600.0,"low_width":300.0,"window":"flattop"}"#,
        )
        .unwrap();
        assert_eq!(config.filter_type, FilterType::FirZero2);
        assert_eq!(config.window, WindowKind::Flattop);
        assert!(config.validate(FS).is_ok());
    }
}
