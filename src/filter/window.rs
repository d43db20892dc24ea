use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Taper applied to frequency-sampled FIR designs. All windows are symmetric.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    #[default]
    Hann,
    Hamming,
    Blackman,
    BlackmanHarris,
    Nuttall,
    Flattop,
    Bartlett,
    Barthann,
    Parzen,
    Boxcar,
    Tukey { alpha: f64 },
    Kaiser { beta: f64 },
    Gaussian { std: f64 },
}

fn general_cosine(n: usize, coeffs: &[f64]) -> Vec<f64> {
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| {
            coeffs
                .iter()
                .enumerate()
                .map(|(k, a)| {
                    let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                    sign * a * (2.0 * PI * k as f64 * i as f64 / denom).cos()
                })
                .sum()
        })
        .collect()
}

/// Modified Bessel function of the first kind, order zero (power series).
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..200 {
        term *= (half / k as f64).powi(2);
        sum += term;
        if term < sum * 1e-17 {
            break;
        }
    }
    sum
}

impl WindowKind {
    pub fn samples(&self, n: usize) -> Vec<f64> {
        if n == 0 {
            return vec![];
        }
        if n == 1 {
            return vec![1.0];
        }
        let last = (n - 1) as f64;
        match *self {
            WindowKind::Hann => general_cosine(n, &[0.5, 0.5]),
            WindowKind::Hamming => general_cosine(n, &[0.54, 0.46]),
            WindowKind::Blackman => general_cosine(n, &[0.42, 0.50, 0.08]),
            WindowKind::BlackmanHarris => {
                general_cosine(n, &[0.35875, 0.48829, 0.14128, 0.01168])
            }
            WindowKind::Nuttall => {
                general_cosine(n, &[0.3635819, 0.4891775, 0.1365995, 0.0106411])
            }
            WindowKind::Flattop => general_cosine(
                n,
                &[0.21557895, 0.41663158, 0.277263158, 0.083578947, 0.006947368],
            ),
            WindowKind::Bartlett => (0..n)
                .map(|i| 1.0 - (2.0 * i as f64 / last - 1.0).abs())
                .collect(),
            WindowKind::Barthann => (0..n)
                .map(|i| {
                    let fac = (i as f64 / last - 0.5).abs();
                    0.62 - 0.48 * fac + 0.38 * (2.0 * PI * fac).cos()
                })
                .collect(),
            WindowKind::Parzen => {
                let half = n as f64 / 2.0;
                (0..n)
                    .map(|i| {
                        let x = (i as f64 - last / 2.0).abs();
                        if x <= last / 4.0 {
                            1.0 - 6.0 * (x / half).powi(2) + 6.0 * (x / half).powi(3)
                        } else {
                            2.0 * (1.0 - x / half).powi(3)
                        }
                    })
                    .collect()
            }
            WindowKind::Boxcar => vec![1.0; n],
            WindowKind::Tukey { alpha } => {
                if alpha <= 0.0 {
                    return vec![1.0; n];
                }
                if alpha >= 1.0 {
                    return WindowKind::Hann.samples(n);
                }
                let width = (alpha * last / 2.0).floor() as usize;
                (0..n)
                    .map(|i| {
                        let x = i as f64;
                        if i <= width {
                            0.5 * (1.0 + (PI * (-1.0 + 2.0 * x / (alpha * last))).cos())
                        } else if i >= n - width - 1 {
                            0.5 * (1.0
                                + (PI * (-2.0 / alpha + 1.0 + 2.0 * x / (alpha * last))).cos())
                        } else {
                            1.0
                        }
                    })
                    .collect()
            }
            WindowKind::Kaiser { beta } => {
                let denom = bessel_i0(beta);
                (0..n)
                    .map(|i| {
                        let r = 2.0 * i as f64 / last - 1.0;
                        bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / denom
                    })
                    .collect()
            }
            WindowKind::Gaussian { std } => (0..n)
                .map(|i| (-0.5 * ((i as f64 - last / 2.0) / std).powi(2)).exp())
                .collect(),
        }
    }
}
