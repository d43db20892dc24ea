//! Parks-McClellan equiripple design for symmetric (type I/II) FIR filters with unit
//! band weights.
use std::f64::consts::PI;

use crate::error::FilterError;
use crate::filter::fir::BandLayout;

const GRID_DENSITY: usize = 16;
const MAX_ITERATIONS: usize = 25;

struct DenseGrid {
    freq: Vec<f64>,
    desired: Vec<f64>,
    weight: Vec<f64>,
}

fn dense_grid(r: usize, bands: &[f64], desired: &[f64]) -> DenseGrid {
    let delf = 0.5 / (GRID_DENSITY * r) as f64;
    let mut grid = DenseGrid {
        freq: Vec::new(),
        desired: Vec::new(),
        weight: Vec::new(),
    };
    for (band, &gain) in desired.iter().enumerate() {
        let mut low = bands[2 * band];
        let high = bands[2 * band + 1];
        let count = (((high - low) / delf) + 0.5) as usize;
        for _ in 0..count.max(1) {
            grid.freq.push(low);
            grid.desired.push(gain);
            grid.weight.push(1.0);
            low += delf;
        }
        if let Some(last) = grid.freq.last_mut() {
            *last = high;
        }
    }
    grid
}

/// Barycentric form of the current alternation set.
struct Alternation {
    x: Vec<f64>,
    y: Vec<f64>,
    ad: Vec<f64>,
}

impl Alternation {
    fn new(r: usize, ext: &[usize], grid: &DenseGrid) -> Self {
        let x: Vec<f64> = ext.iter().map(|&e| (2.0 * PI * grid.freq[e]).cos()).collect();
        let ld = (r - 1) / 15 + 1;
        let ad: Vec<f64> = (0..=r)
            .map(|i| {
                let mut denom = 1.0;
                for j in 0..ld {
                    let mut k = j;
                    while k <= r {
                        if k != i {
                            denom *= 2.0 * (x[i] - x[k]);
                        }
                        k += ld;
                    }
                }
                if denom.abs() < 0.00001 {
                    denom = 0.00001;
                }
                1.0 / denom
            })
            .collect();

        let (mut numer, mut denom, mut sign) = (0.0, 0.0, 1.0);
        for i in 0..=r {
            numer += ad[i] * grid.desired[ext[i]];
            denom += sign * ad[i] / grid.weight[ext[i]];
            sign = -sign;
        }
        let delta = numer / denom;
        let mut sign = 1.0;
        let y = (0..=r)
            .map(|i| {
                let value = grid.desired[ext[i]] - sign * delta / grid.weight[ext[i]];
                sign = -sign;
                value
            })
            .collect();
        Self { x, y, ad }
    }

    fn response(&self, freq: f64) -> f64 {
        let xc = (2.0 * PI * freq).cos();
        let (mut numer, mut denom) = (0.0, 0.0);
        for i in 0..self.x.len() {
            let c = xc - self.x[i];
            if c.abs() < 1.0e-7 {
                return self.y[i];
            }
            let c = self.ad[i] / c;
            denom += c;
            numer += c * self.y[i];
        }
        numer / denom
    }
}

fn search(r: usize, error: &[f64]) -> Option<Vec<usize>> {
    let n = error.len();
    if n < 2 {
        return None;
    }
    let mut found = Vec::with_capacity(2 * r);
    if (error[0] > 0.0 && error[0] > error[1]) || (error[0] < 0.0 && error[0] < error[1]) {
        found.push(0);
    }
    for i in 1..n - 1 {
        let e = error[i];
        if (e >= error[i - 1] && e > error[i + 1] && e > 0.0)
            || (e <= error[i - 1] && e < error[i + 1] && e < 0.0)
        {
            found.push(i);
        }
    }
    let j = n - 1;
    if (error[j] > 0.0 && error[j] > error[j - 1]) || (error[j] < 0.0 && error[j] < error[j - 1]) {
        found.push(j);
    }
    if found.len() < r + 1 {
        return None;
    }

    let mut extra = found.len() - (r + 1);
    while extra > 0 {
        let mut up = error[found[0]] > 0.0;
        let mut weakest = 0;
        let mut alternates = true;
        for j in 1..found.len() {
            if error[found[j]].abs() < error[found[weakest]].abs() {
                weakest = j;
            }
            if up && error[found[j]] < 0.0 {
                up = false;
            } else if !up && error[found[j]] > 0.0 {
                up = true;
            } else {
                alternates = false;
                break;
            }
        }
        if alternates && extra == 1 {
            let last = found.len() - 1;
            weakest = if error[found[last]].abs() < error[found[0]].abs() {
                last
            } else {
                0
            };
        }
        found.remove(weakest);
        extra -= 1;
    }
    Some(found)
}

/// Equiripple taps for a symmetric filter. Bands are in Hz with edges from 0 to Nyquist.
pub fn remez(
    numtaps: usize,
    layout: &BandLayout,
    sample_rate: f64,
) -> Result<Vec<f64>, FilterError> {
    layout.validate(sample_rate / 2.0)?;
    if numtaps < 3 {
        return Err(FilterError::RemezFailed);
    }
    let bands: Vec<f64> = layout.edges.iter().map(|f| f / sample_rate).collect();
    let odd = numtaps % 2 == 1;
    if !odd && layout.desired.last().copied().unwrap_or(0.0) != 0.0 {
        return Err(FilterError::EvenOrder {
            filter: "equiripple design with gain at nyquist",
            order: numtaps,
        });
    }
    let r = numtaps / 2 + usize::from(odd);

    let mut grid = dense_grid(r, &bands, &layout.desired);
    if grid.freq.len() <= r {
        return Err(FilterError::RemezFailed);
    }
    if !odd {
        for i in 0..grid.freq.len() {
            let c = (PI * grid.freq[i]).cos();
            grid.desired[i] /= c;
            grid.weight[i] *= c;
        }
    }

    let size = grid.freq.len();
    let mut ext: Vec<usize> = (0..=r).map(|i| i * (size - 1) / r).collect();
    for _ in 0..MAX_ITERATIONS {
        let alternation = Alternation::new(r, &ext, &grid);
        let error: Vec<f64> = (0..size)
            .map(|i| grid.weight[i] * (grid.desired[i] - alternation.response(grid.freq[i])))
            .collect();
        ext = search(r, &error).ok_or(FilterError::RemezFailed)?;
        let magnitudes: Vec<f64> = ext.iter().map(|&e| error[e].abs()).collect();
        let max = magnitudes.iter().copied().fold(f64::MIN, f64::max);
        let min = magnitudes.iter().copied().fold(f64::MAX, f64::min);
        if max > 0.0 && (max - min) / max < 0.0001 {
            break;
        }
    }

    let alternation = Alternation::new(r, &ext, &grid);
    let amplitudes: Vec<f64> = (0..=numtaps / 2)
        .map(|i| {
            let c = if odd {
                1.0
            } else {
                (PI * i as f64 / numtaps as f64).cos()
            };
            alternation.response(i as f64 / numtaps as f64) * c
        })
        .collect();

    let m = (numtaps as f64 - 1.0) / 2.0;
    let upper = if odd { m as usize } else { numtaps / 2 - 1 };
    let taps = (0..numtaps)
        .map(|n| {
            let x = 2.0 * PI * (n as f64 - m) / numtaps as f64;
            let sum: f64 = (1..=upper).map(|k| 2.0 * amplitudes[k] * (x * k as f64).cos()).sum();
            (amplitudes[0] + sum) / numtaps as f64
        })
        .collect();
    Ok(taps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfft::num_complex::Complex64;

    fn gain_at(taps: &[f64], hz: f64, fs: f64) -> f64 {
        let w = 2.0 * PI * hz / fs;
        taps.iter()
            .enumerate()
            .map(|(n, t)| Complex64::from_polar(*t, -w * n as f64))
            .sum::<Complex64>()
            .norm()
    }

    #[test]
    fn lowpass_has_flat_passband_and_deep_stopband() {
        let layout = BandLayout {
            edges: vec![0.0, 300.0, 600.0, 5_000.0],
            desired: vec![1.0, 0.0],
        };
        let taps = remez(101, &layout, 10_000.0).unwrap();
        assert_eq!(taps.len(), 101);
        for i in 0..101 {
            assert!((taps[i] - taps[100 - i]).abs() < 1e-9);
        }
        assert!((gain_at(&taps, 100.0, 10_000.0) - 1.0).abs() < 0.01);
        assert!(gain_at(&taps, 1_500.0, 10_000.0) < 0.01);
    }

    #[test]
    fn bandpass_passes_centre() {
        let layout = BandLayout {
            edges: vec![0.0, 100.0, 300.0, 900.0, 1_200.0, 5_000.0],
            desired: vec![0.0, 1.0, 0.0],
        };
        let taps = remez(151, &layout, 10_000.0).unwrap();
        assert!((gain_at(&taps, 600.0, 10_000.0) - 1.0).abs() < 0.02);
        assert!(gain_at(&taps, 3_000.0, 10_000.0) < 0.02);
    }
}
