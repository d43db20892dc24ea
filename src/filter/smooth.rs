//! Non-band smoothing: sliding median, Savitzky-Golay, exponential moving averages.
use crate::error::FilterError;
use crate::filter::fir::TransferFunction;

/// Sliding median over an odd window; samples beyond the edges count as zero.
pub fn median(input: &[f64], window: usize) -> Result<Vec<f64>, FilterError> {
    if window % 2 == 0 {
        return Err(FilterError::EvenOrder {
            filter: "median",
            order: window,
        });
    }
    let half = window / 2;
    let mut scratch = Vec::with_capacity(window);
    Ok((0..input.len())
        .map(|i| {
            scratch.clear();
            scratch.extend((0..window).map(|k| {
                (i + k)
                    .checked_sub(half)
                    .and_then(|j| input.get(j))
                    .copied()
                    .unwrap_or(0.0)
            }));
            scratch.sort_by(|a, b| a.total_cmp(b));
            scratch[half]
        })
        .collect())
}

/// Least-squares smoothing weights for a polynomial of `polyorder` over `window` samples.
fn savgol_weights(window: usize, polyorder: usize) -> Result<Vec<f64>, FilterError> {
    let centre = (window - 1) as f64 / 2.0;
    let terms = polyorder + 1;
    let positions: Vec<f64> = (0..window).map(|j| j as f64 - centre).collect();

    // normal matrix of the Vandermonde design, solved for the first unit vector
    let mut normal = vec![vec![0.0; terms]; terms];
    for (r, row) in normal.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = positions.iter().map(|z| z.powi((r + c) as i32)).sum();
        }
    }
    let mut rhs = vec![0.0; terms];
    rhs[0] = 1.0;
    let coeffs = crate::fit::solve_linear(normal, rhs).ok_or(FilterError::SavgolWindow {
        window,
        polyorder,
    })?;
    Ok(positions
        .iter()
        .map(|z| {
            coeffs
                .iter()
                .enumerate()
                .map(|(p, c)| c * z.powi(p as i32))
                .sum()
        })
        .collect())
}

/// Savitzky-Golay smoothing with nearest-value extension at both edges.
pub fn savgol(input: &[f64], window: usize, polyorder: usize) -> Result<Vec<f64>, FilterError> {
    if window <= polyorder {
        return Err(FilterError::SavgolWindow { window, polyorder });
    }
    let weights = savgol_weights(window, polyorder)?;
    let left = (window - 1) / 2;
    let n = input.len();
    if n == 0 {
        return Ok(vec![]);
    }
    let at = |i: isize| -> f64 { input[i.clamp(0, n as isize - 1) as usize] };
    Ok((0..n)
        .map(|i| {
            weights
                .iter()
                .enumerate()
                .map(|(j, w)| w * at(i as isize + j as isize - left as isize))
                .sum()
        })
        .collect())
}

/// Smoothing factor such that the last `window` samples carry `proportion` of the weight.
fn ewma_alpha(window: usize, proportion: f64) -> Result<f64, FilterError> {
    if !(proportion > 0.0 && proportion < 1.0) {
        return Err(FilterError::EwmaProportion(proportion));
    }
    Ok(1.0 - ((1.0 - proportion).ln() / window.max(1) as f64).exp())
}

/// First-order recursive EWMA applied forward and backward.
pub fn ewma(input: &[f64], window: usize, proportion: f64) -> Result<Vec<f64>, FilterError> {
    let alpha = ewma_alpha(window, proportion)?;
    TransferFunction::new(vec![alpha], vec![1.0, alpha - 1.0]).filtfilt(input)
}

/// Truncated EWMA as a normalised FIR of `window + 1` taps, applied forward and backward.
pub fn ewma_fir(input: &[f64], window: usize, proportion: f64) -> Result<Vec<f64>, FilterError> {
    let alpha = ewma_alpha(window, proportion)?;
    let raw: Vec<f64> = (0..=window).map(|k| (1.0 - alpha).powi(k as i32)).collect();
    let total: f64 = raw.iter().sum();
    let taps = raw.into_iter().map(|v| v / total).collect();
    TransferFunction::fir(taps).filtfilt(input)
}
