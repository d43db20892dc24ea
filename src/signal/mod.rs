// src/signal/mod.rs
//! Numeric building blocks shared by the analyzers.
pub mod peaks;
pub mod stats;

pub use peaks::{find_peaks, peak_prominence, peak_width, PeakOptions, PeakWidth, Prominence};
pub use stats::{
    interp, linregress, mean, mean_present, mode, moving_mean, std_dev, trapz, LinearFit,
};

/// Turns a computed value into an absent value when it is NaN or infinite.
///
/// Every derived quantity passes through here so that a missing or degenerate upstream
/// value can only ever surface as `None`.
pub fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Combines two optional values; absent if either is absent or the result is not finite.
pub fn combine(a: Option<f64>, b: Option<f64>, f: impl FnOnce(f64, f64) -> f64) -> Option<f64> {
    a.zip(b).and_then(|(a, b)| finite(f(a, b)))
}

/// Discrete derivative with unit spacing: central differences inside, one-sided at the ends.
pub fn gradient(data: &[f64]) -> Vec<f64> {
    let n = data.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut out = Vec::with_capacity(n);
    out.push(data[1] - data[0]);
    for i in 1..n - 1 {
        out.push((data[i + 1] - data[i - 1]) * 0.5);
    }
    out.push(data[n - 1] - data[n - 2]);
    out
}

/// Index of the largest value; first occurrence wins.
pub fn argmax(data: &[f64]) -> Option<usize> {
    data.iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Index of the smallest value; first occurrence wins.
pub fn argmin(data: &[f64]) -> Option<usize> {
    data.iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if v >= b => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Clamped sub-slice; empty when the range is inverted or outside the data.
pub fn window(data: &[f64], start: usize, end: usize) -> &[f64] {
    let end = end.min(data.len());
    if start >= end {
        &[]
    } else {
        &data[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_matches_central_differences() {
        let g = gradient(&[1.0, 2.0, 4.0, 7.0, 11.0]);
        assert_eq!(g, vec![1.0, 1.5, 2.5, 3.5, 4.0]);
    }

    #[test]
    fn arg_extrema_pick_first_occurrence() {
        let data = [0.0, 3.0, 3.0, -1.0, -1.0];
        assert_eq!(argmax(&data), Some(1));
        assert_eq!(argmin(&data), Some(3));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn combine_propagates_absence() {
        assert_eq!(combine(Some(1.0), None, |a, b| a + b), None);
        assert_eq!(combine(Some(1.0), Some(0.0), |a, b| a / b), None);
        assert_eq!(combine(Some(1.0), Some(2.0), |a, b| a / b), Some(0.5));
    }

    #[test]
    fn window_clamps() {
        let data = [1.0, 2.0, 3.0];
        assert_eq!(window(&data, 1, 10), &[2.0, 3.0]);
        assert!(window(&data, 2, 1).is_empty());
    }
}
