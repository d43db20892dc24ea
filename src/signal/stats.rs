use std::cmp::Ordering;

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    Some(data.iter().sum::<f64>() / data.len() as f64)
}

/// Population standard deviation (divides by n).
pub fn std_dev(data: &[f64]) -> Option<f64> {
    let mean = mean(data)?;
    let variance = data
        .iter()
        .map(|v| {
            let delta = v - mean;
            delta * delta
        })
        .sum::<f64>()
        / data.len() as f64;
    Some(variance.sqrt())
}

/// Mean of the values that are present; `None` if none are.
pub fn mean_present<I: IntoIterator<Item = Option<f64>>>(values: I) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Trailing moving average; the first `window - 1` outputs average whatever is available.
pub fn moving_mean(data: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(data.len());
    let mut running = 0.0;
    for (i, &v) in data.iter().enumerate() {
        running += v;
        if i >= window {
            running -= data[i - window];
        }
        let count = (i + 1).min(window);
        out.push(running / count as f64);
    }
    out
}

/// Most frequent value. Ties resolve to the smallest value.
pub fn mode(data: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = data.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut best = (sorted[0], 0usize);
    let mut run = (sorted[0], 0usize);
    for &v in &sorted {
        if v == run.0 {
            run.1 += 1;
        } else {
            run = (v, 1);
        }
        if run.1 > best.1 {
            best = run;
        }
    }
    Some(best.0)
}

/// Ordinary least-squares line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_value: f64,
}

impl LinearFit {
    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

pub fn linregress(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let x_mean = mean(x)?;
    let y_mean = mean(y)?;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (&xi, &yi) in x.iter().zip(y) {
        let dx = xi - x_mean;
        let dy = yi - y_mean;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    let r_value = if syy == 0.0 { 0.0 } else { sxy / (sxx * syy).sqrt() };
    Some(LinearFit {
        slope,
        intercept: y_mean - slope * x_mean,
        r_value,
    })
}

/// Trapezoidal integral of `y` over the sample positions `x`.
pub fn trapz(y: &[f64], x: &[f64]) -> f64 {
    y.windows(2)
        .zip(x.windows(2))
        .map(|(yw, xw)| 0.5 * (xw[1] - xw[0]) * (yw[0] + yw[1]))
        .sum()
}

/// Linear interpolation with clamping at the ends. `xp` must be increasing.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> Option<f64> {
    let n = xp.len().min(fp.len());
    if n == 0 || x.is_nan() {
        return None;
    }
    if x <= xp[0] {
        return Some(fp[0]);
    }
    if x >= xp[n - 1] {
        return Some(fp[n - 1]);
    }
    let upper = xp[..n].partition_point(|&v| v.partial_cmp(&x) != Some(Ordering::Greater));
    let lower = upper - 1;
    let span = xp[upper] - xp[lower];
    if span == 0.0 {
        return Some(fp[lower]);
    }
    Some(fp[lower] + (x - xp[lower]) * (fp[upper] - fp[lower]) / span)
}
