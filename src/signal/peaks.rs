//! Peak detection with height and prominence filters, plus width measurement at a
//! relative height. Plateau peaks report their middle sample.

#[derive(Clone, Copy, Debug, Default)]
pub struct PeakOptions {
    pub height: Option<f64>,
    pub prominence: Option<f64>,
}

impl PeakOptions {
    pub fn height(height: f64) -> Self {
        Self {
            height: Some(height),
            prominence: None,
        }
    }

    pub fn prominence(prominence: f64) -> Self {
        Self {
            height: None,
            prominence: Some(prominence),
        }
    }

    pub fn with_prominence(mut self, prominence: f64) -> Self {
        self.prominence = Some(prominence);
        self
    }
}

/// Prominence of a peak and the bases it was measured against.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prominence {
    pub value: f64,
    pub left_base: usize,
    pub right_base: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakWidth {
    pub width: f64,
    pub height: f64,
    pub left_ip: f64,
    pub right_ip: f64,
}

fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let i_max = x.len() - 1;
    let mut i = 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < i_max && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Indices of local maxima passing the configured filters.
pub fn find_peaks(x: &[f64], options: PeakOptions) -> Vec<usize> {
    let mut peaks = local_maxima(x);
    if let Some(min_height) = options.height {
        peaks.retain(|&p| x[p] >= min_height);
    }
    if let Some(min_prominence) = options.prominence {
        peaks.retain(|&p| peak_prominence(x, p).value >= min_prominence);
    }
    peaks
}

/// Vertical distance between a peak and the higher of its two surrounding minima, where each
/// side is searched until a sample higher than the peak or the edge of the data.
pub fn peak_prominence(x: &[f64], peak: usize) -> Prominence {
    let peak_value = x[peak];

    let mut left_base = peak;
    let mut left_min = peak_value;
    let mut i = peak as isize;
    while i >= 0 && x[i as usize] <= peak_value {
        if x[i as usize] < left_min {
            left_min = x[i as usize];
            left_base = i as usize;
        }
        i -= 1;
    }

    let mut right_base = peak;
    let mut right_min = peak_value;
    let mut j = peak;
    while j < x.len() && x[j] <= peak_value {
        if x[j] < right_min {
            right_min = x[j];
            right_base = j;
        }
        j += 1;
    }

    Prominence {
        value: peak_value - left_min.max(right_min),
        left_base,
        right_base,
    }
}

/// Width of a peak at `rel_height` of its prominence, with linear interpolation between
/// samples at both crossings. Positions are in samples.
pub fn peak_width(x: &[f64], peak: usize, rel_height: f64) -> PeakWidth {
    let prominence = peak_prominence(x, peak);
    let height = x[peak] - prominence.value * rel_height;

    let mut i = peak;
    while prominence.left_base < i && height < x[i] {
        i -= 1;
    }
    let mut left_ip = i as f64;
    if x[i] < height {
        left_ip += (height - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < prominence.right_base && height < x[i] {
        i += 1;
    }
    let mut right_ip = i as f64;
    if x[i] < height {
        right_ip -= (height - x[i]) / (x[i - 1] - x[i]);
    }

    PeakWidth {
        width: right_ip - left_ip,
        height,
        left_ip,
        right_ip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plateau_reports_middle_sample() {
        let x = [0.0, 1.0, 2.0, 2.0, 2.0, 1.0, 0.0];
        assert_eq!(find_peaks(&x, PeakOptions::default()), vec![3]);
    }

    #[test]
    fn height_and_prominence_filter() {
        let x = [0.0, 5.0, 4.0, 4.5, 0.0, 1.0, 0.0];
        assert_eq!(find_peaks(&x, PeakOptions::default()), vec![1, 3, 5]);
        assert_eq!(find_peaks(&x, PeakOptions::height(2.0)), vec![1, 3]);
        let strict = PeakOptions::height(2.0).with_prominence(1.0);
        assert_eq!(find_peaks(&x, strict), vec![1]);
    }

    #[test]
    fn prominence_uses_higher_base() {
        let x = [1.0, 0.0, 3.0, 2.0, 4.0];
        let p = peak_prominence(&x, 2);
        assert_eq!(p.value, 1.0);
        assert_eq!(p.left_base, 1);
        assert_eq!(p.right_base, 3);
    }

    #[test]
    fn triangle_half_width() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0, 1.0, 0.0];
        let w = peak_width(&x, 4, 0.5);
        assert!((w.height - 2.0).abs() < 1e-12);
        assert!((w.width - 4.0).abs() < 1e-12);
        assert!((w.left_ip - 2.0).abs() < 1e-12);
    }
}
