// src/fit.rs
//! Exponential decay models and a bounded Levenberg-Marquardt least-squares fit.
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::FitError;

const MAX_ITERATIONS: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecayModel {
    #[default]
    #[serde(alias = "s_exp")]
    Single,
    #[serde(alias = "db_exp")]
    Double,
    #[serde(alias = "tri_exp")]
    Triple,
}

impl DecayModel {
    pub fn terms(&self) -> usize {
        match self {
            DecayModel::Single => 1,
            DecayModel::Double => 2,
            DecayModel::Triple => 3,
        }
    }

    pub fn parameter_count(&self) -> usize {
        2 * self.terms()
    }

    /// Sum of `amp_i * exp(-x / tau_i)`; parameters are `[amp_1, tau_1, amp_2, tau_2, ...]`.
    pub fn evaluate(&self, x: f64, params: &[f64]) -> f64 {
        params
            .chunks(2)
            .take(self.terms())
            .map(|p| p[0] * (-x / p[1]).exp())
            .sum()
    }

    fn jacobian_row(&self, x: f64, params: &[f64], row: &mut [f64]) {
        for (i, p) in params.chunks(2).take(self.terms()).enumerate() {
            let e = (-x / p[1]).exp();
            row[2 * i] = e;
            row[2 * i + 1] = p[0] * e * x / (p[1] * p[1]);
        }
    }

    /// Default starting point from a peak value and an estimated time constant.
    pub fn initial_guess(&self, peak: f64, tau: f64) -> Vec<f64> {
        match self {
            DecayModel::Single => vec![peak, tau],
            DecayModel::Double => vec![peak, tau, 0.0, 2.0 * tau],
            DecayModel::Triple => vec![peak, tau, 0.0, 2.0 * tau, 0.0, 4.0 * tau],
        }
    }
}

/// Box constraints for every parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// Smallest time constant the fit may reach; keeps `exp(-x / tau)` defined at `x = 0`.
const MIN_TAU: f64 = 1e-9;

impl Bounds {
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    /// Amplitudes share the sign of the peak; time constants stay positive.
    pub fn for_polarity(model: DecayModel, positive: bool) -> Self {
        let mut lower = Vec::with_capacity(model.parameter_count());
        let mut upper = Vec::with_capacity(model.parameter_count());
        for _ in 0..model.terms() {
            if positive {
                lower.push(0.0);
                upper.push(f64::INFINITY);
            } else {
                lower.push(f64::NEG_INFINITY);
                upper.push(0.0);
            }
            lower.push(MIN_TAU);
            upper.push(f64::INFINITY);
        }
        Self { lower, upper }
    }

    fn clamp(&self, params: &mut [f64]) {
        for (i, p) in params.iter_mut().enumerate() {
            *p = p.clamp(self.lower[i], self.upper[i]);
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecayFit {
    pub model: DecayModel,
    pub params: Vec<f64>,
    pub curve: Vec<f64>,
    pub iterations: usize,
}

impl DecayFit {
    pub fn amplitudes(&self) -> Vec<f64> {
        self.params.iter().step_by(2).copied().collect()
    }

    pub fn taus(&self) -> Vec<f64> {
        self.params.iter().skip(1).step_by(2).copied().collect()
    }

    /// First time constant.
    pub fn tau(&self) -> f64 {
        self.params[1]
    }
}

fn cost(model: DecayModel, x: &[f64], y: &[f64], params: &[f64]) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| {
            let r = model.evaluate(xi, params) - yi;
            r * r
        })
        .sum::<f64>()
        * 0.5
}

/// Gaussian elimination with partial pivoting; `None` if the system is singular.
pub fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * solution[k]).sum();
        solution[row] = (b[row] - tail) / a[row][row];
    }
    solution.iter().all(|v| v.is_finite()).then_some(solution)
}

/// Fits `model` to `(x, y)` starting from `guess`, keeping parameters inside `bounds`.
///
/// Steps that leave the box are projected back onto it. The fit stops when the relative
/// cost reduction or the step size becomes negligible, or when damping grows so large that
/// no descent direction remains.
pub fn fit_decay(
    model: DecayModel,
    x: &[f64],
    y: &[f64],
    guess: &[f64],
    bounds: &Bounds,
) -> Result<DecayFit, FitError> {
    let n_params = model.parameter_count();
    if x.len() != y.len() {
        return Err(FitError::LengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    if guess.len() != n_params {
        return Err(FitError::GuessLength {
            expected: n_params,
            got: guess.len(),
        });
    }
    if let Some(got) = [bounds.lower.len(), bounds.upper.len()]
        .into_iter()
        .find(|&len| len != n_params)
    {
        return Err(FitError::BoundsLength {
            expected: n_params,
            got,
        });
    }
    if x.len() < n_params + 1 {
        return Err(FitError::TooFewPoints {
            needed: n_params + 1,
            got: x.len(),
        });
    }

    let mut params = guess.to_vec();
    bounds.clamp(&mut params);
    let mut current = cost(model, x, y, &params);
    if !current.is_finite() {
        return Err(FitError::NonFinite);
    }
    let mut lambda = 1e-3;
    let mut row = vec![0.0; n_params];

    for iteration in 1..=MAX_ITERATIONS {
        let mut jtj = vec![vec![0.0; n_params]; n_params];
        let mut jtr = vec![0.0; n_params];
        for (&xi, &yi) in x.iter().zip(y) {
            model.jacobian_row(xi, &params, &mut row);
            let r = model.evaluate(xi, &params) - yi;
            for i in 0..n_params {
                jtr[i] += row[i] * r;
                for j in 0..n_params {
                    jtj[i][j] += row[i] * row[j];
                }
            }
        }
        if jtr.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite);
        }

        loop {
            let mut damped = jtj.clone();
            for (i, r) in damped.iter_mut().enumerate() {
                r[i] += lambda * jtj[i][i].max(1e-12);
            }
            let rhs: Vec<f64> = jtr.iter().map(|v| -v).collect();
            let Some(step) = solve_linear(damped, rhs) else {
                lambda *= 10.0;
                if lambda > 1e16 {
                    return Err(FitError::Singular);
                }
                continue;
            };
            let mut candidate: Vec<f64> = params.iter().zip(&step).map(|(p, s)| p + s).collect();
            bounds.clamp(&mut candidate);
            let next = cost(model, x, y, &candidate);

            if next.is_finite() && next < current {
                let moved = candidate
                    .iter()
                    .zip(&params)
                    .map(|(c, p)| (c - p).abs() / (p.abs() + 1e-12))
                    .fold(0.0, f64::max);
                let reduction = (current - next) / current.max(f64::MIN_POSITIVE);
                params = candidate;
                current = next;
                lambda = (lambda / 10.0).max(1e-12);
                if reduction < 1e-12 || moved < 1e-10 {
                    return Ok(finish(model, x, params, iteration));
                }
                break;
            }
            lambda *= 10.0;
            if lambda > 1e16 {
                // no step lowers the cost: we are at a (bounded) minimum
                return Ok(finish(model, x, params, iteration));
            }
        }
    }
    Err(FitError::DidNotConverge(MAX_ITERATIONS))
}

fn finish(model: DecayModel, x: &[f64], params: Vec<f64>, iterations: usize) -> DecayFit {
    debug!("decay fit ({model:?}) converged after {iterations} iterations: {params:?}");
    let curve = x.iter().map(|&xi| model.evaluate(xi, &params)).collect();
    DecayFit {
        model,
        params,
        curve,
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn decay(amp: f64, tau: f64, noise: f64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(7);
        let x: Vec<f64> = (0..1000).map(|i| i as f64 * 0.1).collect();
        let y = x
            .iter()
            .map(|t| amp * (-t / tau).exp() + rng.gen_range(-noise..=noise))
            .collect();
        (x, y)
    }

    #[test]
    fn single_exponential_recovers_tau() {
        let (x, y) = decay(-40.0, 12.0, 0.05);
        let model = DecayModel::Single;
        let fit = fit_decay(
            model,
            &x,
            &y,
            &model.initial_guess(-40.0, 8.0),
            &Bounds::for_polarity(model, false),
        )
        .unwrap();
        assert!((fit.tau() - 12.0).abs() / 12.0 < 0.05, "tau {}", fit.tau());
        assert_eq!(fit.curve.len(), x.len());
    }

    #[test]
    fn double_exponential_fits_two_components() {
        let x: Vec<f64> = (0..2000).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|t| 30.0 * (-t / 5.0).exp() + 10.0 * (-t / 40.0).exp())
            .collect();
        let model = DecayModel::Double;
        let fit = fit_decay(
            model,
            &x,
            &y,
            &[30.0, 6.0, 5.0, 30.0],
            &Bounds::for_polarity(model, true),
        )
        .unwrap();
        let taus = fit.taus();
        assert!((taus[0] - 5.0).abs() < 0.25, "{taus:?}");
        assert!((taus[1] - 40.0).abs() < 2.0, "{taus:?}");
        assert!(fit.amplitudes().iter().all(|a| *a >= 0.0));
    }

    #[test]
    fn bounds_keep_amplitude_sign() {
        let (x, y) = decay(20.0, 5.0, 0.0);
        let model = DecayModel::Single;
        // negative-peak bounds cannot reach a positive amplitude
        let fit = fit_decay(
            model,
            &x,
            &y,
            &[-1.0, 5.0],
            &Bounds::for_polarity(model, false),
        )
        .unwrap();
        assert!(fit.params[0] <= 0.0);
    }

    #[test]
    fn triple_model_evaluates_sum() {
        let params = [1.0, 1.0, 2.0, 2.0, 3.0, 3.0];
        let v = DecayModel::Triple.evaluate(0.0, &params);
        assert!((v - 6.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_mismatched_input() {
        let model = DecayModel::Single;
        let err = fit_decay(model, &[0.0, 1.0], &[1.0], &[1.0, 1.0], &Bounds::unbounded(2));
        assert!(matches!(err, Err(FitError::LengthMismatch { .. })));
        let err = fit_decay(model, &[0.0, 1.0], &[1.0, 0.5], &[1.0, 1.0], &Bounds::unbounded(2));
        assert!(matches!(err, Err(FitError::TooFewPoints { .. })));
    }

    #[test]
    fn bounds_must_cover_every_parameter() {
        let (x, y) = decay(-40.0, 12.0, 0.0);
        let model = DecayModel::Double;
        let guess = model.initial_guess(-40.0, 8.0);
        let narrow = Bounds::for_polarity(DecayModel::Single, false);
        let err = fit_decay(model, &x, &y, &guess, &narrow);
        assert!(matches!(err, Err(FitError::BoundsLength { expected: 4, got: 2 })));
        let mut bounds = Bounds::unbounded(4);
        bounds.upper.pop();
        let err = fit_decay(model, &x, &y, &guess, &bounds);
        assert!(matches!(err, Err(FitError::BoundsLength { expected: 4, got: 3 })));
    }

    #[test]
    fn solve_linear_handles_pivoting() {
        let a = vec![vec![0.0, 2.0], vec![3.0, 1.0]];
        let x = solve_linear(a, vec![4.0, 5.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12 && (x[1] - 2.0).abs() < 1e-12);
        assert!(solve_linear(vec![vec![1.0, 2.0], vec![2.0, 4.0]], vec![1.0, 2.0]).is_none());
    }
}
