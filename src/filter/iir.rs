// src/filter/iir.rs
//! Analog-prototype IIR design (Bessel, Butterworth, elliptic) mapped to digital
//! second-order sections through the bilinear transform.
use std::f64::consts::PI;

use rustfft::num_complex::Complex64;

use crate::error::FilterError;

const EPSILON: f64 = 2e-16;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IirFamily {
    Bessel,
    Butterworth,
    Elliptic { rp: f64, rs: f64 },
}

/// Passband layout in Hz.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BandKind {
    Lowpass(f64),
    Highpass(f64),
    Bandpass(f64, f64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

#[derive(Clone, Copy, Debug, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

impl BiquadCoeffs {
    fn process(&self, state: &mut BiquadState, input: f64) -> f64 {
        // Transposed direct form II
        let y = self.b0 * input + state.z1;
        state.z1 = self.b1 * input - self.a1 * y + state.z2;
        state.z2 = self.b2 * input - self.a2 * y;
        y
    }

    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }
}

/// Cascade of second-order sections.
#[derive(Clone, Debug, Default)]
pub struct SosChain {
    sections: Vec<BiquadCoeffs>,
}

impl SosChain {
    pub fn design(
        family: IirFamily,
        order: usize,
        band: BandKind,
        sample_rate: f64,
    ) -> Result<Self, FilterError> {
        let prototype = match family {
            IirFamily::Bessel => bessel_prototype(order),
            IirFamily::Butterworth => butterworth_prototype(order),
            IirFamily::Elliptic { rp, rs } => elliptic_prototype(order, rp, rs)?,
        };
        let warp = |hz: f64| 4.0 * (PI * (2.0 * hz / sample_rate) / 2.0).tan();
        let analog = match band {
            BandKind::Lowpass(hz) => prototype.lowpass(warp(hz)),
            BandKind::Highpass(hz) => prototype.highpass(warp(hz)),
            BandKind::Bandpass(low, high) => {
                let (w1, w2) = (warp(low), warp(high));
                prototype.bandpass((w1 * w2).sqrt(), w2 - w1)
            }
        };
        Ok(Self {
            sections: analog.bilinear(2.0).into_sections(),
        })
    }

    pub fn sections(&self) -> &[BiquadCoeffs] {
        &self.sections
    }

    /// Single causal pass from rest.
    pub fn filter(&self, input: &[f64]) -> Vec<f64> {
        let mut states = vec![BiquadState::default(); self.sections.len()];
        self.run(input, &mut states)
    }

    fn run(&self, input: &[f64], states: &mut [BiquadState]) -> Vec<f64> {
        input
            .iter()
            .map(|&x| {
                self.sections
                    .iter()
                    .zip(states.iter_mut())
                    .fold(x, |value, (section, state)| section.process(state, value))
            })
            .collect()
    }

    /// Section states that make the cascade start in steady state for a unit step.
    fn steady_state(&self) -> Vec<BiquadState> {
        let mut scale = 1.0;
        self.sections
            .iter()
            .map(|s| {
                let h = s.dc_gain();
                let z2 = s.b2 - s.a2 * h;
                let z1 = s.b1 - s.a1 * h + z2;
                let state = BiquadState {
                    z1: z1 * scale,
                    z2: z2 * scale,
                };
                scale *= h;
                state
            })
            .collect()
    }

    fn padlen(&self) -> usize {
        let zero_b2 = self.sections.iter().filter(|s| s.b2 == 0.0).count();
        let zero_a2 = self.sections.iter().filter(|s| s.a2 == 0.0).count();
        3 * (2 * self.sections.len() + 1 - zero_b2.min(zero_a2))
    }

    /// Forward-backward filtering with odd extension and steady-state initial conditions.
    pub fn filtfilt(&self, input: &[f64]) -> Result<Vec<f64>, FilterError> {
        let padlen = self.padlen();
        let extended = odd_extend(input, padlen)?;
        let zi = self.steady_state();

        let scaled = |x0: f64| -> Vec<BiquadState> {
            zi.iter()
                .map(|s| BiquadState {
                    z1: s.z1 * x0,
                    z2: s.z2 * x0,
                })
                .collect()
        };
        let mut forward = self.run(&extended, &mut scaled(extended[0]));
        forward.reverse();
        let mut backward = self.run(&forward, &mut scaled(forward[0]));
        backward.reverse();
        Ok(backward[padlen..backward.len() - padlen].to_vec())
    }
}

/// Mirrors both ends of `input` about its end samples (`2*x0 - x[k]`).
pub(crate) fn odd_extend(input: &[f64], padlen: usize) -> Result<Vec<f64>, FilterError> {
    let n = input.len();
    if n <= padlen {
        return Err(FilterError::TraceTooShort { len: n, padlen });
    }
    let first = input[0];
    let last = input[n - 1];
    let mut out = Vec::with_capacity(n + 2 * padlen);
    out.extend((1..=padlen).rev().map(|k| 2.0 * first - input[k]));
    out.extend_from_slice(input);
    out.extend((1..=padlen).map(|k| 2.0 * last - input[n - 1 - k]));
    Ok(out)
}

#[derive(Clone, Debug)]
struct Zpk {
    zeros: Vec<Complex64>,
    poles: Vec<Complex64>,
    gain: f64,
}

fn product(values: &[Complex64]) -> Complex64 {
    values.iter().fold(Complex64::new(1.0, 0.0), |acc, v| acc * v)
}

impl Zpk {
    fn degree(&self) -> usize {
        self.poles.len().saturating_sub(self.zeros.len())
    }

    fn lowpass(self, wo: f64) -> Self {
        let degree = self.degree() as i32;
        Self {
            zeros: self.zeros.iter().map(|z| *z * wo).collect(),
            poles: self.poles.iter().map(|p| *p * wo).collect(),
            gain: self.gain * wo.powi(degree),
        }
    }

    fn highpass(self, wo: f64) -> Self {
        let degree = self.degree();
        let neg_z: Vec<Complex64> = self.zeros.iter().map(|z| -z).collect();
        let neg_p: Vec<Complex64> = self.poles.iter().map(|p| -p).collect();
        let gain = self.gain * (product(&neg_z) / product(&neg_p)).re;
        let mut zeros: Vec<Complex64> = self.zeros.iter().map(|z| wo / *z).collect();
        zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
        Self {
            zeros,
            poles: self.poles.iter().map(|p| wo / *p).collect(),
            gain,
        }
    }

    fn bandpass(self, wo: f64, bw: f64) -> Self {
        let degree = self.degree();
        let split = |values: &[Complex64]| -> Vec<Complex64> {
            let scaled: Vec<Complex64> = values.iter().map(|v| v * (bw / 2.0)).collect();
            let root = |v: &Complex64| (v * v - wo * wo).sqrt();
            scaled
                .iter()
                .map(|v| v + root(v))
                .chain(scaled.iter().map(|v| v - root(v)))
                .collect()
        };
        let mut zeros = split(&self.zeros);
        zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
        Self {
            zeros,
            poles: split(&self.poles),
            gain: self.gain * bw.powi(degree as i32),
        }
    }

    fn bilinear(self, fs: f64) -> Self {
        let degree = self.degree();
        let fs2 = Complex64::new(2.0 * fs, 0.0);
        let map = |v: &Complex64| (fs2 + v) / (fs2 - v);
        let num: Vec<Complex64> = self.zeros.iter().map(|z| fs2 - z).collect();
        let den: Vec<Complex64> = self.poles.iter().map(|p| fs2 - p).collect();
        let mut zeros: Vec<Complex64> = self.zeros.iter().map(map).collect();
        zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));
        Self {
            zeros,
            poles: self.poles.iter().map(map).collect(),
            gain: self.gain * (product(&num) / product(&den)).re,
        }
    }

    /// Groups conjugate pairs into biquads; each pole pair takes its nearest zeros.
    fn into_sections(self) -> Vec<BiquadCoeffs> {
        let origin = Complex64::new(0.0, 0.0);
        let mut zeros = self.zeros;
        let mut poles = self.poles;
        let n = zeros.len().max(poles.len());
        let n = n + n % 2;
        zeros.resize(n, origin);
        poles.resize(n, origin);

        let mut pole_groups = pair_up(&poles);
        pole_groups.sort_by(|a, b| a.0.norm().total_cmp(&b.0.norm()));
        let (mut zero_complex, mut zero_real) = split_conjugates(&zeros);

        let mut sections = Vec::with_capacity(pole_groups.len());
        for (p1, p2) in pole_groups {
            let want_complex = p1.im.abs() > 0.0;
            let (z1, z2) = if (want_complex && !zero_complex.is_empty()) || zero_real.len() < 2 {
                let idx = nearest(&zero_complex, p1);
                let z = zero_complex.swap_remove(idx);
                (z, z.conj())
            } else {
                let first = zero_real.swap_remove(nearest(&zero_real, p1));
                let second = zero_real.swap_remove(nearest(&zero_real, p2));
                (first, second)
            };
            sections.push(BiquadCoeffs {
                b0: 1.0,
                b1: -(z1 + z2).re,
                b2: (z1 * z2).re,
                a1: -(p1 + p2).re,
                a2: (p1 * p2).re,
            });
        }
        if let Some(first) = sections.first_mut() {
            first.b0 *= self.gain;
            first.b1 *= self.gain;
            first.b2 *= self.gain;
        }
        sections
    }
}

fn split_conjugates(values: &[Complex64]) -> (Vec<Complex64>, Vec<Complex64>) {
    let tol = |v: &Complex64| 100.0 * EPSILON * v.norm().max(1.0);
    let complex = values.iter().copied().filter(|v| v.im > tol(v)).collect();
    let real = values
        .iter()
        .filter(|v| v.im.abs() <= tol(v))
        .map(|v| Complex64::new(v.re, 0.0))
        .collect();
    (complex, real)
}

fn pair_up(poles: &[Complex64]) -> Vec<(Complex64, Complex64)> {
    let (complex, mut real) = split_conjugates(poles);
    let mut groups: Vec<(Complex64, Complex64)> =
        complex.into_iter().map(|p| (p, p.conj())).collect();
    real.sort_by(|a, b| a.re.total_cmp(&b.re));
    for pair in real.chunks(2) {
        match pair {
            [a, b] => groups.push((*a, *b)),
            [a] => groups.push((*a, Complex64::new(0.0, 0.0))),
            _ => {}
        }
    }
    groups
}

fn nearest(candidates: &[Complex64], target: Complex64) -> usize {
    candidates
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - target).norm().total_cmp(&(b.1 - target).norm()))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn butterworth_prototype(order: usize) -> Zpk {
    let n = order as f64;
    let poles = (0..order)
        .map(|i| {
            let m = -(order as f64) + 1.0 + 2.0 * i as f64;
            -Complex64::from_polar(1.0, PI * m / (2.0 * n))
        })
        .collect();
    Zpk {
        zeros: vec![],
        poles,
        gain: 1.0,
    }
}

/// Bessel prototype normalised so the phase response matches Butterworth asymptotically.
fn bessel_prototype(order: usize) -> Zpk {
    if order == 0 {
        return Zpk {
            zeros: vec![],
            poles: vec![],
            gain: 1.0,
        };
    }
    // coefficients of the reverse Bessel polynomial, lowest power first
    let coeffs: Vec<f64> = (0..=order)
        .map(|k| {
            let mut value = 1.0;
            for i in (order - k + 1)..=(2 * order - k) {
                value *= i as f64;
            }
            for i in 1..=k {
                value /= i as f64;
            }
            value / 2f64.powi((order - k) as i32)
        })
        .collect();
    let a0 = coeffs[0];
    let scale = a0.powf(-1.0 / order as f64);
    let poles = polynomial_roots(&coeffs)
        .into_iter()
        .map(|r| r * scale)
        .collect();
    Zpk {
        zeros: vec![],
        poles,
        gain: 1.0,
    }
}

/// Durand-Kerner iteration for a monic real polynomial given lowest power first.
fn polynomial_roots(coeffs: &[f64]) -> Vec<Complex64> {
    let degree = coeffs.len() - 1;
    let radius = coeffs[0].abs().powf(1.0 / degree as f64).max(1.0);
    let seed = Complex64::new(0.4, 0.9);
    let mut roots: Vec<Complex64> = (0..degree).map(|i| seed.powu(i as u32) * radius).collect();
    let eval = |s: Complex64| {
        coeffs
            .iter()
            .rev()
            .fold(Complex64::new(0.0, 0.0), |acc, &c| acc * s + c)
    };
    for _ in 0..2000 {
        let mut max_step: f64 = 0.0;
        for i in 0..degree {
            let mut denom = Complex64::new(1.0, 0.0);
            for j in 0..degree {
                if i != j {
                    denom *= roots[i] - roots[j];
                }
            }
            let step = eval(roots[i]) / denom;
            roots[i] -= step;
            max_step = max_step.max(step.norm());
        }
        if max_step < 1e-14 * radius {
            break;
        }
    }
    // snap near-real roots so conjugate pairing is exact
    for root in roots.iter_mut() {
        if root.im.abs() < 1e-10 * root.norm() {
            root.im = 0.0;
        }
    }
    roots
}

fn pow10m1(x: f64) -> f64 {
    10f64.powf(x) - 1.0
}

/// Complete elliptic integral of the first kind from the complementary parameter `1 - m`.
fn ellipk_complement(mc: f64) -> f64 {
    if mc <= 0.0 {
        return f64::INFINITY;
    }
    let mut a = 1.0;
    let mut b = mc.sqrt();
    for _ in 0..64 {
        if (a - b).abs() <= 1e-16 * a {
            break;
        }
        let next = 0.5 * (a + b);
        b = (a * b).sqrt();
        a = next;
    }
    PI / (2.0 * a)
}

fn ellipk(m: f64) -> f64 {
    ellipk_complement(1.0 - m)
}

/// Jacobi elliptic functions sn, cn, dn by descending Landen transformation.
fn ellipj(u: f64, m: f64) -> (f64, f64, f64) {
    if m < 1e-9 {
        let t = u.sin();
        let b = u.cos();
        let ai = 0.25 * m * (u - t * b);
        return (t - ai * b, b + ai * t, 1.0 - 0.5 * m * t * t);
    }
    if m >= 0.9999999999 {
        let mut ai = 0.25 * (1.0 - m);
        let b = u.cosh();
        let t = u.tanh();
        let phi = 1.0 / b;
        let twon = b * u.sinh();
        let sn = t + ai * (twon - u) / (b * b);
        ai *= t * phi;
        let cn = phi - ai * (twon - u);
        let dn = phi + ai * (twon + u);
        return (sn, cn, dn);
    }
    let mut a = [0.0; 9];
    let mut c = [0.0; 9];
    a[0] = 1.0;
    c[0] = m.sqrt();
    let mut b = (1.0 - m).sqrt();
    let mut twon = 1.0;
    let mut i = 0;
    while (c[i] / a[i]).abs() > f64::EPSILON && i < 8 {
        let ai = a[i];
        i += 1;
        c[i] = (ai - b) / 2.0;
        let t = (ai * b).sqrt();
        a[i] = (ai + b) / 2.0;
        b = t;
        twon *= 2.0;
    }
    let mut phi = twon * a[i] * u;
    let mut previous = phi;
    while i > 0 {
        let t = c[i] * phi.sin() / a[i];
        previous = phi;
        phi = (t.asin() + phi) / 2.0;
        i -= 1;
    }
    let sn = phi.sin();
    let cn = phi.cos();
    (sn, cn, cn / (phi - previous).cos())
}

/// Inverse Jacobi sn for complex argument, by Landen descent.
fn arc_jac_sn(w: Complex64, m: f64) -> Complex64 {
    let complement = |kx: Complex64| ((1.0 - kx) * (1.0 + kx)).sqrt();
    let k = m.sqrt();
    let mut ks = vec![k];
    while *ks.last().unwrap_or(&0.0) != 0.0 && ks.len() < 12 {
        let current = ks[ks.len() - 1];
        let kp = ((1.0 - current) * (1.0 + current)).sqrt();
        ks.push((1.0 - kp) / (1.0 + kp));
    }
    let capk = ks[1..].iter().map(|k| 1.0 + k).product::<f64>() * PI / 2.0;
    let mut wn = w;
    for pair in ks.windows(2) {
        let (kn, knext) = (pair[0], pair[1]);
        wn = 2.0 * wn / ((1.0 + knext) * (1.0 + complement(wn * kn)));
    }
    capk * (2.0 / PI) * wn.asin()
}

fn arc_jac_sc1(w: f64, m: f64) -> f64 {
    arc_jac_sn(Complex64::new(0.0, w), m).im
}

/// Solves the degree equation for the elliptic modulus.
fn ellipdeg(order: usize, m1: f64) -> f64 {
    let k1 = ellipk(m1);
    let k1p = ellipk_complement(m1);
    let q1 = (-PI * k1p / k1).exp();
    let q = q1.powf(1.0 / order as f64);
    let num: f64 = (0..=7).map(|m| q.powi(m * (m + 1))).sum();
    let den: f64 = 1.0 + 2.0 * (1..=8).map(|m| q.powi(m * m)).sum::<f64>();
    16.0 * q * (num / den).powi(4)
}

fn elliptic_prototype(order: usize, rp: f64, rs: f64) -> Result<Zpk, FilterError> {
    if !(rp > 0.0) || !(rs > 0.0) {
        return Err(FilterError::EllipticRipple { rp, rs });
    }
    if order == 1 {
        let p = -(1.0 / pow10m1(0.1 * rp)).sqrt();
        return Ok(Zpk {
            zeros: vec![],
            poles: vec![Complex64::new(p, 0.0)],
            gain: -p,
        });
    }
    let eps_sq = pow10m1(0.1 * rp);
    let eps = eps_sq.sqrt();
    let ck1_sq = eps_sq / pow10m1(0.1 * rs);
    let m = ellipdeg(order, ck1_sq);
    let capk = ellipk(m);

    let js: Vec<f64> = ((1 - order % 2)..order).step_by(2).map(|j| j as f64).collect();
    let jac: Vec<(f64, f64, f64)> = js
        .iter()
        .map(|j| ellipj(j * capk / order as f64, m))
        .collect();

    let mut zeros: Vec<Complex64> = jac
        .iter()
        .filter(|(s, _, _)| s.abs() > EPSILON)
        .map(|(s, _, _)| Complex64::new(0.0, 1.0 / (m.sqrt() * s)))
        .collect();
    let conj_zeros: Vec<Complex64> = zeros.iter().map(|z| z.conj()).collect();
    zeros.extend(conj_zeros);

    let r = arc_jac_sc1(1.0 / eps, ck1_sq);
    let v0 = capk * r / (order as f64 * ellipk(ck1_sq));
    let (sv, cv, dv) = ellipj(v0, 1.0 - m);
    let mut poles: Vec<Complex64> = jac
        .iter()
        .map(|&(s, c, d)| {
            -Complex64::new(c * d * sv * cv, s * dv) / (1.0 - (d * sv).powi(2))
        })
        .collect();
    let conj_poles: Vec<Complex64> = if order % 2 == 1 {
        let norm = poles.iter().map(|p| p.norm_sqr()).sum::<f64>().sqrt();
        poles
            .iter()
            .filter(|p| p.im.abs() > EPSILON * norm)
            .map(|p| p.conj())
            .collect()
    } else {
        poles.iter().map(|p| p.conj()).collect()
    };
    poles.extend(conj_poles);

    let neg_p: Vec<Complex64> = poles.iter().map(|p| -p).collect();
    let neg_z: Vec<Complex64> = zeros.iter().map(|z| -z).collect();
    let mut gain = (product(&neg_p) / product(&neg_z)).re;
    if order % 2 == 0 {
        gain /= (1.0 + eps_sq).sqrt();
    }
    Ok(Zpk { zeros, poles, gain })
}
