//! Butterworth design and zero-phase second-order-section filtering.
//!
//! Edges are normalized to the Nyquist frequency, so a value of `1.0` is
//! half the sampling rate. The design follows the usual digital route:
//! analog prototype poles, frequency transformation, pre-warped bilinear
//! transform, then grouping into biquads.

use std::f64::consts::PI;

use num_complex::Complex64;

/// Imaginary parts below this are treated as real poles.
const REAL_TOLERANCE: f64 = 1e-10;

/// Filter response with edges as fractions of Nyquist, each in `(0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BandType {
    Lowpass(f64),
    Highpass(f64),
    Bandpass(f64, f64),
}

/// One biquad `b0 + b1 z^-1 + b2 z^-2 / 1 + a1 z^-1 + a2 z^-2`; `a[0]` is always 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Section {
    fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>()
    }
}

/// Digital Butterworth filter of the given order as second-order sections.
pub fn butterworth(order: usize, band: BandType) -> Vec<Section> {
    let prototype: Vec<Complex64> = (0..order)
        .map(|i| {
            let m = 2.0 * i as f64 + 1.0 - order as f64;
            -Complex64::from_polar(1.0, PI * m / (2.0 * order as f64))
        })
        .collect();

    let (zeros, poles, gain) = match band {
        BandType::Lowpass(edge) => {
            let wo = prewarp(edge);
            let poles: Vec<Complex64> = prototype.iter().map(|p| *p * wo).collect();
            (Vec::new(), poles, wo.powi(order as i32))
        }
        BandType::Highpass(edge) => {
            let wo = prewarp(edge);
            let poles: Vec<Complex64> = prototype.iter().map(|p| wo / *p).collect();
            let product: Complex64 = prototype.iter().map(|p| -*p).product();
            (vec![Complex64::new(0.0, 0.0); order], poles, (Complex64::new(1.0, 0.0) / product).re)
        }
        BandType::Bandpass(low, high) => {
            let (w1, w2) = (prewarp(low), prewarp(high));
            let bandwidth = w2 - w1;
            let centre_sq = w1 * w2;
            let mut poles = Vec::with_capacity(2 * order);
            for p in &prototype {
                let scaled = *p * (bandwidth / 2.0);
                let offset = (scaled * scaled - centre_sq).sqrt();
                poles.push(scaled + offset);
                poles.push(scaled - offset);
            }
            (vec![Complex64::new(0.0, 0.0); order], poles, bandwidth.powi(order as i32))
        }
    };

    let (zeros, poles, gain) = bilinear(&zeros, &poles, gain);
    into_sections(&zeros, &poles, gain)
}

/// Analog edge frequency for a bilinear transform at `fs = 2`.
fn prewarp(edge: f64) -> f64 {
    4.0 * (PI * edge / 2.0).tan()
}

fn bilinear(zeros: &[Complex64], poles: &[Complex64], gain: f64) -> (Vec<Complex64>, Vec<Complex64>, f64) {
    let fs2 = Complex64::new(4.0, 0.0);
    let mut digital_zeros: Vec<Complex64> = zeros.iter().map(|z| (fs2 + *z) / (fs2 - *z)).collect();
    let digital_poles: Vec<Complex64> = poles.iter().map(|p| (fs2 + *p) / (fs2 - *p)).collect();
    digital_zeros.resize(poles.len(), Complex64::new(-1.0, 0.0));

    let numerator: Complex64 = zeros.iter().map(|z| fs2 - *z).product();
    let denominator: Complex64 = poles.iter().map(|p| fs2 - *p).product();
    (digital_zeros, digital_poles, gain * (numerator / denominator).re)
}

fn into_sections(zeros: &[Complex64], poles: &[Complex64], gain: f64) -> Vec<Section> {
    let mut pole_groups: Vec<Vec<Complex64>> = poles
        .iter()
        .filter(|p| p.im > REAL_TOLERANCE)
        .map(|p| vec![*p, p.conj()])
        .collect();
    let real_poles: Vec<Complex64> = poles
        .iter()
        .filter(|p| p.im.abs() <= REAL_TOLERANCE)
        .map(|p| Complex64::new(p.re, 0.0))
        .collect();
    pole_groups.extend(real_poles.chunks(2).map(<[Complex64]>::to_vec));
    // Poles nearest the unit circle go last.
    pole_groups.sort_by(|a, b| {
        let ra = a.iter().map(|p| p.norm()).fold(0.0, f64::max);
        let rb = b.iter().map(|p| p.norm()).fold(0.0, f64::max);
        ra.total_cmp(&rb)
    });

    let mut zeros = interleave_real_zeros(zeros).into_iter();
    let mut sections: Vec<Section> = pole_groups
        .iter()
        .map(|group| {
            let section_zeros: Vec<f64> = zeros.by_ref().take(group.len()).collect();
            Section {
                b: polynomial(&section_zeros),
                a: polynomial_complex(group),
            }
        })
        .collect();

    if let Some(first) = sections.first_mut() {
        for coefficient in first.b.iter_mut() {
            *coefficient *= gain;
        }
    }
    sections
}

/// Real zeros alternating between `z >= 0` and `z < 0` so band-pass sections
/// each receive one zero at each band edge.
fn interleave_real_zeros(zeros: &[Complex64]) -> Vec<f64> {
    let (mut positive, mut negative): (Vec<f64>, Vec<f64>) =
        zeros.iter().map(|z| z.re).partition(|z| *z >= 0.0);
    let mut out = Vec::with_capacity(zeros.len());
    while !positive.is_empty() || !negative.is_empty() {
        if let Some(z) = positive.pop() {
            out.push(z);
        }
        if let Some(z) = negative.pop() {
            out.push(z);
        }
    }
    out
}

fn polynomial(roots: &[f64]) -> [f64; 3] {
    match roots {
        [] => [1.0, 0.0, 0.0],
        [r] => [1.0, -r, 0.0],
        [r1, r2, ..] => [1.0, -(r1 + r2), r1 * r2],
    }
}

fn polynomial_complex(roots: &[Complex64]) -> [f64; 3] {
    match roots {
        [] => [1.0, 0.0, 0.0],
        [r] => [1.0, -r.re, 0.0],
        [r1, r2, ..] => [1.0, -(*r1 + *r2).re, (*r1 * *r2).re],
    }
}

/// Per-section initial state giving a unit-step steady state for the cascade.
fn steady_state(sections: &[Section]) -> Vec<[f64; 2]> {
    let mut scale = 1.0;
    sections
        .iter()
        .map(|section| {
            let [b0, b1, b2] = section.b;
            let [_, a1, a2] = section.a;
            let rhs0 = b1 - a1 * b0;
            let rhs1 = b2 - a2 * b0;
            let z0 = (rhs0 + rhs1) / (1.0 + a1 + a2);
            let z1 = rhs1 - a2 * z0;
            let state = [scale * z0, scale * z1];
            scale *= section.dc_gain();
            state
        })
        .collect()
}

/// Direct-form II transposed cascade applied in place.
fn sosfilt(sections: &[Section], samples: &mut [f64], state: &mut [[f64; 2]]) {
    for sample in samples.iter_mut() {
        let mut value = *sample;
        for (section, z) in sections.iter().zip(state.iter_mut()) {
            let y = section.b[0] * value + z[0];
            z[0] = section.b[1] * value - section.a[1] * y + z[1];
            z[1] = section.b[2] * value - section.a[2] * y;
            value = y;
        }
        *sample = value;
    }
}

/// Forward-backward filtering with odd extension of `padlen` samples at each
/// end. `padlen` is clamped to `samples.len() - 1`.
pub fn sosfiltfilt(sections: &[Section], samples: &[f64], padlen: usize) -> Vec<f64> {
    let n = samples.len();
    if n == 0 || sections.is_empty() {
        return samples.to_vec();
    }
    let pad = padlen.min(n - 1);
    let first = samples[0];
    let last = samples[n - 1];

    let mut extended = Vec::with_capacity(n + 2 * pad);
    extended.extend((1..=pad).rev().map(|i| 2.0 * first - samples[i]));
    extended.extend_from_slice(samples);
    extended.extend((1..=pad).map(|i| 2.0 * last - samples[n - 1 - i]));

    let zi = steady_state(sections);

    let start = extended[0];
    let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * start, z[1] * start]).collect();
    sosfilt(sections, &mut extended, &mut state);

    extended.reverse();
    let start = extended[0];
    let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * start, z[1] * start]).collect();
    sosfilt(sections, &mut extended, &mut state);
    extended.reverse();

    extended[pad..pad + n].to_vec()
}
