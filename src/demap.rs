//! Gray-coded constellations and the max-log soft demapper. For QPSK and QAM the first half of a
//! subcarrier's bits select the I level and the second half the Q level, MSB first on each axis.

use crate::rate::Modulation;
use num::Complex;

/// Axis levels indexed by the axis bits read as an MSB-first integer
const LEVELS_1: [f32; 2] = [-1., 1.];
const LEVELS_2: [f32; 4] = [-3., -1., 3., 1.];
const LEVELS_3: [f32; 8] = [-7., -5., -1., -3., 7., 5., 1., 3.];

fn axis_levels(modulation: Modulation) -> &'static [f32] {
    match modulation {
        Modulation::Bpsk | Modulation::Qpsk => &LEVELS_1,
        Modulation::Qam16 => &LEVELS_2,
        Modulation::Qam64 => &LEVELS_3,
    }
}

/// Normalization to unit average energy
fn scale(modulation: Modulation) -> f32 {
    match modulation {
        Modulation::Bpsk => 1.,
        Modulation::Qpsk => 1. / 2f32.sqrt(),
        Modulation::Qam16 => 1. / 10f32.sqrt(),
        Modulation::Qam64 => 1. / 42f32.sqrt(),
    }
}

fn axis_bits(modulation: Modulation) -> usize {
    match modulation {
        Modulation::Bpsk => 1,
        m => m.bits_per_subcarrier() / 2,
    }
}

fn bits_to_index(bits: &[u8]) -> usize {
    bits.iter().fold(0, |acc, b| (acc << 1) | (*b as usize & 1))
}

/// Map coded bits to constellation points. `bits.len()` must be a multiple of the bits per
/// subcarrier
pub fn map_bits(bits: &[u8], modulation: Modulation) -> Vec<Complex<f32>> {
    let nbpsc = modulation.bits_per_subcarrier();
    assert_eq!(bits.len() % nbpsc, 0);
    let levels = axis_levels(modulation);
    let k = scale(modulation);
    bits.chunks(nbpsc)
        .map(|c| match modulation {
            Modulation::Bpsk => Complex::new(levels[bits_to_index(c)], 0.),
            _ => {
                let h = nbpsc / 2;
                Complex::new(
                    levels[bits_to_index(&c[..h])],
                    levels[bits_to_index(&c[h..])],
                ) * k
            }
        })
        .collect()
}

fn nearest_level(y: f32, levels: &[f32], k: f32) -> f32 {
    let mut best = levels[0] * k;
    for l in levels.iter().skip(1) {
        if (y - l * k).abs() < (y - best).abs() {
            best = l * k;
        }
    }
    best
}

/// Hard decision: the ideal constellation point closest to `value`
pub fn nearest_point(value: Complex<f32>, modulation: Modulation) -> Complex<f32> {
    let levels = axis_levels(modulation);
    let k = scale(modulation);
    match modulation {
        Modulation::Bpsk => Complex::new(nearest_level(value.re, levels, k), 0.),
        _ => Complex::new(
            nearest_level(value.re, levels, k),
            nearest_level(value.im, levels, k),
        ),
    }
}

/// Max-log LLRs for each bit of one axis, appended to `out`. Positive means the bit is more
/// likely 1
fn demap_axis(y: f32, modulation: Modulation, noise_var: f32, out: &mut Vec<f32>) {
    let levels = axis_levels(modulation);
    let k = scale(modulation);
    let nbits = axis_bits(modulation);
    for b in 0..nbits {
        let mask = 1 << (nbits - 1 - b);
        let (mut d0, mut d1) = (std::f32::INFINITY, std::f32::INFINITY);
        for (idx, l) in levels.iter().enumerate() {
            let d = (y - l * k) * (y - l * k);
            if idx & mask == 0 {
                d0 = d0.min(d);
            } else {
                d1 = d1.min(d);
            }
        }
        out.push((d0 - d1) / noise_var);
    }
}

/// Soft-demap one equalized point, appending `bits_per_subcarrier` LLRs to `out`
pub fn demap(value: Complex<f32>, modulation: Modulation, noise_var: f32, out: &mut Vec<f32>) {
    demap_axis(value.re, modulation, noise_var, out);
    if modulation != Modulation::Bpsk {
        demap_axis(value.im, modulation, noise_var, out);
    }
}

/// Soft-demap a symbol's worth of points, each with its own noise variance
pub fn demap_symbol(values: &[Complex<f32>], noise_vars: &[f32], modulation: Modulation) -> Vec<f32> {
    assert_eq!(values.len(), noise_vars.len());
    let mut res = Vec::with_capacity(values.len() * modulation.bits_per_subcarrier());
    for (v, nv) in values.iter().zip(noise_vars) {
        demap(*v, modulation, *nv, &mut res);
    }
    res
}
