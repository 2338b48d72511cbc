//! Encoding of real vectors into plaintext polynomials.
//!
//! A vector of up to `N/2` values is interpreted as the evaluations of a real polynomial at the
//! primitive `2N`-th roots of unity `ζ^(5^j)`. The inverse of this canonical embedding is
//! computed by a special FFT over the rotation group generated by `5`, the resulting real
//! coefficients are scaled by `Δ` and rounded to integers.

use std::f64::consts::PI;

use num::complex::Complex64;

/// The generator of the rotation group.
const ROTATION_GENERATOR: usize = 5;

#[derive(Debug, Clone)]
/// An encoder for a fixed number of slots.
pub(crate) struct Encoder {
    slots: usize,
    /// `2N`, the order of the roots of unity.
    order: usize,
    rotation_group: Vec<usize>,
    roots: Vec<Complex64>,
}

impl Encoder {
    /// Creates an encoder for `slots = N/2` values, where `slots` is a power of two.
    pub(crate) fn new(slots: usize) -> Self {
        let order = 4 * slots;
        let mut rotation_group = Vec::with_capacity(slots);
        let mut power = 1;
        for _ in 0..slots {
            rotation_group.push(power);
            power = power * ROTATION_GENERATOR % order;
        }
        let roots = (0..=order)
            .map(|j| Complex64::from_polar(1., 2. * PI * j as f64 / order as f64))
            .collect();
        Self {
            slots,
            order,
            rotation_group,
            roots,
        }
    }

    /// Encodes `values` into `N = 2 * slots` real coefficients, scaled by `scale` and rounded.
    ///
    /// Missing values are treated as zeros. The caller guarantees that `values` fits into the
    /// slots and that the scaled coefficients fit into an `i64`.
    pub(crate) fn encode(&self, values: &[f64], scale: f64) -> Vec<i64> {
        let mut slots = vec![Complex64::new(0., 0.); self.slots];
        for (slot, value) in slots.iter_mut().zip(values) {
            slot.re = *value;
        }
        self.special_fft_inv(&mut slots);

        let mut coefficients = vec![0_i64; 2 * self.slots];
        for (i, slot) in slots.iter().enumerate() {
            coefficients[i] = (slot.re * scale).round() as i64;
            coefficients[i + self.slots] = (slot.im * scale).round() as i64;
        }
        coefficients
    }

    /// Decodes the (unscaled) real coefficients of a plaintext polynomial into all slot values.
    pub(crate) fn decode(&self, coefficients: &[f64]) -> Vec<f64> {
        let mut slots: Vec<Complex64> = (0..self.slots)
            .map(|i| Complex64::new(coefficients[i], coefficients[i + self.slots]))
            .collect();
        self.special_fft(&mut slots);
        slots.into_iter().map(|slot| slot.re).collect()
    }

    fn special_fft(&self, values: &mut [Complex64]) {
        let n = values.len();
        bit_reverse_permute(values);
        let mut len = 2;
        while len <= n {
            let half = len >> 1;
            let quarter_order = len << 2;
            for i in (0..n).step_by(len) {
                for j in 0..half {
                    let idx = (self.rotation_group[j] % quarter_order) * self.order / quarter_order;
                    let u = values[i + j];
                    let v = values[i + j + half] * self.roots[idx];
                    values[i + j] = u + v;
                    values[i + j + half] = u - v;
                }
            }
            len <<= 1;
        }
    }

    fn special_fft_inv(&self, values: &mut [Complex64]) {
        let n = values.len();
        let mut len = n;
        while len >= 2 {
            let half = len >> 1;
            let quarter_order = len << 2;
            for i in (0..n).step_by(len) {
                for j in 0..half {
                    let idx = (quarter_order - self.rotation_group[j] % quarter_order)
                        * self.order
                        / quarter_order;
                    let u = values[i + j] + values[i + j + half];
                    let v = (values[i + j] - values[i + j + half]) * self.roots[idx];
                    values[i + j] = u;
                    values[i + j + half] = v;
                }
            }
            len >>= 1;
        }
        bit_reverse_permute(values);
        let n_inv = 1. / n as f64;
        values.iter_mut().for_each(|v| *v *= n_inv);
    }
}

fn bit_reverse_permute<T>(values: &mut [T]) {
    let n = values.len();
    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            values.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{distributions::Uniform, Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;

    /// Evaluates the polynomial with the given real coefficients at `ζ^(5^j)`.
    fn evaluate(coefficients: &[f64], encoder: &Encoder, j: usize) -> Complex64 {
        let root = encoder.roots[encoder.rotation_group[j]];
        let mut power = Complex64::new(1., 0.);
        let mut acc = Complex64::new(0., 0.);
        for c in coefficients {
            acc += power * *c;
            power *= root;
        }
        acc
    }

    #[test]
    fn test_encoding_is_canonical_embedding() {
        let encoder = Encoder::new(4);
        let values = [0.5, -1.25, 3., 2.];
        let scale = (1_u64 << 30) as f64;
        let coefficients: Vec<f64> = encoder
            .encode(&values, scale)
            .into_iter()
            .map(|c| c as f64 / scale)
            .collect();
        for (j, value) in values.iter().enumerate() {
            let evaluated = evaluate(&coefficients, &encoder, j);
            assert!((evaluated.re - value).abs() < 1e-6);
            assert!(evaluated.im.abs() < 1e-6);
        }
    }

    /// Generates a test which encodes and decodes random values.
    ///
    /// The arguments are:
    /// - the number of slots
    /// - the number of values
    macro_rules! test_encode_decode {
        ($slots:literal, $len:literal $(,)?) => {
            paste::item! {
                #[test]
                fn [<test_encode_decode_ $slots _ $len>]() {
                    let encoder = Encoder::new($slots);
                    let scale = (1_u64 << 40) as f64;
                    let mut prng = ChaCha20Rng::from_seed([5_u8; 32]);
                    let values: Vec<f64> = (&mut prng)
                        .sample_iter(Uniform::new_inclusive(-100., 100.))
                        .take($len)
                        .collect();
                    let coefficients: Vec<f64> = encoder
                        .encode(&values, scale)
                        .into_iter()
                        .map(|c| c as f64 / scale)
                        .collect();
                    let decoded = encoder.decode(&coefficients);
                    assert_eq!(decoded.len(), $slots);
                    for (value, decoded) in values.iter().zip(decoded.iter()) {
                        assert!((value - decoded).abs() < 1e-8);
                    }
                    // padding slots decode to zero
                    assert!(decoded[$len..].iter().all(|v| v.abs() < 1e-8));
                }
            }
        };
    }

    test_encode_decode!(2, 1);
    test_encode_decode!(2, 2);
    test_encode_decode!(16, 10);
    test_encode_decode!(1024, 1000);
    test_encode_decode!(4096, 4096);
}
