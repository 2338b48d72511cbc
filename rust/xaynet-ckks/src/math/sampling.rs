//! Sampling of secrets, errors and uniform polynomials.
//!
//! See the [math module] documentation since this is a private module anyways.
//!
//! [math module]: crate::math

use std::sync::Arc;

use fhe_math::rq::{Context, Poly, Representation};
use fhe_util::sample_vec_cbd;
use rand::{distributions::Uniform, CryptoRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::{math::signed_poly, CkksError};

/// The variance of the centered binomial error distribution. The standard deviation is
/// `sqrt(10) ≈ 3.16`.
pub(crate) const ERROR_VARIANCE: usize = 10;

/// Creates a `ChaCha20` PRNG seeded by the operating system.
pub(crate) fn secure_prng() -> ChaCha20Rng {
    ChaCha20Rng::from_entropy()
}

/// Samples `degree` coefficients uniformly from `{-1, 0, 1}`.
pub(crate) fn ternary<R: RngCore>(prng: &mut R, degree: usize) -> Vec<i64> {
    let dist = Uniform::new_inclusive(-1_i64, 1);
    prng.sample_iter(dist).take(degree).collect()
}

/// Samples a ternary polynomial of `ctx`.
pub(crate) fn ternary_poly<R: RngCore>(
    prng: &mut R,
    degree: usize,
    ctx: &Arc<Context>,
) -> Result<Poly, CkksError> {
    Ok(signed_poly(&ternary(prng, degree), ctx)?)
}

/// Samples an error polynomial of `ctx` from the centered binomial distribution.
pub(crate) fn error_poly<R: RngCore + CryptoRng>(
    prng: &mut R,
    degree: usize,
    ctx: &Arc<Context>,
) -> Result<Poly, CkksError> {
    let coefficients = sample_vec_cbd(degree, ERROR_VARIANCE, prng)
        .map_err(|error| CkksError::Sampling(error.to_string()))?;
    Ok(signed_poly(&coefficients, ctx)?)
}

/// Samples a polynomial of `ctx` with uniformly random residues, directly in NTT form.
pub(crate) fn uniform_poly<R: RngCore + CryptoRng>(prng: &mut R, ctx: &Arc<Context>) -> Poly {
    Poly::random(ctx, Representation::Ntt, prng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ternary_range() {
        let mut prng = ChaCha20Rng::from_seed([3_u8; 32]);
        let coefficients = ternary(&mut prng, 4096);
        assert!(coefficients.iter().all(|c| (-1..=1).contains(c)));
        // all three values show up
        for v in -1..=1 {
            assert!(coefficients.contains(&v));
        }
    }

    #[test]
    fn test_error_moments() {
        let mut prng = ChaCha20Rng::from_seed([4_u8; 32]);
        let samples = sample_vec_cbd(1 << 16, ERROR_VARIANCE, &mut prng).unwrap();
        assert!(samples
            .iter()
            .all(|e| e.abs() <= 2 * ERROR_VARIANCE as i64));
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<i64>() as f64 / n;
        let variance = samples.iter().map(|e| (*e as f64 - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 0.1);
        assert!((variance - ERROR_VARIANCE as f64).abs() < 0.5);
    }
}
