//! Homomorphic evaluation on ciphertexts.
//!
//! The [`HomomorphicAggregator`] computes weighted averages of ciphertexts. It only depends on
//! the context and the evaluation key, the private key is never required.
//!
//! # Weighted averages
//! The weights are normalized by their sum. Each normalized weight `w_i` is encoded as the
//! integer `round(w_i · q_l)`, where `q_l` is the last prime of the common level `l` of the
//! inputs. Multiplying a ciphertext by that integer raises its scale by `q_l`, hence a single
//! rescaling of the sum of the scaled ciphertexts restores the scale of the inputs while
//! consuming one level.

use fhe_math::rq::{traits::TryConvertFrom, Poly, Representation};
use ndarray::Array2;
use rayon::prelude::*;
use tracing::debug;

use crate::{
    ciphertext::Ciphertext,
    keys::EvaluationKey,
    manager::CryptoContextManager,
    math::{centered_mod, constant_poly, divide_and_round_by_last},
    params::CkksContext,
    CkksError,
};

/// The relative tolerance for scales to be considered equal.
const SCALE_TOLERANCE: f64 = 1e-9;

/// Combines ciphertexts without decrypting them.
#[derive(Debug, Clone, Copy)]
pub struct HomomorphicAggregator<'a> {
    context: &'a CkksContext,
    eval_key: &'a EvaluationKey,
}

impl<'a> HomomorphicAggregator<'a> {
    /// Creates an aggregator from the context and the evaluation key of `manager`.
    ///
    /// # Errors
    /// Fails with [`CkksError::KeyNotLoaded`] if the context or the evaluation key is missing.
    pub fn new(manager: &'a CryptoContextManager) -> Result<Self, CkksError> {
        Ok(Self {
            context: manager.context()?,
            eval_key: manager.eval_key()?,
        })
    }

    /// Computes the weighted average of serialized ciphertexts.
    ///
    /// # Errors
    /// See [`weighted_average()`]. Additionally fails with [`CkksError::InvalidInput`] if a
    /// ciphertext doesn't belong to the context.
    ///
    /// [`weighted_average()`]: HomomorphicAggregator::weighted_average
    pub fn compute_weighted_average<T: AsRef<[u8]>>(
        &self,
        ciphertexts: &[T],
        weights: &[f64],
    ) -> Result<Vec<u8>, CkksError> {
        check_lengths(ciphertexts.len(), weights.len())?;
        let ciphertexts = ciphertexts
            .iter()
            .map(|bytes| Ciphertext::deserialize(bytes.as_ref(), self.context))
            .collect::<Result<Vec<_>, _>>()?;
        self.weighted_average(&ciphertexts, weights)
            .map(|average| average.serialize(self.context))
    }

    /// Computes `Σ w_i · c_i / Σ w_i` for the ciphertexts `c_i` and the weights `w_i`.
    ///
    /// The result is one level below the lowest input level and has the scale of the inputs.
    /// The inputs are left untouched.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidInput`] if:
    /// - there are no ciphertexts or the numbers of ciphertexts and weights differ,
    /// - a weight is negative or not finite or the weights sum up to zero,
    /// - the scales of the ciphertexts differ,
    /// - a ciphertext is at level zero and can't be rescaled anymore.
    pub fn weighted_average(
        &self,
        ciphertexts: &[Ciphertext],
        weights: &[f64],
    ) -> Result<Ciphertext, CkksError> {
        check_lengths(ciphertexts.len(), weights.len())?;
        let fractions = validate_weights(weights)?;
        let (level, scale) = common_level_and_scale(ciphertexts.iter())?;
        if level == 0 {
            return Err(CkksError::InvalidInput(
                "a ciphertext at level 0 can't be rescaled".to_string(),
            ));
        }

        let q = self.context.modulus(level);
        let ctx = self.context.level_context(level);
        let degree = self.context.params().ring_degree();
        let scaled = ciphertexts
            .par_iter()
            .zip(fractions.par_iter())
            .map(|(ciphertext, fraction)| -> Result<Ciphertext, CkksError> {
                let factor = constant_poly((fraction * q as f64).round() as u64, degree, ctx)?;
                let mut scaled = ciphertext.clone();
                scaled.drop_to_level(self.context, level)?;
                scaled.c0 *= &factor;
                scaled.c1 *= &factor;
                Ok(scaled)
            })
            .collect::<Result<Vec<Ciphertext>, CkksError>>()?;

        let mut sum = Ciphertext {
            c0: Poly::zero(ctx, Representation::Ntt),
            c1: Poly::zero(ctx, Representation::Ntt),
            scale: scale * q as f64,
        };
        for ciphertext in scaled.iter() {
            sum.c0 += &ciphertext.c0;
            sum.c1 += &ciphertext.c1;
        }
        let mut average = self.rescale(&sum)?;
        average.scale = scale;

        debug!(
            "averaged {} ciphertexts at level {}",
            ciphertexts.len(),
            level
        );
        Ok(average)
    }

    /// Adds two ciphertexts of equal scale at their common level.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidInput`] if the scales differ.
    pub fn add(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext, CkksError> {
        let (level, scale) = common_level_and_scale(vec![lhs, rhs])?;
        let mut sum = lhs.clone();
        sum.drop_to_level(self.context, level)?;
        let mut rhs = rhs.clone();
        rhs.drop_to_level(self.context, level)?;
        sum.c0 += &rhs.c0;
        sum.c1 += &rhs.c1;
        sum.scale = scale;
        Ok(sum)
    }

    /// Multiplies the encrypted values by the non-negative integer `factor`.
    ///
    /// # Errors
    /// Fails if the polynomial arithmetic fails.
    pub fn multiply_plain_integer(
        &self,
        ciphertext: &Ciphertext,
        factor: u64,
    ) -> Result<Ciphertext, CkksError> {
        let ctx = self.context.level_context(ciphertext.level());
        let factor = constant_poly(factor, self.context.params().ring_degree(), ctx)?;
        let mut product = ciphertext.clone();
        product.c0 *= &factor;
        product.c1 *= &factor;
        Ok(product)
    }

    /// Divides the ciphertext by its last prime, which divides the scale accordingly and
    /// consumes one level.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidInput`] if the ciphertext is at level zero.
    pub fn rescale(&self, ciphertext: &Ciphertext) -> Result<Ciphertext, CkksError> {
        let level = ciphertext.level();
        if level == 0 {
            return Err(CkksError::InvalidInput(
                "a ciphertext at level 0 can't be rescaled".to_string(),
            ));
        }
        let mut rescaled = ciphertext.clone();
        divide_and_round_by_last(&mut rescaled.c0)?;
        divide_and_round_by_last(&mut rescaled.c1)?;
        rescaled.scale /= self.context.modulus(level) as f64;
        Ok(rescaled)
    }

    /// Multiplies two ciphertexts, relinearizes the product with the evaluation key and
    /// rescales it.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidInput`] if a ciphertext is at level zero.
    pub fn multiply(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext, CkksError> {
        let level = lhs.level().min(rhs.level());
        if level == 0 {
            return Err(CkksError::InvalidInput(
                "a ciphertext at level 0 can't be multiplied".to_string(),
            ));
        }
        let (mut lhs, mut rhs) = (lhs.clone(), rhs.clone());
        lhs.drop_to_level(self.context, level)?;
        rhs.drop_to_level(self.context, level)?;

        // (d0, d1, d2) = (a0·b0, a0·b1 + a1·b0, a1·b1)
        let d0 = &lhs.c0 * &rhs.c0;
        let mut d1 = &lhs.c0 * &rhs.c1;
        d1 += &(&lhs.c1 * &rhs.c0);
        let d2 = &lhs.c1 * &rhs.c1;

        let (mut c0, mut c1) = self.relinearize(&d2, level)?;
        c0 += &d0;
        c1 += &d1;
        let product = Ciphertext {
            c0,
            c1,
            scale: lhs.scale * rhs.scale,
        };
        self.rescale(&product)
    }

    /// Turns the quadratic component `d2` of a product into a pair `(c0, c1)` with
    /// `c0 + c1·s ≈ d2·s²`.
    fn relinearize(&self, d2: &Poly, level: usize) -> Result<(Poly, Poly), CkksError> {
        let extended = self.context.extended_context(level);
        let targets = extended.moduli();
        let mut d2 = d2.clone();
        d2.change_representation(Representation::PowerBasis);
        let residues = d2.coefficients();

        let mut acc0 = Poly::zero(extended, Representation::Ntt);
        let mut acc1 = Poly::zero(extended, Representation::Ntt);
        for (j, q) in self.context.level_context(level).moduli().iter().enumerate() {
            // the centered residues of d2 modulo q_j, lifted to every prime of Q·P
            let digit = Array2::from_shape_fn((targets.len(), residues.ncols()), |(i, k)| {
                centered_mod(residues[[j, k]], *q, targets[i])
            });
            let mut digit =
                Poly::try_convert_from(digit, extended, false, Representation::PowerBasis)?;
            digit.change_representation(Representation::Ntt);
            let (b, a) = self.eval_key.component(self.context, j, level)?;
            acc0 += &(&digit * &b);
            acc1 += &(&digit * &a);
        }

        // divide by the special prime
        divide_and_round_by_last(&mut acc0)?;
        divide_and_round_by_last(&mut acc1)?;
        Ok((acc0, acc1))
    }
}

/// Gets the lowest level and the common scale of the ciphertexts.
fn common_level_and_scale<'c>(
    ciphertexts: impl IntoIterator<Item = &'c Ciphertext>,
) -> Result<(usize, f64), CkksError> {
    let mut ciphertexts = ciphertexts.into_iter();
    let first = ciphertexts
        .next()
        .ok_or_else(|| CkksError::InvalidInput("no ciphertexts".to_string()))?;
    let (mut level, scale) = (first.level(), first.scale);
    for ciphertext in ciphertexts {
        if (ciphertext.scale - scale).abs() > SCALE_TOLERANCE * scale {
            return Err(CkksError::InvalidInput(format!(
                "ciphertexts have different scales: {} and {}",
                scale, ciphertext.scale
            )));
        }
        level = level.min(ciphertext.level());
    }
    Ok((level, scale))
}

fn check_lengths(ciphertexts: usize, weights: usize) -> Result<(), CkksError> {
    if ciphertexts == 0 {
        return Err(CkksError::InvalidInput("no ciphertexts".to_string()));
    }
    if ciphertexts != weights {
        return Err(CkksError::InvalidInput(format!(
            "{} ciphertexts but {} weights",
            ciphertexts, weights
        )));
    }
    Ok(())
}

/// Checks that the weights are finite and non-negative and normalizes them by their sum.
///
/// The weights are divided by the largest one before summing, so the sum doesn't overflow
/// for weights close to `f64::MAX`.
///
/// # Errors
/// Fails with [`CkksError::InvalidInput`] if a weight is invalid or if all weights are zero.
pub fn validate_weights(weights: &[f64]) -> Result<Vec<f64>, CkksError> {
    if let Some((index, weight)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !w.is_finite() || **w < 0.)
    {
        return Err(CkksError::InvalidInput(format!(
            "weight {} at index {} is negative or not finite",
            weight, index
        )));
    }
    let max = weights.iter().copied().fold(0., f64::max);
    if !(max > 0.) {
        return Err(CkksError::InvalidInput(
            "the weights sum up to zero".to_string(),
        ));
    }
    let total: f64 = weights.iter().map(|w| w / max).sum();
    Ok(weights.iter().map(|w| w / max / total).collect())
}
