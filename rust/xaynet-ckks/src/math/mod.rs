//! The polynomial arithmetic of the scheme on top of [`fhe_math`].
//!
//! Every polynomial of the crate is a [`Poly`] of `Z_Q[X]/(X^N + 1)` in NTT representation,
//! where `Q` is a product of primes of the modulus chain. The [`Context`] of a polynomial
//! determines its primes. The helpers below move residues between the contexts of a chain.

pub(crate) mod sampling;

use std::sync::Arc;

use fhe_math::rq::{traits::TryConvertFrom, Context, Poly, Representation};
use ndarray::{Array2, Axis};

/// Reduces a signed value into `[0, q)`.
#[inline]
pub(crate) fn reduce_signed(value: i64, q: u64) -> u64 {
    (value as i128).rem_euclid(q as i128) as u64
}

/// Maps `x` from `[0, p)` to its centered representative in `(-p/2, p/2]` and reduces that
/// one modulo `q`.
#[inline]
pub(crate) fn centered_mod(x: u64, p: u64, q: u64) -> u64 {
    if x > p / 2 {
        // x - p is negative
        let r = (p - x) % q;
        if r == 0 {
            0
        } else {
            q - r
        }
    } else {
        x % q
    }
}

/// Gets the number of primes of a polynomial.
pub(crate) fn num_moduli(poly: &Poly) -> usize {
    poly.coefficients().nrows()
}

/// Creates a polynomial in NTT representation from signed coefficients.
pub(crate) fn signed_poly(
    coefficients: &[i64],
    ctx: &Arc<Context>,
) -> Result<Poly, fhe_math::Error> {
    let moduli = ctx.moduli();
    let residues = Array2::from_shape_fn((moduli.len(), coefficients.len()), |(i, k)| {
        reduce_signed(coefficients[k], moduli[i])
    });
    let mut poly = Poly::try_convert_from(residues, ctx, false, Representation::PowerBasis)?;
    poly.change_representation(Representation::Ntt);
    Ok(poly)
}

/// Creates the constant polynomial `value` in NTT representation.
pub(crate) fn constant_poly(
    value: u64,
    degree: usize,
    ctx: &Arc<Context>,
) -> Result<Poly, fhe_math::Error> {
    let moduli = ctx.moduli();
    let residues = Array2::from_shape_fn((moduli.len(), degree), |(i, k)| {
        if k == 0 {
            value % moduli[i]
        } else {
            0
        }
    });
    let mut poly = Poly::try_convert_from(residues, ctx, false, Representation::PowerBasis)?;
    poly.change_representation(Representation::Ntt);
    Ok(poly)
}

/// Creates a polynomial of `ctx` from the residues at `rows` of `poly`.
///
/// Both polynomials are in NTT representation, which is computed per prime. Hence the selected
/// residues are valid for `ctx` if its primes are the ones at `rows`, in the same order.
pub(crate) fn select_residues(
    poly: &Poly,
    rows: &[usize],
    ctx: &Arc<Context>,
) -> Result<Poly, fhe_math::Error> {
    debug_assert_eq!(*poly.representation(), Representation::Ntt);
    let residues = poly.coefficients().select(Axis(0), rows);
    Poly::try_convert_from(residues, ctx, false, Representation::Ntt)
}

/// Divides by the last prime with rounding and drops its residue.
pub(crate) fn divide_and_round_by_last(poly: &mut Poly) -> Result<(), fhe_math::Error> {
    poly.change_representation(Representation::PowerBasis);
    poly.mod_switch_down_next()?;
    poly.change_representation(Representation::Ntt);
    Ok(())
}

#[cfg(test)]
mod tests {
    use num::bigint::BigUint;

    use super::*;

    const MODULI: [u64; 2] = [1_032_193, 786_433];

    fn contexts() -> (Arc<Context>, Arc<Context>) {
        (
            Arc::new(Context::new(&MODULI, 8).unwrap()),
            Arc::new(Context::new(&MODULI[..1], 8).unwrap()),
        )
    }

    fn lift(poly: &Poly) -> Vec<BigUint> {
        let mut poly = poly.clone();
        poly.change_representation(Representation::PowerBasis);
        Vec::from(&poly)
    }

    #[test]
    fn test_centered_mod() {
        let (p, q) = (97, 13);
        assert_eq!(centered_mod(3, p, q), 3);
        // 95 ~ -2
        assert_eq!(centered_mod(95, p, q), 11);
        assert_eq!(centered_mod(97 - 13, p, q), 0);
        assert_eq!(reduce_signed(-2, q), 11);
    }

    #[test]
    fn test_signed_poly() {
        let (ctx, _) = contexts();
        let poly = signed_poly(&[-3, 0, 7, -1, 1, 2, -2, 5], &ctx).unwrap();
        assert_eq!(num_moduli(&poly), 2);
        let q: u64 = MODULI.iter().product();
        let expected: Vec<BigUint> = [q - 3, 0, 7, q - 1, 1, 2, q - 2, 5]
            .iter()
            .map(|c| BigUint::from(*c))
            .collect();
        assert_eq!(lift(&poly), expected);
    }

    #[test]
    fn test_mul_by_x() {
        let (ctx, _) = contexts();
        let x = signed_poly(&[0, 1, 0, 0, 0, 0, 0, 0], &ctx).unwrap();
        let a = signed_poly(&[1, 2, 3, 4, 5, 6, 7, 8], &ctx).unwrap();
        // X * (1 + 2X + ... + 8X^7) = -8 + X + 2X^2 + ... + 7X^7
        let expected = signed_poly(&[-8, 1, 2, 3, 4, 5, 6, 7], &ctx).unwrap();
        assert_eq!(&a * &x, expected);

        let three = constant_poly(3, 8, &ctx).unwrap();
        let tripled = signed_poly(&[3, 6, 9, 12, 15, 18, 21, 24], &ctx).unwrap();
        assert_eq!(&a * &three, tripled);
    }

    #[test]
    fn test_select_residues() {
        let (ctx, lower) = contexts();
        let poly = signed_poly(&[1, -2, 3, 0, 0, 0, 5, -7], &ctx).unwrap();
        let selected = select_residues(&poly, &[0], &lower).unwrap();
        assert_eq!(selected, signed_poly(&[1, -2, 3, 0, 0, 0, 5, -7], &lower).unwrap());
    }

    #[test]
    fn test_divide_and_round_by_last() {
        let (ctx, lower) = contexts();
        let q = MODULI[1] as i64;
        let coefficients = [7 * q, -3 * q, q + 2, -(q / 2) + 1, 0, 5 * q - 1, 0, 0];
        let mut poly = signed_poly(&coefficients, &ctx).unwrap();
        divide_and_round_by_last(&mut poly).unwrap();
        assert_eq!(num_moduli(&poly), 1);
        let expected = signed_poly(&[7, -3, 1, 0, 0, 5, 0, 0], &lower).unwrap();
        assert_eq!(poly, expected);
    }
}
