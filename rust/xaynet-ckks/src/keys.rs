//! Key material and key generation.
//!
//! The private key `s` is a ternary polynomial. The public key is an encryption of zero
//! `(b, a) = (-a·s + e, a)` over the ciphertext modulus `Q`. The evaluation key holds one
//! encryption of `P·s²` per ciphertext prime over the extended modulus `Q·P`, where `P` is the
//! special prime. It allows relinearizing products of ciphertexts without the private key.

use std::{convert::TryInto, fmt, ops::Range};

use anyhow::{anyhow, Context};
use fhe_math::rq::{traits::TryConvertFrom, Poly, Representation};
use ndarray::Array2;
use tracing::debug;

use crate::{
    math::{
        sampling::{error_poly, secure_prng, ternary, uniform_poly},
        select_residues,
        signed_poly,
    },
    params::CkksContext,
    serialization::{
        polys_buffer_length,
        polys_from_bytes,
        polys_to_bytes,
        range,
        FromBytes,
        FromContextBytes,
        ToBytes,
    },
    CkksError,
    DecodeError,
};

#[derive(Clone, PartialEq, Eq)]
/// The private key.
pub struct SecretKey {
    coefficients: Vec<i64>,
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("degree", &self.coefficients.len())
            .finish()
    }
}

impl SecretKey {
    /// Gets the private key as a polynomial of the ciphertext primes up to `level`.
    pub(crate) fn poly(&self, context: &CkksContext, level: usize) -> Result<Poly, CkksError> {
        Ok(signed_poly(
            &self.coefficients,
            context.level_context(level),
        )?)
    }
}

const DEGREE_FIELD: Range<usize> = range(0, 4);

impl ToBytes for SecretKey {
    fn buffer_length(&self) -> usize {
        DEGREE_FIELD.end + self.coefficients.len()
    }

    fn to_bytes<T: AsMut<[u8]>>(&self, buffer: &mut T) {
        let buffer = buffer.as_mut();
        buffer[DEGREE_FIELD].copy_from_slice(&(self.coefficients.len() as u32).to_be_bytes());
        for (byte, c) in buffer[DEGREE_FIELD.end..]
            .iter_mut()
            .zip(&self.coefficients)
        {
            *byte = *c as i8 as u8;
        }
    }
}

impl FromBytes for SecretKey {
    fn from_bytes<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let buffer = buffer.as_ref();
        if buffer.len() < DEGREE_FIELD.end {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                buffer.len(),
                DEGREE_FIELD.end
            ));
        }
        // UNWRAP SAFE: the slice is exactly 4 bytes long
        let degree = u32::from_be_bytes(buffer[DEGREE_FIELD].try_into().unwrap()) as usize;
        let data = &buffer[DEGREE_FIELD.end..];
        if data.len() != degree {
            return Err(anyhow!(
                "invalid buffer length: expected {} coefficients but found {}",
                degree,
                data.len()
            ));
        }
        let coefficients = data
            .iter()
            .map(|byte| match *byte as i8 {
                c @ -1..=1 => Ok(c as i64),
                c => Err(anyhow!("invalid private key coefficient: {}", c)),
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { coefficients })
    }
}

impl FromContextBytes for SecretKey {
    fn from_context_bytes<T: AsRef<[u8]>>(
        buffer: &T,
        context: &CkksContext,
    ) -> Result<Self, DecodeError> {
        let key = Self::from_bytes(buffer)?;
        let degree = context.params().ring_degree();
        if key.coefficients.len() != degree {
            return Err(anyhow!(
                "private key has degree {} instead of {}",
                key.coefficients.len(),
                degree
            ));
        }
        Ok(key)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The public key.
pub struct PublicKey {
    b: Poly,
    a: Poly,
}

impl PublicKey {
    /// Gets the components `(b, a)` restricted to the ciphertext primes up to `level`.
    pub(crate) fn components(
        &self,
        context: &CkksContext,
        level: usize,
    ) -> Result<(Poly, Poly), CkksError> {
        let rows: Vec<usize> = (0..=level).collect();
        let ctx = context.level_context(level);
        Ok((
            select_residues(&self.b, &rows, ctx)?,
            select_residues(&self.a, &rows, ctx)?,
        ))
    }
}

impl ToBytes for PublicKey {
    fn buffer_length(&self) -> usize {
        polys_buffer_length(vec![&self.b, &self.a])
    }

    fn to_bytes<T: AsMut<[u8]>>(&self, buffer: &mut T) {
        polys_to_bytes(vec![&self.b, &self.a], buffer.as_mut());
    }
}

impl FromContextBytes for PublicKey {
    fn from_context_bytes<T: AsRef<[u8]>>(
        buffer: &T,
        context: &CkksContext,
    ) -> Result<Self, DecodeError> {
        let ctx = context.level_context(context.max_level());
        let degree = context.params().ring_degree();
        let mut polys = polys_from_bytes(buffer.as_ref(), 2, ctx, degree)
            .context("invalid public key")?
            .into_iter();
        match (polys.next(), polys.next()) {
            (Some(b), Some(a)) => Ok(Self { b, a }),
            _ => Err(anyhow!("missing public key components")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The evaluation key for relinearization.
pub struct EvaluationKey {
    /// One `(b_j, a_j)` pair per ciphertext prime `q_j`, over the whole chain including `P`.
    components: Vec<(Poly, Poly)>,
}

impl EvaluationKey {
    /// Gets the pair of the digit `j`, restricted to the primes of the extended ring at `level`.
    pub(crate) fn component(
        &self,
        context: &CkksContext,
        j: usize,
        level: usize,
    ) -> Result<(Poly, Poly), CkksError> {
        let (b, a) = &self.components[j];
        let rows = context.extended_indices(level);
        let ctx = context.extended_context(level);
        Ok((
            select_residues(b, &rows, ctx)?,
            select_residues(a, &rows, ctx)?,
        ))
    }

    fn polys(&self) -> impl Iterator<Item = &Poly> {
        self.components.iter().flat_map(|(b, a)| vec![b, a])
    }
}

const COMPONENTS_FIELD: Range<usize> = range(0, 4);

impl ToBytes for EvaluationKey {
    fn buffer_length(&self) -> usize {
        COMPONENTS_FIELD.end + polys_buffer_length(self.polys())
    }

    fn to_bytes<T: AsMut<[u8]>>(&self, buffer: &mut T) {
        let buffer = buffer.as_mut();
        buffer[COMPONENTS_FIELD].copy_from_slice(&(self.components.len() as u32).to_be_bytes());
        polys_to_bytes(self.polys(), &mut buffer[COMPONENTS_FIELD.end..]);
    }
}

impl FromContextBytes for EvaluationKey {
    fn from_context_bytes<T: AsRef<[u8]>>(
        buffer: &T,
        context: &CkksContext,
    ) -> Result<Self, DecodeError> {
        let buffer = buffer.as_ref();
        if buffer.len() < COMPONENTS_FIELD.end {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                buffer.len(),
                COMPONENTS_FIELD.end
            ));
        }
        // UNWRAP SAFE: the slice is exactly 4 bytes long
        let count = u32::from_be_bytes(buffer[COMPONENTS_FIELD].try_into().unwrap()) as usize;
        let expected = context.max_level() + 1;
        if count != expected {
            return Err(anyhow!(
                "evaluation key has {} components instead of {}",
                count,
                expected
            ));
        }
        let polys = polys_from_bytes(
            &buffer[COMPONENTS_FIELD.end..],
            2 * count,
            context.chain_context(),
            context.params().ring_degree(),
        )
        .context("invalid evaluation key")?;
        let mut polys = polys.into_iter();
        let mut components = Vec::with_capacity(count);
        while let (Some(b), Some(a)) = (polys.next(), polys.next()) {
            components.push((b, a));
        }
        Ok(Self { components })
    }
}

/// Generates a private key, a public key and an evaluation key for `context`.
///
/// # Errors
/// Fails if sampling or the polynomial arithmetic fails.
pub(crate) fn generate_keys(
    context: &CkksContext,
) -> Result<(SecretKey, PublicKey, EvaluationKey), CkksError> {
    let mut prng = secure_prng();
    let degree = context.params().ring_degree();
    let secret_key = SecretKey {
        coefficients: ternary(&mut prng, degree),
    };

    // b = -a·s + e over Q
    let ctx = context.level_context(context.max_level());
    let s = secret_key.poly(context, context.max_level())?;
    let a = uniform_poly(&mut prng, ctx);
    let b = &error_poly(&mut prng, degree, ctx)? - &(&a * &s);
    let public_key = PublicKey { b, a };
    debug!("generated the public key");

    // b_j = -a_j·s + e_j + P·s²·[j == i] over Q·P
    let ctx = context.chain_context();
    let s = signed_poly(&secret_key.coefficients, ctx)?;
    let s_squared = &s * &s;
    let moduli = context.moduli();
    let special = moduli[context.special_index()];
    let components = (0..=context.max_level())
        .map(|j| -> Result<(Poly, Poly), CkksError> {
            let a = uniform_poly(&mut prng, ctx);
            let mut b = &error_poly(&mut prng, degree, ctx)? - &(&a * &s);

            let q = moduli[j];
            let factor = (special % q) as u128;
            let residues = s_squared.coefficients();
            let gadget = Array2::from_shape_fn(residues.dim(), |(i, k)| {
                if i == j {
                    (residues[[i, k]] as u128 * factor % q as u128) as u64
                } else {
                    0
                }
            });
            b += &Poly::try_convert_from(gadget, ctx, false, Representation::Ntt)?;
            Ok((b, a))
        })
        .collect::<Result<Vec<_>, CkksError>>()?;
    let eval_key = EvaluationKey { components };
    debug!("generated the evaluation key");

    Ok((secret_key, public_key, eval_key))
}

#[cfg(test)]
mod tests {
    use num::bigint::BigUint;

    use super::*;
    use crate::{
        math::sampling::ERROR_VARIANCE,
        params::{CkksParameters, KeySetId},
    };

    fn context() -> CkksContext {
        CkksContext::new(CkksParameters::new(16, 30).unwrap(), KeySetId::generate()).unwrap()
    }

    /// Checks that `b + a·s` has small coefficients modulo the `modulus` of their ring.
    fn assert_small(b: &Poly, a: &Poly, s: &Poly, modulus: &BigUint) {
        let mut noise = &(a * s) + b;
        noise.change_representation(Representation::PowerBasis);
        let bound = BigUint::from(2 * ERROR_VARIANCE);
        for c in Vec::<BigUint>::from(&noise) {
            let centered = if c > (modulus >> 1_u32) {
                modulus - c
            } else {
                c
            };
            assert!(centered <= bound);
        }
    }

    #[test]
    fn test_public_key_is_encryption_of_zero() {
        let context = context();
        let (sk, pk, _) = generate_keys(&context).unwrap();
        let level = context.max_level();
        let s = sk.poly(&context, level).unwrap();
        assert_small(&pk.b, &pk.a, &s, &context.level_modulus(level));

        // the restriction to a lower level is an encryption of zero as well
        let (b, a) = pk.components(&context, 0).unwrap();
        let s = sk.poly(&context, 0).unwrap();
        assert_small(&b, &a, &s, &context.level_modulus(0));
    }

    #[test]
    fn test_evaluation_key_modulo_special_prime() {
        let context = context();
        let (sk, _, ek) = generate_keys(&context).unwrap();
        // modulo P the gadget vanishes and every component is an encryption of zero
        let special = context.special_index();
        let modulus = context.modulus(special);
        let ctx = std::sync::Arc::new(fhe_math::rq::Context::new(&[modulus], 32).unwrap());
        let s = signed_poly(&sk.coefficients, &ctx).unwrap();
        for (b, a) in ek.components.iter() {
            let b = select_residues(b, &[special], &ctx).unwrap();
            let a = select_residues(a, &[special], &ctx).unwrap();
            assert_small(&b, &a, &s, &BigUint::from(modulus));
        }
    }

    #[test]
    fn test_secret_key_bytes() {
        let context = context();
        let (sk, _, _) = generate_keys(&context).unwrap();
        let bytes = sk.to_vec();
        assert_eq!(bytes.len(), 4 + 32);
        assert_eq!(SecretKey::from_bytes(&bytes).unwrap(), sk);
        assert_eq!(SecretKey::from_context_bytes(&bytes, &context).unwrap(), sk);

        let mut invalid = bytes.clone();
        invalid[4] = 2;
        assert!(SecretKey::from_bytes(&invalid).is_err());
        assert!(SecretKey::from_bytes(&&bytes[..bytes.len() - 1]).is_err());

        let other = CkksContext::new(CkksParameters::new(8, 30).unwrap(), context.key_set());
        assert!(SecretKey::from_context_bytes(&bytes, &other.unwrap()).is_err());
    }

    #[test]
    fn test_key_bytes() {
        let context = context();
        let (_, pk, ek) = generate_keys(&context).unwrap();
        assert_eq!(
            PublicKey::from_context_bytes(&pk.to_vec(), &context).unwrap(),
            pk
        );
        assert_eq!(
            EvaluationKey::from_context_bytes(&ek.to_vec(), &context).unwrap(),
            ek
        );
        let bytes = pk.to_vec();
        assert!(PublicKey::from_context_bytes(&&bytes[..bytes.len() / 2], &context).is_err());

        // an evaluation key with a missing component
        let mut bytes = ek.to_vec();
        bytes[COMPONENTS_FIELD].copy_from_slice(&2_u32.to_be_bytes());
        assert!(EvaluationKey::from_context_bytes(&bytes, &context).is_err());
    }
}
