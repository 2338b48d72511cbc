//! Scheme parameters and the crypto context derived from them.
//!
//! See the [crate] documentation for an overview of the parameters.

use std::{convert::TryFrom, fmt, sync::Arc};

use anyhow::{anyhow, Context};
use derive_more::{AsRef, From};
use fhe_math::{rq, zq::primes::generate_prime};
use num::bigint::BigUint;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    encoding::Encoder,
    math::sampling::secure_prng,
    serialization::{encode_artifact, split_artifact, ArtifactKind, FromBytes, Header, Moduli},
    CkksError,
    DecodeError,
};

/// The minimal number of slots of a ciphertext.
pub const MIN_BATCH_SIZE: u32 = 4;
/// The maximal number of slots of a ciphertext.
pub const MAX_BATCH_SIZE: u32 = 1 << 16;
/// The minimal precision of the fixed-point encoding.
pub const MIN_SCALING_FACTOR_BITS: u32 = 20;
/// The maximal precision of the fixed-point encoding.
pub const MAX_SCALING_FACTOR_BITS: u32 = 50;
/// The number of rescaling primes, i.e. the number of sequential multiplications a fresh
/// ciphertext supports.
pub const MULTIPLICATIVE_DEPTH: usize = 2;

/// Bits of the first prime on top of the scaling factor bits, which bound the plaintext values.
const BASE_MODULUS_EXTRA_BITS: u32 = 20;
const BASE_MODULUS_MAX_BITS: u32 = 60;
const SPECIAL_MODULUS_BITS: u32 = 61;
/// Plaintext values must stay this many bits below the base modulus.
const VALUE_HEADROOM_BITS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// The parameters that determine a CKKS instantiation.
pub struct CkksParameters {
    batch_size: u32,
    scaling_factor_bits: u32,
}

impl CkksParameters {
    /// Creates validated parameters.
    ///
    /// # Errors
    /// Fails if `batch_size` is not a power of two within [`MIN_BATCH_SIZE`] and
    /// [`MAX_BATCH_SIZE`], if `scaling_factor_bits` is not within [`MIN_SCALING_FACTOR_BITS`]
    /// and [`MAX_SCALING_FACTOR_BITS`] or if there are not enough NTT friendly primes of
    /// `scaling_factor_bits` bits for the ring degree. The latter happens for large batch sizes
    /// with small scaling factors, e.g. `(65536, 20)`.
    pub fn new(batch_size: u32, scaling_factor_bits: u32) -> Result<Self, CkksError> {
        if !batch_size.is_power_of_two()
            || !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch_size)
        {
            return Err(CkksError::InvalidParameters(format!(
                "batch size must be a power of two between {} and {}, got {}",
                MIN_BATCH_SIZE, MAX_BATCH_SIZE, batch_size
            )));
        }
        if !(MIN_SCALING_FACTOR_BITS..=MAX_SCALING_FACTOR_BITS).contains(&scaling_factor_bits) {
            return Err(CkksError::InvalidParameters(format!(
                "scaling factor bits must be between {} and {}, got {}",
                MIN_SCALING_FACTOR_BITS, MAX_SCALING_FACTOR_BITS, scaling_factor_bits
            )));
        }
        let params = Self {
            batch_size,
            scaling_factor_bits,
        };
        params.modulus_chain()?;
        Ok(params)
    }

    /// Gets the number of slots of a ciphertext.
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Gets the precision of the fixed-point encoding.
    pub fn scaling_factor_bits(&self) -> u32 {
        self.scaling_factor_bits
    }

    /// Gets the degree `N` of the polynomial ring.
    pub fn ring_degree(&self) -> usize {
        2 * self.batch_size as usize
    }

    /// Gets the scale `Δ` of fresh ciphertexts.
    pub fn scale(&self) -> f64 {
        2_f64.powi(self.scaling_factor_bits as i32)
    }

    fn base_modulus_bits(&self) -> u32 {
        (self.scaling_factor_bits + BASE_MODULUS_EXTRA_BITS).min(BASE_MODULUS_MAX_BITS)
    }

    /// Gets the bound on the absolute plaintext values.
    pub fn max_abs_value(&self) -> f64 {
        let bits = self.base_modulus_bits() - self.scaling_factor_bits - VALUE_HEADROOM_BITS;
        2_f64.powi(bits as i32)
    }

    /// Derives the modulus chain `q_0, ..., q_L, P`.
    ///
    /// Every prime is the largest one below the previous prime of the same size which is
    /// congruent to `1 mod 2N`.
    fn modulus_chain(&self) -> Result<Vec<u64>, CkksError> {
        let modulo = 2 * self.ring_degree() as u64;
        let prime = |bits: u32, upper_bound: u64| {
            generate_prime(bits as usize, modulo, upper_bound).ok_or_else(|| {
                CkksError::InvalidParameters(format!(
                    "not enough NTT friendly primes of {} bits for {}",
                    bits, self
                ))
            })
        };

        let base_bits = self.base_modulus_bits();
        let mut moduli = vec![prime(base_bits, 1 << base_bits)?];
        let mut upper_bound = 1 << self.scaling_factor_bits;
        for _ in 0..MULTIPLICATIVE_DEPTH {
            let q = prime(self.scaling_factor_bits, upper_bound)?;
            moduli.push(q);
            upper_bound = q - 1;
        }
        moduli.push(prime(SPECIAL_MODULUS_BITS, 1 << SPECIAL_MODULUS_BITS)?);
        Ok(moduli)
    }
}

impl fmt::Display for CkksParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch size {}, scaling factor bits {}",
            self.batch_size, self.scaling_factor_bits
        )
    }
}

#[derive(AsRef, From, Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// A random identifier shared by all artifacts of one key generation.
pub struct KeySetId([u8; KeySetId::LENGTH]);

impl KeySetId {
    /// Length in bytes of a key set identifier.
    pub const LENGTH: usize = 16;

    /// Generates a random identifier.
    pub fn generate() -> Self {
        let mut bytes = [0_u8; Self::LENGTH];
        secure_prng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Creates an identifier from the given buffer.
    ///
    /// Returns `None` if the length of the slice isn't [`KeySetId::LENGTH`].
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; Self::LENGTH]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for KeySetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|b| write!(f, "{:02x}", b))
    }
}

/// Length in bytes of a context fingerprint.
pub(crate) const FINGERPRINT_LENGTH: usize = 32;

/// The scheme-wide state shared by all parties of a federation: the parameters, the modulus
/// chain with its polynomial rings and the identifier of the key set.
///
/// A context is immutable once created.
pub struct CkksContext {
    params: CkksParameters,
    /// The ciphertext primes `q_0, ..., q_L` followed by the special prime `P`.
    moduli: Vec<u64>,
    /// The rings of the ciphertext primes `q_0, ..., q_l`, indexed by the level `l`.
    levels: Vec<Arc<rq::Context>>,
    /// The rings of the primes `q_0, ..., q_l, P`, indexed by the level `l`.
    extended: Vec<Arc<rq::Context>>,
    encoder: Encoder,
    fingerprint: [u8; FINGERPRINT_LENGTH],
    key_set: KeySetId,
}

impl fmt::Debug for CkksContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CkksContext")
            .field("params", &self.params)
            .field("moduli", &self.moduli)
            .field("key_set", &self.key_set)
            .finish()
    }
}

impl CkksContext {
    /// Derives the context for `params`. The modulus chain only depends on the parameters.
    ///
    /// # Errors
    /// Fails if not enough NTT-friendly primes exist for the parameters.
    pub fn new(params: CkksParameters, key_set: KeySetId) -> Result<Self, CkksError> {
        let degree = params.ring_degree();
        let moduli = params.modulus_chain()?;
        let special = moduli[MULTIPLICATIVE_DEPTH + 1];

        let mut levels = Vec::with_capacity(MULTIPLICATIVE_DEPTH + 1);
        let mut extended = Vec::with_capacity(MULTIPLICATIVE_DEPTH + 1);
        for level in 0..=MULTIPLICATIVE_DEPTH {
            let primes = &moduli[..=level];
            levels.push(Arc::new(rq::Context::new(primes, degree)?));
            let extended_primes: Vec<u64> = primes.iter().copied().chain(Some(special)).collect();
            extended.push(Arc::new(rq::Context::new(&extended_primes, degree)?));
        }

        Ok(Self {
            params,
            fingerprint: fingerprint(&params, &moduli),
            encoder: Encoder::new(params.batch_size() as usize),
            moduli,
            levels,
            extended,
            key_set,
        })
    }

    pub fn params(&self) -> &CkksParameters {
        &self.params
    }

    pub fn key_set(&self) -> KeySetId {
        self.key_set
    }

    /// Gets the SHA-256 digest of the parameters and the modulus chain.
    pub fn fingerprint(&self) -> &[u8; FINGERPRINT_LENGTH] {
        &self.fingerprint
    }

    /// Gets the ciphertext primes followed by the special prime.
    pub fn moduli(&self) -> &[u64] {
        &self.moduli
    }

    /// Gets the level of fresh ciphertexts, i.e. the index of their last prime.
    pub fn max_level(&self) -> usize {
        MULTIPLICATIVE_DEPTH
    }

    pub(crate) fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Gets the prime at `index` of the chain.
    pub(crate) fn modulus(&self, index: usize) -> u64 {
        self.moduli[index]
    }

    /// Gets the ring of the ciphertext primes `q_0, ..., q_level`.
    pub(crate) fn level_context(&self, level: usize) -> &Arc<rq::Context> {
        &self.levels[level]
    }

    /// Gets the ring of the ciphertext primes `q_0, ..., q_level` and the special prime.
    pub(crate) fn extended_context(&self, level: usize) -> &Arc<rq::Context> {
        &self.extended[level]
    }

    /// Gets the ring of the whole chain.
    pub(crate) fn chain_context(&self) -> &Arc<rq::Context> {
        self.extended_context(self.max_level())
    }

    /// Gets the indices of the primes of [`extended_context()`] within the chain.
    ///
    /// [`extended_context()`]: CkksContext::extended_context
    pub(crate) fn extended_indices(&self, level: usize) -> Vec<usize> {
        (0..=level).chain(Some(self.special_index())).collect()
    }

    pub(crate) fn special_index(&self) -> usize {
        self.moduli.len() - 1
    }

    /// Gets the product of the ciphertext primes up to `level`.
    pub(crate) fn level_modulus(&self, level: usize) -> BigUint {
        self.moduli[..=level].iter().map(|q| BigUint::from(*q)).product()
    }

    /// Checks whether the `fingerprint` and the `key_set` describe this context.
    pub fn is_compatible(&self, fingerprint: &[u8], key_set: KeySetId) -> bool {
        self.fingerprint[..] == *fingerprint && self.key_set == key_set
    }

    /// Serializes the context into an artifact.
    pub fn serialize(&self) -> Vec<u8> {
        encode_artifact(
            &Header::new(ArtifactKind::Context, self),
            &Moduli(self.moduli.clone()),
        )
    }

    /// Deserializes a context artifact.
    ///
    /// The modulus chain is derived again from the parameters in the header and must match the
    /// serialized one.
    ///
    /// # Errors
    /// Fails if the bytes are not a valid context artifact.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (header, payload) = split_artifact(bytes)?;
        let moduli = Moduli::from_bytes(&payload).context("invalid context payload")?;
        let context =
            Self::new(header.params, header.key_set).context("invalid context parameters")?;
        if moduli.0 != context.moduli {
            return Err(anyhow!("modulus chain doesn't match the parameters"));
        }
        header.check(ArtifactKind::Context, &context)?;
        Ok(context)
    }
}

fn fingerprint(params: &CkksParameters, moduli: &[u64]) -> [u8; FINGERPRINT_LENGTH] {
    let mut hasher = Sha256::new();
    hasher.update(b"xaynet-ckks");
    hasher.update(params.batch_size().to_be_bytes());
    hasher.update(params.scaling_factor_bits().to_be_bytes());
    hasher.update((params.ring_degree() as u64).to_be_bytes());
    for q in moduli {
        hasher.update(q.to_be_bytes());
    }
    let mut digest = [0_u8; FINGERPRINT_LENGTH];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

#[cfg(test)]
mod tests {
    use fhe_util::is_prime;

    use super::*;

    #[test]
    fn test_parameters_validation() {
        assert!(CkksParameters::new(8192, 40).is_ok());
        assert!(CkksParameters::new(4, 20).is_ok());
        assert!(CkksParameters::new(2, 40).is_err());
        assert!(CkksParameters::new(6, 40).is_err());
        assert!(CkksParameters::new(1, 40).is_err());
        assert!(CkksParameters::new(1 << 17, 40).is_err());
        assert!(CkksParameters::new(8192, 19).is_err());
        assert!(CkksParameters::new(8192, 51).is_err());
    }

    #[test]
    fn test_parameters_without_enough_primes() {
        // a single 20 bit prime is congruent to 1 mod 2^18, but the chain needs two
        for bits in [20, 21, 22].iter() {
            assert!(matches!(
                CkksParameters::new(1 << 16, *bits),
                Err(CkksError::InvalidParameters(_))
            ));
        }
        assert!(CkksParameters::new(1 << 16, 25).is_ok());
        assert!(CkksParameters::new(1 << 15, 20).is_err());
        assert!(CkksParameters::new(1 << 12, 20).is_ok());
    }

    #[test]
    fn test_modulus_chain() {
        let params = CkksParameters::new(16, 40).unwrap();
        let context = CkksContext::new(params, KeySetId::generate()).unwrap();
        let moduli = context.moduli();
        assert_eq!(moduli.len(), MULTIPLICATIVE_DEPTH + 2);
        assert_eq!(context.max_level(), MULTIPLICATIVE_DEPTH);
        for (i, q) in moduli.iter().enumerate() {
            assert!(is_prime(*q));
            assert_eq!(q % 64, 1);
            assert!(moduli[..i].iter().all(|p| p != q));
        }
        assert_eq!(64 - moduli[0].leading_zeros(), 60);
        assert_eq!(64 - moduli[1].leading_zeros(), 40);
        assert_eq!(64 - moduli[2].leading_zeros(), 40);
        assert_eq!(64 - moduli[3].leading_zeros(), 61);
        assert_eq!(params.max_abs_value(), 2_f64.powi(18));

        assert_eq!(context.level_context(1).moduli(), &moduli[..2]);
        assert_eq!(
            context.extended_context(0).moduli(),
            &[moduli[0], moduli[3]][..]
        );
        assert_eq!(context.chain_context().moduli(), moduli);
        assert_eq!(context.extended_indices(1), vec![0, 1, 3]);
        assert_eq!(
            context.level_modulus(1),
            BigUint::from(moduli[0]) * moduli[1]
        );
    }

    #[test]
    fn test_fingerprint_depends_on_parameters_only() {
        let params = CkksParameters::new(16, 40).unwrap();
        let a = CkksContext::new(params, KeySetId::generate()).unwrap();
        let b = CkksContext::new(params, KeySetId::generate()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.moduli(), b.moduli());
        assert!(!a.is_compatible(b.fingerprint(), b.key_set()));
        assert!(a.is_compatible(b.fingerprint(), a.key_set()));

        let other = CkksContext::new(CkksParameters::new(16, 30).unwrap(), a.key_set()).unwrap();
        assert_ne!(a.fingerprint(), other.fingerprint());
    }

    #[test]
    fn test_context_bytes() {
        let params = CkksParameters::new(8, 40).unwrap();
        let context = CkksContext::new(params, KeySetId::generate()).unwrap();
        let bytes = context.serialize();
        let loaded = CkksContext::deserialize(&bytes).unwrap();
        assert_eq!(loaded.params(), context.params());
        assert_eq!(loaded.moduli(), context.moduli());
        assert_eq!(loaded.key_set(), context.key_set());

        // a tampered modulus chain
        let mut tampered = bytes.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 1;
        assert!(CkksContext::deserialize(&tampered).is_err());
        assert!(CkksContext::deserialize(&bytes[..bytes.len() - 8]).is_err());
    }
}
