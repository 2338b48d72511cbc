#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/xaynetwork/xaynet/master/assets/logo.png",
    issue_tracker_base_url = "https://github.com/xaynetwork/xaynet/issues"
)]
//! CKKS homomorphic encryption for the weighted aggregation of federated models.
//!
//! Learners encrypt their local models with a public key, an aggregator combines the
//! ciphertexts into their weighted average without ever decrypting them, and a party holding
//! the private key decrypts the aggregate into the new global model.
//!
//! # Parameters
//! A scheme instantiation is determined by two numbers:
//! - the `batch_size`, the number of real values packed into one ciphertext. It must be a
//!   power of two between [`MIN_BATCH_SIZE`] and [`MAX_BATCH_SIZE`]. The polynomial ring is
//!   `Z_Q[X]/(X^N + 1)` with `N = 2 * batch_size`.
//! - the `scaling_factor_bits`, the precision of the fixed-point encoding. Values are scaled
//!   by `Δ = 2^scaling_factor_bits` before encryption.
//!
//! The ciphertext modulus `Q` is a product of word-sized NTT friendly primes (a residue
//! number system): one base prime bounding the magnitude of the plaintext values followed
//! by [`MULTIPLICATIVE_DEPTH`] rescaling primes of `scaling_factor_bits` bits. One additional
//! special prime is only used by the evaluation key. The chain is derived deterministically
//! from the parameters, hence all parties of a federation agree on it. Parameters for which
//! the chain doesn't exist are rejected. The polynomial arithmetic is the one of [`fhe_math`].
//!
//! # Lifecycle
//! The [`CryptoContextManager`] owns the context and the keys of a process. It either
//! generates them into a directory or loads them from files. Once loaded the material is
//! immutable and borrowed by the [`Encryptor`], the [`Decryptor`] and the
//! [`HomomorphicAggregator`]. The aggregator only requires the evaluation key and never
//! touches the private key.
//!
//! The [`Ckks`] facade bundles all of this behind the operations exposed to the host process.
//!
//! # Artifacts
//! Contexts, keys and ciphertexts are serialized into versioned byte artifacts which carry the
//! parameters, a fingerprint of the modulus chain and the identifier of the key set they
//! belong to. Mixing artifacts of different key generations is rejected.

pub mod ciphertext;
pub mod ckks;
pub mod decryptor;
pub(crate) mod encoding;
pub mod encryptor;
pub mod evaluator;
pub mod keys;
pub mod manager;
pub(crate) mod math;
pub mod params;
pub mod serialization;
#[cfg(any(feature = "testutils", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "testutils")))]
pub mod testutils;

use std::path::PathBuf;

use derive_more::Display;
use thiserror::Error;

pub use self::{
    ciphertext::Ciphertext,
    ckks::Ckks,
    decryptor::Decryptor,
    encryptor::Encryptor,
    evaluator::HomomorphicAggregator,
    keys::{EvaluationKey, PublicKey, SecretKey},
    manager::{ContextState, CryptoContextManager, CryptoParamsFiles},
    params::{
        CkksContext,
        CkksParameters,
        KeySetId,
        MAX_BATCH_SIZE,
        MAX_SCALING_FACTOR_BITS,
        MIN_BATCH_SIZE,
        MIN_SCALING_FACTOR_BITS,
        MULTIPLICATIVE_DEPTH,
    },
};

/// An error related to the decoding of artifacts.
pub type DecodeError = anyhow::Error;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
/// The crypto material an operation depends on.
pub enum KeyKind {
    #[display(fmt = "crypto context")]
    Context,
    #[display(fmt = "public key")]
    Public,
    #[display(fmt = "private key")]
    Private,
    #[display(fmt = "evaluation key")]
    EvalMult,
}

#[derive(Debug, Error)]
/// Errors of the CKKS engine.
pub enum CkksError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("crypto file {} is invalid: {source:#}", .path.display())]
    CryptoFile {
        path: PathBuf,
        source: anyhow::Error,
    },
    #[error("the {0} is not loaded")]
    KeyNotLoaded(KeyKind),
    #[error("{len} values exceed the batch size of {batch_size}")]
    CapacityExceeded { len: usize, batch_size: usize },
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: ContextState,
    },
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("polynomial arithmetic failed: {0}")]
    Math(#[from] fhe_math::Error),
    #[error("sampling failed: {0}")]
    Sampling(String),
}

impl CkksError {
    /// Checks whether the error was caused by invalid arguments of the caller.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::CapacityExceeded { .. }
        )
    }

    pub(crate) fn crypto_file(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        Self::CryptoFile {
            path: path.into(),
            source: source.into(),
        }
    }
}
