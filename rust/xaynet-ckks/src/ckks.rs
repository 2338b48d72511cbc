//! The operations exposed to the host process.

use std::path::Path;

use crate::{
    decryptor::Decryptor,
    encryptor::Encryptor,
    evaluator::HomomorphicAggregator,
    manager::{ContextState, CryptoContextManager, CryptoParamsFiles},
    CkksError,
};

/// A CKKS instance for one federation.
///
/// All ciphertexts are opaque byte strings. The host process must remember the number of
/// values of every ciphertext, since they carry no length.
///
/// # Examples
/// ```no_run
/// # use xaynet_ckks::Ckks;
/// let mut ckks = Ckks::new(8192, 40)?;
/// ckks.generate_context_and_keys("/tmp/federation")?;
/// let ciphertexts = vec![ckks.encrypt(&[1., 2., 3.])?, ckks.encrypt(&[2., 3., 4.])?];
/// let average = ckks.compute_weighted_average(&ciphertexts, &[0.5, 0.5])?;
/// assert_eq!(ckks.decrypt(&average, 3)?.len(), 3);
/// # Ok::<(), xaynet_ckks::CkksError>(())
/// ```
#[derive(Debug)]
pub struct Ckks {
    manager: CryptoContextManager,
}

impl Ckks {
    /// Creates an instance for the given parameters without any context or keys.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidParameters`] for unsupported parameters.
    pub fn new(batch_size: u32, scaling_factor_bits: u32) -> Result<Self, CkksError> {
        CryptoContextManager::new(batch_size, scaling_factor_bits).map(|manager| Self { manager })
    }

    /// Gets the underlying context manager.
    pub fn manager(&self) -> &CryptoContextManager {
        &self.manager
    }

    /// Gets the current lifecycle state.
    pub fn state(&self) -> ContextState {
        self.manager.state()
    }

    /// See [`CryptoContextManager::generate_context_and_keys()`].
    pub fn generate_context_and_keys(
        &mut self,
        directory: impl AsRef<Path>,
    ) -> Result<(), CkksError> {
        self.manager.generate_context_and_keys(directory)
    }

    /// See [`CryptoContextManager::get_crypto_params_files()`].
    pub fn get_crypto_params_files(&self) -> Result<CryptoParamsFiles, CkksError> {
        self.manager.get_crypto_params_files()
    }

    /// See [`CryptoContextManager::load_context_from_file()`].
    pub fn load_context_from_file(&mut self, path: impl AsRef<Path>) -> Result<(), CkksError> {
        self.manager.load_context_from_file(path)
    }

    /// See [`CryptoContextManager::load_public_key_from_file()`].
    pub fn load_public_key_from_file(&mut self, path: impl AsRef<Path>) -> Result<(), CkksError> {
        self.manager.load_public_key_from_file(path)
    }

    /// See [`CryptoContextManager::load_private_key_from_file()`].
    pub fn load_private_key_from_file(&mut self, path: impl AsRef<Path>) -> Result<(), CkksError> {
        self.manager.load_private_key_from_file(path)
    }

    /// See [`CryptoContextManager::load_eval_mult_key_from_file()`].
    pub fn load_eval_mult_key_from_file(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<(), CkksError> {
        self.manager.load_eval_mult_key_from_file(path)
    }

    /// See [`CryptoContextManager::load_context_and_keys_from_files()`].
    pub fn load_context_and_keys_from_files(
        &mut self,
        context_path: impl AsRef<Path>,
        public_key_path: impl AsRef<Path>,
        private_key_path: impl AsRef<Path>,
    ) -> Result<(), CkksError> {
        self.manager
            .load_context_and_keys_from_files(context_path, public_key_path, private_key_path)
    }

    /// Encrypts up to `batch_size` values.
    ///
    /// # Errors
    /// See [`Encryptor::new()`] and [`Encryptor::encrypt()`].
    pub fn encrypt(&self, values: &[f64]) -> Result<Vec<u8>, CkksError> {
        Encryptor::new(&self.manager)?.encrypt(values)
    }

    /// Computes the weighted average of the ciphertexts.
    ///
    /// # Errors
    /// See [`HomomorphicAggregator::new()`] and
    /// [`HomomorphicAggregator::compute_weighted_average()`].
    pub fn compute_weighted_average<T: AsRef<[u8]>>(
        &self,
        ciphertexts: &[T],
        weights: &[f64],
    ) -> Result<Vec<u8>, CkksError> {
        HomomorphicAggregator::new(&self.manager)?.compute_weighted_average(ciphertexts, weights)
    }

    /// Decrypts the first `dimension` values of the ciphertext.
    ///
    /// # Errors
    /// See [`Decryptor::new()`] and [`Decryptor::decrypt()`].
    pub fn decrypt(&self, ciphertext: &[u8], dimension: usize) -> Result<Vec<f64>, CkksError> {
        Decryptor::new(&self.manager)?.decrypt(ciphertext, dimension)
    }
}
