//! Decryption of ciphertexts under the private key.

use fhe_math::rq::Representation;
use num::{bigint::BigUint, ToPrimitive};
use tracing::debug;

use crate::{
    ciphertext::Ciphertext,
    keys::SecretKey,
    manager::CryptoContextManager,
    params::CkksContext,
    CkksError,
};

/// Decrypts ciphertexts into vectors of real values.
#[derive(Debug, Clone, Copy)]
pub struct Decryptor<'a> {
    context: &'a CkksContext,
    secret_key: &'a SecretKey,
}

impl<'a> Decryptor<'a> {
    /// Creates a decryptor from the context and the private key of `manager`.
    ///
    /// # Errors
    /// Fails with [`CkksError::KeyNotLoaded`] if the context or the private key is missing.
    pub fn new(manager: &'a CryptoContextManager) -> Result<Self, CkksError> {
        Ok(Self {
            context: manager.context()?,
            secret_key: manager.secret_key()?,
        })
    }

    /// Decrypts a serialized ciphertext into its first `dimension` values.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidInput`] if the bytes are not a ciphertext of this context
    /// or if `dimension` exceeds the batch size.
    pub fn decrypt(&self, ciphertext: &[u8], dimension: usize) -> Result<Vec<f64>, CkksError> {
        self.check_dimension(dimension)?;
        let ciphertext = Ciphertext::deserialize(ciphertext, self.context)?;
        self.decrypt_ciphertext(&ciphertext, dimension)
    }

    /// Decrypts a ciphertext into its first `dimension` values.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidInput`] if `dimension` exceeds the batch size.
    pub fn decrypt_ciphertext(
        &self,
        ciphertext: &Ciphertext,
        dimension: usize,
    ) -> Result<Vec<f64>, CkksError> {
        self.check_dimension(dimension)?;
        let level = ciphertext.level();

        // m = c0 + c1·s
        let s = self.secret_key.poly(self.context, level)?;
        let mut plaintext = &ciphertext.c1 * &s;
        plaintext += &ciphertext.c0;
        plaintext.change_representation(Representation::PowerBasis);

        let modulus = self.context.level_modulus(level);
        let half = &modulus >> 1_u32;
        let coefficients: Vec<f64> = Vec::<BigUint>::from(&plaintext)
            .into_iter()
            .map(|value| {
                let centered = if value > half {
                    -(&modulus - value).to_f64().unwrap_or(f64::INFINITY)
                } else {
                    value.to_f64().unwrap_or(f64::INFINITY)
                };
                centered / ciphertext.scale
            })
            .collect();

        let mut values = self.context.encoder().decode(&coefficients);
        values.truncate(dimension);
        debug!("decrypted {} values at level {}", dimension, level);
        Ok(values)
    }

    fn check_dimension(&self, dimension: usize) -> Result<(), CkksError> {
        let batch_size = self.context.params().batch_size() as usize;
        if dimension > batch_size {
            return Err(CkksError::InvalidInput(format!(
                "dimension {} exceeds the batch size {}",
                dimension, batch_size
            )));
        }
        Ok(())
    }
}
