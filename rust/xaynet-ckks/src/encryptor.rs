//! Encryption of real vectors under the public key.

use tracing::debug;

use crate::{
    ciphertext::Ciphertext,
    keys::PublicKey,
    manager::CryptoContextManager,
    math::{
        sampling::{error_poly, secure_prng, ternary_poly},
        signed_poly,
    },
    params::CkksContext,
    CkksError,
};

/// Encrypts vectors of up to `batch_size` real values.
///
/// Encryption is probabilistic, encrypting the same values twice yields different ciphertexts.
#[derive(Debug, Clone, Copy)]
pub struct Encryptor<'a> {
    context: &'a CkksContext,
    public_key: &'a PublicKey,
}

impl<'a> Encryptor<'a> {
    /// Creates an encryptor from the context and the public key of `manager`.
    ///
    /// # Errors
    /// Fails with [`CkksError::KeyNotLoaded`] if the context or the public key is missing.
    pub fn new(manager: &'a CryptoContextManager) -> Result<Self, CkksError> {
        Ok(Self {
            context: manager.context()?,
            public_key: manager.public_key()?,
        })
    }

    /// Encrypts `values` into a serialized ciphertext.
    ///
    /// # Errors
    /// See [`encrypt_ciphertext()`].
    ///
    /// [`encrypt_ciphertext()`]: Encryptor::encrypt_ciphertext
    pub fn encrypt(&self, values: &[f64]) -> Result<Vec<u8>, CkksError> {
        self.encrypt_ciphertext(values)
            .map(|ciphertext| ciphertext.serialize(self.context))
    }

    /// Encrypts `values` into a ciphertext at the maximal level.
    ///
    /// # Errors
    /// Fails with [`CkksError::CapacityExceeded`] if there are more values than slots and with
    /// [`CkksError::InvalidInput`] if a value is not finite or exceeds the supported magnitude.
    pub fn encrypt_ciphertext(&self, values: &[f64]) -> Result<Ciphertext, CkksError> {
        let params = self.context.params();
        let batch_size = params.batch_size() as usize;
        if values.len() > batch_size {
            return Err(CkksError::CapacityExceeded {
                len: values.len(),
                batch_size,
            });
        }
        let bound = params.max_abs_value();
        if let Some((index, value)) = values
            .iter()
            .enumerate()
            .find(|(_, value)| !value.is_finite() || value.abs() >= bound)
        {
            return Err(CkksError::InvalidInput(format!(
                "value {} at index {} is not finite or exceeds the bound {}",
                value, index, bound
            )));
        }

        let level = self.context.max_level();
        let ctx = self.context.level_context(level);
        let degree = params.ring_degree();
        let scale = params.scale();
        let encoded = self.context.encoder().encode(values, scale);
        let plaintext = signed_poly(&encoded, ctx)?;

        // (c0, c1) = (v·b + e0 + m, v·a + e1)
        let mut prng = secure_prng();
        let v = ternary_poly(&mut prng, degree, ctx)?;
        let (b, a) = self.public_key.components(self.context, level)?;
        let mut c0 = &b * &v;
        c0 += &error_poly(&mut prng, degree, ctx)?;
        c0 += &plaintext;
        let mut c1 = &a * &v;
        c1 += &error_poly(&mut prng, degree, ctx)?;

        debug!("encrypted {} values", values.len());
        Ok(Ciphertext { c0, c1, scale })
    }
}
