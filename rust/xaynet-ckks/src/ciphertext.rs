//! Ciphertexts and their serialization.

use std::{convert::TryInto, ops::Range};

use anyhow::{anyhow, Context};
use fhe_math::rq::Poly;

use crate::{
    math::{num_moduli, select_residues},
    params::CkksContext,
    serialization::{
        decode_artifact,
        encode_artifact,
        peek_num_residues,
        polys_buffer_length,
        polys_from_bytes,
        polys_to_bytes,
        range,
        ArtifactKind,
        FromContextBytes,
        Header,
        ToBytes,
    },
    CkksError,
    DecodeError,
};

#[derive(Debug, Clone, PartialEq)]
/// An encryption `(c0, c1)` of a vector of real values, decryptable as `c0 + c1·s`.
///
/// The ciphertext lives on the primes `q_0, ..., q_level` and its plaintext is scaled by
/// [`scale()`]. It carries no length, the number of encrypted values must be remembered by the
/// caller.
///
/// [`scale()`]: Ciphertext::scale
pub struct Ciphertext {
    pub(crate) c0: Poly,
    pub(crate) c1: Poly,
    pub(crate) scale: f64,
}

impl Ciphertext {
    /// Gets the level, i.e. the number of rescalings still possible.
    pub fn level(&self) -> usize {
        num_moduli(&self.c0) - 1
    }

    /// Gets the scale of the encrypted values.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Drops primes until the ciphertext is at `level`. The plaintext and the scale don't change.
    pub(crate) fn drop_to_level(
        &mut self,
        context: &CkksContext,
        level: usize,
    ) -> Result<(), CkksError> {
        if level >= self.level() {
            return Ok(());
        }
        let rows: Vec<usize> = (0..=level).collect();
        let ctx = context.level_context(level);
        self.c0 = select_residues(&self.c0, &rows, ctx)?;
        self.c1 = select_residues(&self.c1, &rows, ctx)?;
        Ok(())
    }

    /// Serializes the ciphertext as an artifact of `context`.
    pub fn serialize(&self, context: &CkksContext) -> Vec<u8> {
        encode_artifact(&Header::new(ArtifactKind::Ciphertext, context), self)
    }

    /// Deserializes a ciphertext artifact of `context`.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidInput`] if the bytes are not a ciphertext of `context`.
    pub fn deserialize(bytes: &[u8], context: &CkksContext) -> Result<Self, CkksError> {
        decode_artifact(bytes, ArtifactKind::Ciphertext, context)
            .map_err(|error| CkksError::InvalidInput(format!("invalid ciphertext: {:#}", error)))
    }
}

const SCALE_FIELD: Range<usize> = range(0, 8);

impl ToBytes for Ciphertext {
    fn buffer_length(&self) -> usize {
        SCALE_FIELD.end + polys_buffer_length(vec![&self.c0, &self.c1])
    }

    fn to_bytes<T: AsMut<[u8]>>(&self, buffer: &mut T) {
        let buffer = buffer.as_mut();
        buffer[SCALE_FIELD].copy_from_slice(&self.scale.to_be_bytes());
        polys_to_bytes(vec![&self.c0, &self.c1], &mut buffer[SCALE_FIELD.end..]);
    }
}

impl FromContextBytes for Ciphertext {
    fn from_context_bytes<T: AsRef<[u8]>>(
        buffer: &T,
        context: &CkksContext,
    ) -> Result<Self, DecodeError> {
        let buffer = buffer.as_ref();
        if buffer.len() < SCALE_FIELD.end {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                buffer.len(),
                SCALE_FIELD.end
            ));
        }
        // UNWRAP SAFE: the slice is exactly 8 bytes long
        let scale = f64::from_be_bytes(buffer[SCALE_FIELD].try_into().unwrap());
        if !scale.is_finite() || scale < 1. {
            return Err(anyhow!("invalid scale: {}", scale));
        }

        let polys = &buffer[SCALE_FIELD.end..];
        let num_residues = peek_num_residues(polys)?;
        if num_residues == 0 || num_residues > context.max_level() + 1 {
            return Err(anyhow!("invalid number of residues: {}", num_residues));
        }
        let ctx = context.level_context(num_residues - 1);
        let mut polys = polys_from_bytes(polys, 2, ctx, context.params().ring_degree())
            .context("invalid ciphertext components")?
            .into_iter();
        match (polys.next(), polys.next()) {
            (Some(c0), Some(c1)) => Ok(Self { c0, c1, scale }),
            _ => Err(anyhow!("missing ciphertext components")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        math::signed_poly,
        params::{CkksParameters, KeySetId},
    };

    fn context() -> CkksContext {
        CkksContext::new(CkksParameters::new(4, 30).unwrap(), KeySetId::generate()).unwrap()
    }

    fn ciphertext(context: &CkksContext) -> Ciphertext {
        let ctx = context.level_context(context.max_level());
        Ciphertext {
            c0: signed_poly(&[1, 2, 3, 4, 5, 6, 7, 8], ctx).unwrap(),
            c1: signed_poly(&[-1, -2, -3, -4, -5, -6, -7, -8], ctx).unwrap(),
            scale: context.params().scale(),
        }
    }

    #[test]
    fn test_serialize_deserialize() {
        let context = context();
        let mut ciphertext = ciphertext(&context);
        assert_eq!(ciphertext.level(), 2);
        let bytes = ciphertext.serialize(&context);
        assert_eq!(Ciphertext::deserialize(&bytes, &context).unwrap(), ciphertext);

        ciphertext.drop_to_level(&context, 0).unwrap();
        assert_eq!(ciphertext.level(), 0);
        let bytes = ciphertext.serialize(&context);
        assert_eq!(Ciphertext::deserialize(&bytes, &context).unwrap(), ciphertext);
    }

    #[test]
    fn test_deserialize_rejects_foreign_context() {
        let context = context();
        let other = CkksContext::new(*context.params(), KeySetId::generate()).unwrap();
        let bytes = ciphertext(&other).serialize(&other);
        assert!(matches!(
            Ciphertext::deserialize(&bytes, &context),
            Err(CkksError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let context = context();
        assert!(Ciphertext::deserialize(&[], &context).is_err());
        assert!(Ciphertext::deserialize(&[0; 200], &context).is_err());
        let bytes = ciphertext(&context).serialize(&context);
        assert!(Ciphertext::deserialize(&bytes[..bytes.len() - 3], &context).is_err());
    }
}
