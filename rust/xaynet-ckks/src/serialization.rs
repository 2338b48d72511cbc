//! Serialization of contexts, keys and ciphertexts.
//!
//! Every artifact starts with a header of fixed length followed by a payload whose layout
//! depends on the artifact kind:
//!
//! ```text
//! 0       4   6 7 8           12          16          20                52            68
//! +-------+---+-+-+-----------+-----------+-----------+-----------------+-------------+------
//! | XCKK  |ver|k|r| batch size| scal. bits| ring deg. | fingerprint     | key set id  | payload
//! +-------+---+-+-+-----------+-----------+-----------+-----------------+-------------+------
//! ```
//!
//! All header integers are big endian. Polynomials are serialized as the number of residues,
//! the ring degree and the little endian residue values in the NTT representation of
//! [`fhe_math`].

use std::{
    convert::{TryFrom, TryInto},
    ops::Range,
    sync::Arc,
};

use anyhow::{anyhow, Context};
use fhe_math::rq::{self, traits::TryConvertFrom, Poly, Representation};
use ndarray::Array2;

use crate::{
    params::{CkksContext, CkksParameters, KeySetId, FINGERPRINT_LENGTH},
    DecodeError,
};

/// The magic bytes at the start of every artifact.
pub const MAGIC: [u8; 4] = *b"XCKK";
/// The current version of the artifact format.
pub const VERSION: u16 = 1;

/// Creates a range from `start` to `start + length`.
pub(crate) const fn range(start: usize, length: usize) -> Range<usize> {
    start..(start + length)
}

const MAGIC_FIELD: Range<usize> = range(0, 4);
const VERSION_FIELD: Range<usize> = range(MAGIC_FIELD.end, 2);
const KIND_FIELD: usize = VERSION_FIELD.end;
const RESERVED_FIELD: usize = KIND_FIELD + 1;
const BATCH_SIZE_FIELD: Range<usize> = range(RESERVED_FIELD + 1, 4);
const SCALING_FACTOR_BITS_FIELD: Range<usize> = range(BATCH_SIZE_FIELD.end, 4);
const RING_DEGREE_FIELD: Range<usize> = range(SCALING_FACTOR_BITS_FIELD.end, 4);
const FINGERPRINT_FIELD: Range<usize> = range(RING_DEGREE_FIELD.end, FINGERPRINT_LENGTH);
const KEY_SET_FIELD: Range<usize> = range(FINGERPRINT_FIELD.end, KeySetId::LENGTH);
/// The length in bytes of an artifact header.
pub const HEADER_LENGTH: usize = KEY_SET_FIELD.end;

/// An interface for serializable types.
///
/// See also [`FromBytes`] for deserialization.
pub trait ToBytes {
    /// The length of the buffer for encoding the type.
    fn buffer_length(&self) -> usize;

    /// Serialize the type in the given buffer.
    ///
    /// # Panics
    /// This method may panic if the given buffer is too small. Thus, [`buffer_length()`] must be
    /// called prior to calling this, and a large enough buffer must be provided.
    ///
    /// [`buffer_length()`]: ToBytes::buffer_length
    fn to_bytes<T: AsMut<[u8]>>(&self, buffer: &mut T);

    /// Serializes the type into a new vector.
    fn to_vec(&self) -> Vec<u8> {
        let mut buffer = vec![0; self.buffer_length()];
        self.to_bytes(&mut buffer);
        buffer
    }
}

/// An interface for deserializable types.
///
/// See also [`ToBytes`] for serialization.
pub trait FromBytes: Sized {
    /// Deserialize the type from the given buffer.
    ///
    /// # Errors
    /// May fail if the buffer is too short or contains invalid values.
    fn from_bytes<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError>;
}

/// An interface for deserializable types which belong to a crypto context, like keys and
/// ciphertexts.
pub trait FromContextBytes: Sized {
    /// Deserialize the type from the given buffer and check that it belongs to `context`.
    ///
    /// # Errors
    /// May fail if the buffer is too short, contains invalid values or doesn't fit `context`.
    fn from_context_bytes<T: AsRef<[u8]>>(
        buffer: &T,
        context: &CkksContext,
    ) -> Result<Self, DecodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
/// The kind of a serialized artifact.
pub enum ArtifactKind {
    Context = 0,
    PublicKey = 1,
    PrivateKey = 2,
    EvalMultKey = 3,
    Ciphertext = 4,
}

impl TryFrom<u8> for ArtifactKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Context),
            1 => Ok(Self::PublicKey),
            2 => Ok(Self::PrivateKey),
            3 => Ok(Self::EvalMultKey),
            4 => Ok(Self::Ciphertext),
            _ => Err(anyhow!("invalid artifact kind: {}", value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The header of an artifact.
pub struct Header {
    pub kind: ArtifactKind,
    pub params: CkksParameters,
    pub fingerprint: [u8; FINGERPRINT_LENGTH],
    pub key_set: KeySetId,
}

impl Header {
    /// Creates the header of an artifact of `kind` belonging to `context`.
    pub fn new(kind: ArtifactKind, context: &CkksContext) -> Self {
        Self {
            kind,
            params: *context.params(),
            fingerprint: *context.fingerprint(),
            key_set: context.key_set(),
        }
    }

    /// Checks that the artifact is of the `expected` kind and belongs to `context`.
    ///
    /// # Errors
    /// Fails if the kind, the parameters, the fingerprint or the key set differ.
    pub fn check(&self, expected: ArtifactKind, context: &CkksContext) -> Result<(), DecodeError> {
        if self.kind != expected {
            return Err(anyhow!(
                "expected a {:?} artifact but found a {:?} artifact",
                expected,
                self.kind
            ));
        }
        if self.params != *context.params() {
            return Err(anyhow!(
                "parameters ({}) don't match the context ({})",
                self.params,
                context.params()
            ));
        }
        if !context.is_compatible(&self.fingerprint, self.key_set) {
            return Err(anyhow!(
                "artifact of key set {} doesn't belong to the context of key set {}",
                self.key_set,
                context.key_set()
            ));
        }
        Ok(())
    }
}

/// A buffer for serialized artifact headers.
pub struct HeaderBuffer<T> {
    inner: T,
}

impl<T: AsRef<[u8]>> HeaderBuffer<T> {
    /// Creates a new buffer from `bytes`.
    ///
    /// # Errors
    /// Fails if the `bytes` are too short or don't start with the magic bytes.
    pub fn new(bytes: T) -> Result<Self, DecodeError> {
        let buffer = Self { inner: bytes };
        buffer
            .check_buffer_length()
            .context("not a valid artifact header")?;
        if buffer.magic() != &MAGIC[..] {
            return Err(anyhow!("not a CKKS artifact"));
        }
        if buffer.version() != VERSION {
            return Err(anyhow!(
                "unsupported artifact version {} (expected {})",
                buffer.version(),
                VERSION
            ));
        }
        Ok(buffer)
    }

    /// Creates a new buffer from `bytes` without any checks.
    pub fn new_unchecked(bytes: T) -> Self {
        Self { inner: bytes }
    }

    /// Checks if this buffer is long enough for a header.
    pub fn check_buffer_length(&self) -> Result<(), DecodeError> {
        let len = self.inner.as_ref().len();
        if len < HEADER_LENGTH {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                len,
                HEADER_LENGTH
            ));
        }
        Ok(())
    }

    /// Gets the magic bytes.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn magic(&self) -> &[u8] {
        &self.inner.as_ref()[MAGIC_FIELD]
    }

    /// Gets the format version.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn version(&self) -> u16 {
        // UNWRAP SAFE: the slice is exactly 2 bytes long
        u16::from_be_bytes(self.inner.as_ref()[VERSION_FIELD].try_into().unwrap())
    }

    /// Gets the artifact kind.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn kind(&self) -> u8 {
        self.inner.as_ref()[KIND_FIELD]
    }

    /// Gets the batch size.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn batch_size(&self) -> u32 {
        // UNWRAP SAFE: the slice is exactly 4 bytes long
        u32::from_be_bytes(self.inner.as_ref()[BATCH_SIZE_FIELD].try_into().unwrap())
    }

    /// Gets the scaling factor bits.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn scaling_factor_bits(&self) -> u32 {
        // UNWRAP SAFE: the slice is exactly 4 bytes long
        u32::from_be_bytes(
            self.inner.as_ref()[SCALING_FACTOR_BITS_FIELD]
                .try_into()
                .unwrap(),
        )
    }

    /// Gets the ring degree.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn ring_degree(&self) -> u32 {
        // UNWRAP SAFE: the slice is exactly 4 bytes long
        u32::from_be_bytes(self.inner.as_ref()[RING_DEGREE_FIELD].try_into().unwrap())
    }

    /// Gets the context fingerprint.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn fingerprint(&self) -> &[u8] {
        &self.inner.as_ref()[FINGERPRINT_FIELD]
    }

    /// Gets the key set identifier.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn key_set(&self) -> &[u8] {
        &self.inner.as_ref()[KEY_SET_FIELD]
    }

    /// Gets the payload following the header.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn payload(&self) -> &[u8] {
        &self.inner.as_ref()[HEADER_LENGTH..]
    }
}

impl<T: AsMut<[u8]>> HeaderBuffer<T> {
    fn set_magic(&mut self) {
        self.inner.as_mut()[MAGIC_FIELD].copy_from_slice(&MAGIC);
    }

    fn set_version(&mut self, value: u16) {
        self.inner.as_mut()[VERSION_FIELD].copy_from_slice(&value.to_be_bytes());
    }

    fn set_kind(&mut self, value: ArtifactKind) {
        self.inner.as_mut()[KIND_FIELD] = value as u8;
        self.inner.as_mut()[RESERVED_FIELD] = 0;
    }

    fn set_batch_size(&mut self, value: u32) {
        self.inner.as_mut()[BATCH_SIZE_FIELD].copy_from_slice(&value.to_be_bytes());
    }

    fn set_scaling_factor_bits(&mut self, value: u32) {
        self.inner.as_mut()[SCALING_FACTOR_BITS_FIELD].copy_from_slice(&value.to_be_bytes());
    }

    fn set_ring_degree(&mut self, value: u32) {
        self.inner.as_mut()[RING_DEGREE_FIELD].copy_from_slice(&value.to_be_bytes());
    }

    fn fingerprint_mut(&mut self) -> &mut [u8] {
        &mut self.inner.as_mut()[FINGERPRINT_FIELD]
    }

    fn key_set_mut(&mut self) -> &mut [u8] {
        &mut self.inner.as_mut()[KEY_SET_FIELD]
    }
}

impl ToBytes for Header {
    fn buffer_length(&self) -> usize {
        HEADER_LENGTH
    }

    fn to_bytes<T: AsMut<[u8]>>(&self, buffer: &mut T) {
        let mut writer = HeaderBuffer::new_unchecked(buffer.as_mut());
        writer.set_magic();
        writer.set_version(VERSION);
        writer.set_kind(self.kind);
        writer.set_batch_size(self.params.batch_size());
        writer.set_scaling_factor_bits(self.params.scaling_factor_bits());
        writer.set_ring_degree(self.params.ring_degree() as u32);
        writer.fingerprint_mut().copy_from_slice(&self.fingerprint);
        writer.key_set_mut().copy_from_slice(self.key_set.as_slice());
    }
}

impl FromBytes for Header {
    fn from_bytes<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let reader = HeaderBuffer::new(buffer.as_ref())?;
        let kind = ArtifactKind::try_from(reader.kind())?;
        let params = CkksParameters::new(reader.batch_size(), reader.scaling_factor_bits())
            .context("invalid artifact header")?;
        if reader.ring_degree() as usize != params.ring_degree() {
            return Err(anyhow!(
                "ring degree {} doesn't match the batch size {}",
                reader.ring_degree(),
                params.batch_size()
            ));
        }
        let mut fingerprint = [0_u8; FINGERPRINT_LENGTH];
        fingerprint.copy_from_slice(reader.fingerprint());
        // UNWRAP SAFE: the slice has exactly the length of a key set id
        let key_set = KeySetId::from_slice(reader.key_set()).unwrap();
        Ok(Self {
            kind,
            params,
            fingerprint,
            key_set,
        })
    }
}

/// Serializes an artifact consisting of `header` and `payload`.
pub(crate) fn encode_artifact<P: ToBytes>(header: &Header, payload: &P) -> Vec<u8> {
    let mut buffer = vec![0; HEADER_LENGTH + payload.buffer_length()];
    header.to_bytes(&mut buffer);
    payload.to_bytes(&mut &mut buffer[HEADER_LENGTH..]);
    buffer
}

/// Splits an artifact into its header and its payload.
pub(crate) fn split_artifact(bytes: &[u8]) -> Result<(Header, &[u8]), DecodeError> {
    let header = Header::from_bytes(&bytes)?;
    Ok((header, &bytes[HEADER_LENGTH..]))
}

/// Deserializes an artifact of `kind` which belongs to `context`.
pub(crate) fn decode_artifact<P: FromContextBytes>(
    bytes: &[u8],
    kind: ArtifactKind,
    context: &CkksContext,
) -> Result<P, DecodeError> {
    let (header, payload) = split_artifact(bytes)?;
    header.check(kind, context)?;
    P::from_context_bytes(&payload, context)
        .with_context(|| format!("invalid {:?} payload", kind))
}

const NUM_RESIDUES_FIELD: Range<usize> = range(0, 4);
const DEGREE_FIELD: Range<usize> = range(NUM_RESIDUES_FIELD.end, 4);
const BYTES_PER_RESIDUE_VALUE: usize = 8;

/// A buffer for serialized RNS polynomials.
pub(crate) struct PolyBuffer<T> {
    inner: T,
}

impl<T: AsRef<[u8]>> PolyBuffer<T> {
    /// Creates a new buffer from `bytes`. Trailing bytes are ignored.
    ///
    /// # Errors
    /// Fails if the `bytes` are shorter than announced by the polynomial fields.
    pub(crate) fn new(bytes: T) -> Result<Self, DecodeError> {
        let buffer = Self { inner: bytes };
        buffer
            .check_buffer_length()
            .context("not a valid polynomial")?;
        Ok(buffer)
    }

    pub(crate) fn new_unchecked(bytes: T) -> Self {
        Self { inner: bytes }
    }

    fn check_buffer_length(&self) -> Result<(), DecodeError> {
        let len = self.inner.as_ref().len();
        if len < DEGREE_FIELD.end {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                len,
                DEGREE_FIELD.end
            ));
        }
        let expected = self.try_len()?;
        if len < expected {
            return Err(anyhow!(
                "invalid buffer length: expected {} bytes but buffer has only {} bytes",
                expected,
                len
            ));
        }
        Ok(())
    }

    fn try_len(&self) -> Result<usize, DecodeError> {
        self.num_residues()
            .checked_mul(self.degree())
            .and_then(|values| values.checked_mul(BYTES_PER_RESIDUE_VALUE))
            .and_then(|data| data.checked_add(DEGREE_FIELD.end))
            .ok_or_else(|| anyhow!("invalid polynomial buffer: dimensions overflow"))
    }

    /// Gets the length in bytes of the serialized polynomial.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub(crate) fn len(&self) -> usize {
        DEGREE_FIELD.end + self.num_residues() * self.degree() * BYTES_PER_RESIDUE_VALUE
    }

    pub(crate) fn num_residues(&self) -> usize {
        // UNWRAP SAFE: the slice is exactly 4 bytes long
        u32::from_be_bytes(self.inner.as_ref()[NUM_RESIDUES_FIELD].try_into().unwrap()) as usize
    }

    pub(crate) fn degree(&self) -> usize {
        // UNWRAP SAFE: the slice is exactly 4 bytes long
        u32::from_be_bytes(self.inner.as_ref()[DEGREE_FIELD].try_into().unwrap()) as usize
    }

    fn data(&self) -> &[u8] {
        &self.inner.as_ref()[DEGREE_FIELD.end..self.len()]
    }

    /// Reads the polynomial as an element of `ctx` in NTT representation.
    ///
    /// # Errors
    /// Fails if the number of residues, the degree or any residue value doesn't fit `ctx`.
    fn to_poly(&self, ctx: &Arc<rq::Context>, degree: usize) -> Result<Poly, DecodeError> {
        let moduli = ctx.moduli();
        if self.num_residues() != moduli.len() {
            return Err(anyhow!(
                "expected {} residues but found {}",
                moduli.len(),
                self.num_residues()
            ));
        }
        if self.degree() != degree {
            return Err(anyhow!(
                "polynomial has degree {} instead of {}",
                self.degree(),
                degree
            ));
        }
        let values: Vec<u64> = self
            .data()
            .chunks_exact(BYTES_PER_RESIDUE_VALUE)
            // UNWRAP SAFE: the chunks are exactly 8 bytes long
            .map(|value| u64::from_le_bytes(value.try_into().unwrap()))
            .collect();
        for (i, (residue, q)) in values.chunks_exact(degree).zip(moduli).enumerate() {
            if residue.iter().any(|value| value >= q) {
                return Err(anyhow!("residue {} exceeds its modulus", i));
            }
        }
        let residues = Array2::from_shape_vec((moduli.len(), degree), values)?;
        Ok(Poly::try_convert_from(
            residues,
            ctx,
            false,
            Representation::Ntt,
        )?)
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> PolyBuffer<T> {
    fn set_num_residues(&mut self, value: u32) {
        self.inner.as_mut()[NUM_RESIDUES_FIELD].copy_from_slice(&value.to_be_bytes());
    }

    fn set_degree(&mut self, value: u32) {
        self.inner.as_mut()[DEGREE_FIELD].copy_from_slice(&value.to_be_bytes());
    }

    fn data_mut(&mut self) -> &mut [u8] {
        let end = self.len();
        &mut self.inner.as_mut()[DEGREE_FIELD.end..end]
    }
}

impl ToBytes for Poly {
    fn buffer_length(&self) -> usize {
        DEGREE_FIELD.end + self.coefficients().len() * BYTES_PER_RESIDUE_VALUE
    }

    fn to_bytes<T: AsMut<[u8]>>(&self, buffer: &mut T) {
        let residues = self.coefficients();
        let mut writer = PolyBuffer::new_unchecked(buffer.as_mut());
        writer.set_num_residues(residues.nrows() as u32);
        writer.set_degree(residues.ncols() as u32);
        for (chunk, value) in writer
            .data_mut()
            .chunks_exact_mut(BYTES_PER_RESIDUE_VALUE)
            .zip(residues.iter())
        {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
    }
}

/// Gets the length of the polynomials serialized back to back.
pub(crate) fn polys_buffer_length<'a>(polys: impl IntoIterator<Item = &'a Poly>) -> usize {
    polys.into_iter().map(ToBytes::buffer_length).sum()
}

/// Writes the polynomials back to back into `buffer`.
pub(crate) fn polys_to_bytes<'a>(
    polys: impl IntoIterator<Item = &'a Poly>,
    mut buffer: &mut [u8],
) {
    for poly in polys {
        let len = poly.buffer_length();
        let (head, tail) = std::mem::take(&mut buffer).split_at_mut(len);
        poly.to_bytes(&mut &mut *head);
        buffer = tail;
    }
}

/// Gets the number of residues of the first polynomial in `bytes`.
///
/// # Errors
/// Fails if `bytes` don't start with a polynomial.
pub(crate) fn peek_num_residues(bytes: &[u8]) -> Result<usize, DecodeError> {
    Ok(PolyBuffer::new(bytes)?.num_residues())
}

/// Reads `count` polynomials of `ctx` stored back to back in `bytes`.
///
/// # Errors
/// Fails if a polynomial doesn't belong to `ctx` or if there are trailing bytes.
pub(crate) fn polys_from_bytes(
    mut bytes: &[u8],
    count: usize,
    ctx: &Arc<rq::Context>,
    degree: usize,
) -> Result<Vec<Poly>, DecodeError> {
    let mut polys = Vec::with_capacity(count);
    for i in 0..count {
        let reader = PolyBuffer::new(bytes).with_context(|| format!("invalid polynomial {}", i))?;
        polys.push(
            reader
                .to_poly(ctx, degree)
                .with_context(|| format!("invalid polynomial {}", i))?,
        );
        bytes = &bytes[reader.len()..];
    }
    if !bytes.is_empty() {
        return Err(anyhow!("{} trailing bytes", bytes.len()));
    }
    Ok(polys)
}

const COUNT_FIELD: Range<usize> = range(0, 4);
const BYTES_PER_MODULUS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
/// The modulus chain of a context.
pub(crate) struct Moduli(pub(crate) Vec<u64>);

impl ToBytes for Moduli {
    fn buffer_length(&self) -> usize {
        COUNT_FIELD.end + self.0.len() * BYTES_PER_MODULUS
    }

    fn to_bytes<T: AsMut<[u8]>>(&self, buffer: &mut T) {
        let buffer = buffer.as_mut();
        buffer[COUNT_FIELD].copy_from_slice(&(self.0.len() as u32).to_be_bytes());
        for (chunk, q) in buffer[COUNT_FIELD.end..]
            .chunks_exact_mut(BYTES_PER_MODULUS)
            .zip(&self.0)
        {
            chunk.copy_from_slice(&q.to_be_bytes());
        }
    }
}

impl FromBytes for Moduli {
    fn from_bytes<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let buffer = buffer.as_ref();
        if buffer.len() < COUNT_FIELD.end {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                buffer.len(),
                COUNT_FIELD.end
            ));
        }
        // UNWRAP SAFE: the slice is exactly 4 bytes long
        let count = u32::from_be_bytes(buffer[COUNT_FIELD].try_into().unwrap()) as usize;
        let data = &buffer[COUNT_FIELD.end..];
        if data.len() != count * BYTES_PER_MODULUS {
            return Err(anyhow!(
                "invalid buffer length: expected {} moduli but found {} bytes",
                count,
                data.len()
            ));
        }
        let moduli = data
            .chunks_exact(BYTES_PER_MODULUS)
            // UNWRAP SAFE: the chunks are exactly 8 bytes long
            .map(|chunk| u64::from_be_bytes(chunk.try_into().unwrap()))
            .collect();
        Ok(Self(moduli))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::signed_poly;

    fn context() -> CkksContext {
        CkksContext::new(CkksParameters::new(8, 30).unwrap(), KeySetId::generate()).unwrap()
    }

    #[test]
    fn test_header_roundtrip() {
        let context = context();
        let header = Header::new(ArtifactKind::PublicKey, &context);
        let bytes = header.to_vec();
        assert_eq!(bytes.len(), HEADER_LENGTH);
        assert_eq!(&bytes[MAGIC_FIELD], b"XCKK");
        assert_eq!(Header::from_bytes(&bytes).unwrap(), header);
        assert!(header.check(ArtifactKind::PublicKey, &context).is_ok());
        assert!(header.check(ArtifactKind::PrivateKey, &context).is_err());
    }

    #[test]
    fn test_header_rejects_foreign_key_set() {
        let context = context();
        let other = CkksContext::new(*context.params(), KeySetId::generate()).unwrap();
        let header = Header::new(ArtifactKind::Ciphertext, &other);
        assert!(header.check(ArtifactKind::Ciphertext, &context).is_err());
    }

    #[test]
    fn test_header_rejects_invalid_bytes() {
        let context = context();
        let bytes = Header::new(ArtifactKind::Context, &context).to_vec();

        assert!(Header::from_bytes(&&bytes[..HEADER_LENGTH - 1]).is_err());

        let mut wrong_magic = bytes.clone();
        wrong_magic[0] = b'Y';
        assert!(Header::from_bytes(&wrong_magic).is_err());

        let mut wrong_version = bytes.clone();
        wrong_version[VERSION_FIELD].copy_from_slice(&7_u16.to_be_bytes());
        assert!(Header::from_bytes(&wrong_version).is_err());

        let mut wrong_kind = bytes.clone();
        wrong_kind[KIND_FIELD] = 42;
        assert!(Header::from_bytes(&wrong_kind).is_err());

        let mut wrong_degree = bytes;
        wrong_degree[RING_DEGREE_FIELD].copy_from_slice(&32_u32.to_be_bytes());
        assert!(Header::from_bytes(&wrong_degree).is_err());
    }

    #[test]
    fn test_polys() {
        let context = context();
        let degree = context.params().ring_degree();
        let ctx = context.level_context(1);
        let a = signed_poly(&[1, -2, 3, 0, 0, 0, 5, -7, 0, 0, 0, 0, 0, 0, 0, 9], ctx).unwrap();
        let b = Poly::zero(ctx, Representation::Ntt);

        let mut buffer = vec![0; polys_buffer_length(vec![&a, &b])];
        polys_to_bytes(vec![&a, &b], &mut buffer);
        assert_eq!(peek_num_residues(&buffer).unwrap(), 2);
        let polys = polys_from_bytes(&buffer, 2, ctx, degree).unwrap();
        assert_eq!(polys, vec![a.clone(), b]);
        assert!(polys_from_bytes(&buffer, 2, context.level_context(2), degree).is_err());
        assert!(polys_from_bytes(&buffer, 2, ctx, 2 * degree).is_err());

        // truncated and trailing bytes
        assert!(polys_from_bytes(&buffer[..buffer.len() - 1], 2, ctx, degree).is_err());
        assert!(polys_from_bytes(&buffer, 1, ctx, degree).is_err());

        // residue out of range
        let q = context.modulus(0);
        buffer[DEGREE_FIELD.end..DEGREE_FIELD.end + BYTES_PER_RESIDUE_VALUE]
            .copy_from_slice(&q.to_le_bytes());
        assert!(polys_from_bytes(&buffer, 2, ctx, degree).is_err());
    }
}
