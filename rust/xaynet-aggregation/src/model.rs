//! Models exchanged in an aggregation round.
//!
//! A [`Model`] maps tensor names to flat tensors. A tensor is either a plain vector of weights or
//! a CKKS ciphertext of such a vector, which doesn't know its own length.

use std::collections::BTreeMap;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use xaynet_ckks::{Decryptor, Encryptor};

use crate::strategy::AggregationError;

/// A model, i.e. named flat tensors ordered by name.
pub type Model = BTreeMap<String, Tensor>;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// The representation of a tensor.
pub enum TensorKind {
    #[display(fmt = "plain")]
    Plain,
    #[display(fmt = "encrypted")]
    Encrypted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A flat tensor of model weights.
pub enum Tensor {
    /// The weights in plaintext.
    Plain(Vec<f64>),
    /// A serialized ciphertext of `length` weights.
    Encrypted { ciphertext: Vec<u8>, length: usize },
}

impl Tensor {
    /// Gets the number of weights.
    pub fn len(&self) -> usize {
        match self {
            Self::Plain(weights) => weights.len(),
            Self::Encrypted { length, .. } => *length,
        }
    }

    /// Checks whether the tensor has no weights.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets the representation of the tensor.
    pub fn kind(&self) -> TensorKind {
        match self {
            Self::Plain(_) => TensorKind::Plain,
            Self::Encrypted { .. } => TensorKind::Encrypted,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The model of a learner together with its weight in the aggregation.
pub struct Contribution {
    pub model: Model,
    /// Usually the number of local training samples.
    pub weight: f64,
}

impl Contribution {
    pub fn new(model: Model, weight: f64) -> Self {
        Self { model, weight }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Information about an aggregation round.
pub struct RoundMetadata {
    /// The name of the strategy which produced the model.
    pub strategy: String,
    /// The number of aggregated contributions.
    pub contributors: usize,
    /// The sum of the contribution weights. It is infinite if the sum overflows.
    pub total_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The global model produced by an aggregation round.
pub struct FederatedModel {
    pub model: Model,
    pub metadata: RoundMetadata,
}

/// Encrypts every plain tensor of `model`.
///
/// # Errors
/// Fails with [`AggregationError::TensorKindMismatch`] if the model contains an encrypted tensor
/// and with [`AggregationError::Crypto`] if a tensor can't be encrypted, e.g. because it is
/// longer than the batch size.
pub fn encrypt_model(encryptor: &Encryptor, model: &Model) -> Result<Model, AggregationError> {
    let mut encrypted = Model::new();
    for (name, tensor) in model {
        let weights = match tensor {
            Tensor::Plain(weights) => weights,
            Tensor::Encrypted { .. } => {
                return Err(AggregationError::TensorKindMismatch {
                    name: name.clone(),
                    expected: TensorKind::Plain,
                })
            }
        };
        let tensor = Tensor::Encrypted {
            ciphertext: encryptor.encrypt(weights)?,
            length: weights.len(),
        };
        encrypted.insert(name.clone(), tensor);
    }
    Ok(encrypted)
}

/// Decrypts every encrypted tensor of `model`.
///
/// # Errors
/// Fails with [`AggregationError::TensorKindMismatch`] if the model contains a plain tensor and
/// with [`AggregationError::Crypto`] if a ciphertext can't be decrypted.
pub fn decrypt_model(decryptor: &Decryptor, model: &Model) -> Result<Model, AggregationError> {
    let mut decrypted = Model::new();
    for (name, tensor) in model {
        match tensor {
            Tensor::Encrypted { ciphertext, length } => {
                let weights = decryptor.decrypt(ciphertext, *length)?;
                decrypted.insert(name.clone(), Tensor::Plain(weights));
            }
            Tensor::Plain(_) => {
                return Err(AggregationError::TensorKindMismatch {
                    name: name.clone(),
                    expected: TensorKind::Encrypted,
                })
            }
        }
    }
    Ok(decrypted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor() {
        let plain = Tensor::Plain(vec![1., 2., 3.]);
        assert_eq!(plain.len(), 3);
        assert_eq!(plain.kind(), TensorKind::Plain);

        let encrypted = Tensor::Encrypted {
            ciphertext: vec![0; 8],
            length: 0,
        };
        assert!(encrypted.is_empty());
        assert_eq!(encrypted.kind(), TensorKind::Encrypted);
        assert_eq!(encrypted.kind().to_string(), "encrypted");
    }
}
