//! Aggregation strategies.
//!
//! A strategy combines the weighted [`Contribution`]s of a round into a [`FederatedModel`]. The
//! [`WeightedAverage`] works on plain tensors, the [`EncryptedWeightedAverage`] computes the same
//! average over encrypted tensors without decrypting them. The strategy of a deployment is
//! selected by an [`AggregationRule`] and built as an [`Aggregator`].

use derive_more::Display;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use xaynet_ckks::{CkksError, CryptoContextManager, HomomorphicAggregator, KeyKind};

use crate::model::{Contribution, FederatedModel, Model, RoundMetadata, Tensor, TensorKind};

#[derive(Debug, Error)]
/// Errors of an aggregation round.
pub enum AggregationError {
    #[error("there are no contributions to aggregate")]
    NoContributions,
    #[error("{models} models but {weights} weights")]
    WeightCountMismatch { models: usize, weights: usize },
    #[error("weight {weight} of contribution {index} is negative or not finite")]
    InvalidWeight { index: usize, weight: f64 },
    #[error("the weights sum up to zero")]
    ZeroTotalWeight,
    #[error("contribution {index} has a different shape: {reason}")]
    ShapeMismatch { index: usize, reason: String },
    #[error("tensor {name} is not {expected}")]
    TensorKindMismatch { name: String, expected: TensorKind },
    #[error("crypto operation failed: {0}")]
    Crypto(#[from] CkksError),
}

impl AggregationError {
    /// Checks whether the error was caused by invalid contributions.
    pub fn is_invalid_input(&self) -> bool {
        match self {
            Self::Crypto(error) => error.is_invalid_input(),
            _ => true,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
/// A rule to combine the models of a round into a global model.
pub trait AggregationStrategy {
    /// Aggregates the contributions.
    ///
    /// # Errors
    /// Fails if there are no contributions, if a weight is invalid or if the models don't share
    /// the same tensor names, lengths and kinds. A contribution is never dropped silently.
    fn aggregate(
        &self,
        contributions: &[Contribution],
    ) -> Result<FederatedModel, AggregationError>;

    /// Gets the name of the strategy.
    fn name(&self) -> &'static str;
}

/// Aggregates `models` weighted by the parallel `weights`.
///
/// # Errors
/// Fails with [`AggregationError::WeightCountMismatch`] if the sequences differ in length and
/// otherwise like the strategy.
pub fn aggregate_weighted<S>(
    strategy: &S,
    models: Vec<Model>,
    weights: &[f64],
) -> Result<FederatedModel, AggregationError>
where
    S: AggregationStrategy + ?Sized,
{
    if models.len() != weights.len() {
        return Err(reject(
            strategy.name(),
            AggregationError::WeightCountMismatch {
                models: models.len(),
                weights: weights.len(),
            },
        ));
    }
    let contributions: Vec<Contribution> = models
        .into_iter()
        .zip(weights)
        .map(|(model, weight)| Contribution::new(model, *weight))
        .collect();
    strategy.aggregate(&contributions)
}

#[derive(Debug, Default, Clone, Copy)]
/// The weighted average of plain models.
///
/// Every weight of the global model is `Σ(weight_i · model_i) / Σ(weight_i)`.
pub struct WeightedAverage;

impl AggregationStrategy for WeightedAverage {
    fn aggregate(
        &self,
        contributions: &[Contribution],
    ) -> Result<FederatedModel, AggregationError> {
        let (layout, fractions, total_weight) =
            check_contributions(contributions, TensorKind::Plain)
                .map_err(|error| reject(self.name(), error))?;

        let mut model = Model::new();
        for (name, tensor) in layout {
            let mut average = vec![0.; tensor.len()];
            for (contribution, factor) in contributions.iter().zip(&fractions) {
                if let Some(Tensor::Plain(weights)) = contribution.model.get(name) {
                    for (avg, weight) in average.iter_mut().zip(weights) {
                        *avg += factor * weight;
                    }
                }
            }
            model.insert(name.clone(), Tensor::Plain(average));
        }

        Ok(federated_model(self.name(), model, contributions.len(), total_weight))
    }

    fn name(&self) -> &'static str {
        "weighted_average"
    }
}

/// The weighted average of encrypted models.
///
/// Every tensor is averaged homomorphically, hence the aggregating party only needs the crypto
/// context and the evaluation key.
#[derive(Debug, Clone, Copy)]
pub struct EncryptedWeightedAverage<'a> {
    aggregator: HomomorphicAggregator<'a>,
}

impl<'a> EncryptedWeightedAverage<'a> {
    /// Creates the strategy from the crypto material of `manager`.
    ///
    /// # Errors
    /// Fails with [`AggregationError::Crypto`] if the context or the evaluation key is missing.
    pub fn new(manager: &'a CryptoContextManager) -> Result<Self, AggregationError> {
        Ok(Self {
            aggregator: HomomorphicAggregator::new(manager)?,
        })
    }
}

impl<'a> AggregationStrategy for EncryptedWeightedAverage<'a> {
    fn aggregate(
        &self,
        contributions: &[Contribution],
    ) -> Result<FederatedModel, AggregationError> {
        let (layout, fractions, total_weight) =
            check_contributions(contributions, TensorKind::Encrypted)
                .map_err(|error| reject(self.name(), error))?;

        let mut model = Model::new();
        for (name, tensor) in layout {
            let ciphertexts: Vec<&[u8]> = contributions
                .iter()
                .filter_map(|contribution| match contribution.model.get(name) {
                    Some(Tensor::Encrypted { ciphertext, .. }) => Some(ciphertext.as_slice()),
                    _ => None,
                })
                .collect();
            let ciphertext = self
                .aggregator
                .compute_weighted_average(&ciphertexts, &fractions)
                .map_err(|error| reject(self.name(), error.into()))?;
            debug!("averaged encrypted tensor {}", name);
            model.insert(
                name.clone(),
                Tensor::Encrypted {
                    ciphertext,
                    length: tensor.len(),
                },
            );
        }

        Ok(federated_model(self.name(), model, contributions.len(), total_weight))
    }

    fn name(&self) -> &'static str {
        "encrypted_weighted_average"
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
/// The selectable aggregation strategies.
pub enum AggregationRule {
    #[display(fmt = "weighted_average")]
    WeightedAverage,
    #[display(fmt = "encrypted_weighted_average")]
    EncryptedWeightedAverage,
}

impl Default for AggregationRule {
    fn default() -> Self {
        Self::WeightedAverage
    }
}

/// The strategy selected by an [`AggregationRule`].
#[derive(Debug)]
pub enum Aggregator<'a> {
    WeightedAverage(WeightedAverage),
    EncryptedWeightedAverage(EncryptedWeightedAverage<'a>),
}

impl<'a> Aggregator<'a> {
    /// Builds the strategy of `rule`.
    ///
    /// Encrypted strategies borrow their crypto material from `manager`.
    ///
    /// # Errors
    /// Fails with [`AggregationError::Crypto`] if an encrypted strategy is selected but the
    /// manager or its evaluation key is missing.
    pub fn new(
        rule: AggregationRule,
        manager: Option<&'a CryptoContextManager>,
    ) -> Result<Self, AggregationError> {
        let aggregator = match rule {
            AggregationRule::WeightedAverage => Self::WeightedAverage(WeightedAverage),
            AggregationRule::EncryptedWeightedAverage => {
                let manager = manager.ok_or(CkksError::KeyNotLoaded(KeyKind::Context))?;
                Self::EncryptedWeightedAverage(EncryptedWeightedAverage::new(manager)?)
            }
        };
        debug!("selected aggregation strategy {}", aggregator.name());
        Ok(aggregator)
    }
}

impl<'a> AggregationStrategy for Aggregator<'a> {
    fn aggregate(
        &self,
        contributions: &[Contribution],
    ) -> Result<FederatedModel, AggregationError> {
        match self {
            Self::WeightedAverage(strategy) => strategy.aggregate(contributions),
            Self::EncryptedWeightedAverage(strategy) => strategy.aggregate(contributions),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::WeightedAverage(strategy) => strategy.name(),
            Self::EncryptedWeightedAverage(strategy) => strategy.name(),
        }
    }
}

/// Checks the weights and the shapes of the contributions.
///
/// All models must have the tensor names and lengths of the first model and only tensors of
/// the given kind. Returns the first model as the layout of the round, the weights normalized
/// by their sum and the total weight. The total weight is infinite if the sum overflows.
fn check_contributions(
    contributions: &[Contribution],
    kind: TensorKind,
) -> Result<(&Model, Vec<f64>, f64), AggregationError> {
    let layout = &contributions
        .first()
        .ok_or(AggregationError::NoContributions)?
        .model;

    for (index, contribution) in contributions.iter().enumerate() {
        let weight = contribution.weight;
        if !weight.is_finite() || weight < 0. {
            return Err(AggregationError::InvalidWeight { index, weight });
        }

        let model = &contribution.model;
        if model.len() != layout.len() {
            return Err(AggregationError::ShapeMismatch {
                index,
                reason: format!("{} tensors instead of {}", model.len(), layout.len()),
            });
        }
        for ((name, tensor), (expected_name, expected)) in model.iter().zip(layout) {
            if name != expected_name {
                return Err(AggregationError::ShapeMismatch {
                    index,
                    reason: format!("unexpected tensor {}", name),
                });
            }
            if tensor.kind() != kind {
                return Err(AggregationError::TensorKindMismatch {
                    name: name.clone(),
                    expected: kind,
                });
            }
            if tensor.len() != expected.len() {
                return Err(AggregationError::ShapeMismatch {
                    index,
                    reason: format!(
                        "tensor {} has {} weights instead of {}",
                        name,
                        tensor.len(),
                        expected.len()
                    ),
                });
            }
        }
    }

    // scaled by the largest weight, the sum can't overflow
    let max = contributions.iter().map(|c| c.weight).fold(0., f64::max);
    if !(max > 0.) {
        return Err(AggregationError::ZeroTotalWeight);
    }
    let scaled_total: f64 = contributions.iter().map(|c| c.weight / max).sum();
    let fractions = contributions
        .iter()
        .map(|c| c.weight / max / scaled_total)
        .collect();
    let total_weight = contributions.iter().map(|c| c.weight).sum();
    Ok((layout, fractions, total_weight))
}

fn reject(strategy: &str, error: AggregationError) -> AggregationError {
    warn!("{} rejected the contributions: {}", strategy, error);
    error
}

fn federated_model(
    strategy: &str,
    model: Model,
    contributors: usize,
    total_weight: f64,
) -> FederatedModel {
    info!(
        "{} aggregated {} contributions with a total weight of {}",
        strategy, contributors, total_weight
    );
    FederatedModel {
        model,
        metadata: RoundMetadata {
            strategy: strategy.to_string(),
            contributors,
            total_weight,
        },
    }
}
