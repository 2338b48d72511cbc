#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/xaynetwork/xaynet/master/assets/logo.png",
    issue_tracker_base_url = "https://github.com/xaynetwork/xaynet/issues"
)]
//! Aggregation of federated models.
//!
//! In every round the learners contribute their locally trained [`Model`]s together with a
//! weight, usually the number of their training samples. An [`AggregationStrategy`] combines the
//! [`Contribution`]s into the [`FederatedModel`] of the round.
//!
//! Two strategies are available:
//! - [`WeightedAverage`] averages plain models.
//! - [`EncryptedWeightedAverage`] averages models which the learners encrypted with CKKS (see
//!   [`encrypt_model()`]). The aggregating party only holds the crypto context and the
//!   evaluation key, the global model is decrypted by the holder of the private key (see
//!   [`decrypt_model()`]).
//!
//! A deployment selects its strategy by an [`AggregationRule`] in the [`Settings`].

pub mod logging;
pub mod model;
pub mod settings;
pub mod strategy;

pub use self::{
    model::{
        decrypt_model,
        encrypt_model,
        Contribution,
        FederatedModel,
        Model,
        RoundMetadata,
        Tensor,
        TensorKind,
    },
    settings::{AggregationSettings, CkksSettings, LoggingSettings, Settings, SettingsError},
    strategy::{
        aggregate_weighted,
        AggregationError,
        AggregationRule,
        AggregationStrategy,
        Aggregator,
        EncryptedWeightedAverage,
        WeightedAverage,
    },
};
