//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. An
//! example of a configuration file can be found in the `configs/` directory located in the
//! repository root.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};
use xaynet_ckks::{Ckks, CkksError, CkksParameters, CryptoParamsFiles};

use crate::strategy::AggregationRule;

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    pub ckks: CkksSettings,
    #[serde(default)]
    pub aggregation: AggregationSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("xaynet").separator("__"))?;
        config.try_into()
    }
}

#[derive(Debug, Validate, Deserialize, Clone)]
#[validate(schema(function = "validate_ckks"))]
/// CKKS settings.
pub struct CkksSettings {
    /// The number of values packed into one ciphertext. It must be a power of two.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [ckks]
    /// batch_size = 8192
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// XAYNET_CKKS__BATCH_SIZE=8192
    /// ```
    pub batch_size: u32,

    /// The number of bits of the scaling factor of the fixed-point encoding.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [ckks]
    /// scaling_factor_bits = 40
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// XAYNET_CKKS__SCALING_FACTOR_BITS=40
    /// ```
    pub scaling_factor_bits: u32,

    /// The directory of the crypto context and the keys.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [ckks]
    /// key_dir = "/var/lib/xaynet/keys"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// XAYNET_CKKS__KEY_DIR=/var/lib/xaynet/keys
    /// ```
    pub key_dir: PathBuf,
}

impl CkksSettings {
    /// Checks that the parameters are supported by the CKKS engine.
    fn validate_ckks(&self) -> Result<(), ValidationError> {
        CkksParameters::new(self.batch_size, self.scaling_factor_bits)
            .map(|_| ())
            .map_err(|_| ValidationError::new("unsupported ckks parameters"))
    }

    /// Creates a CKKS instance with the crypto material of the key directory.
    ///
    /// If the directory holds a crypto context, the context and every key next to it are
    /// loaded. Otherwise a new context and key set are generated into the directory.
    ///
    /// # Errors
    /// Fails if the parameters are unsupported or if the material can't be loaded or written.
    pub fn init(&self) -> Result<Ckks, CkksError> {
        let mut ckks = Ckks::new(self.batch_size, self.scaling_factor_bits)?;
        let files = CryptoParamsFiles::in_directory(&self.key_dir);
        if !files.context_file.is_file() {
            ckks.generate_context_and_keys(&self.key_dir)?;
            return Ok(ckks);
        }

        ckks.load_context_from_file(&files.context_file)?;
        if files.public_key_file.is_file() {
            ckks.load_public_key_from_file(&files.public_key_file)?;
        }
        if files.private_key_file.is_file() {
            ckks.load_private_key_from_file(&files.private_key_file)?;
        }
        if files.eval_mult_key_file.is_file() {
            ckks.load_eval_mult_key_from_file(&files.eval_mult_key_file)?;
        }
        info!(
            "initialized ckks from {} in state {}",
            self.key_dir.display(),
            ckks.state()
        );
        Ok(ckks)
    }
}

/// A wrapper for validate derive.
fn validate_ckks(s: &CkksSettings) -> Result<(), ValidationError> {
    s.validate_ckks()
}

#[derive(Debug, Default, Deserialize, Clone, Copy)]
/// Aggregation settings.
pub struct AggregationSettings {
    /// The aggregation strategy. Defaults to `weighted_average`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [aggregation]
    /// rule = "encrypted_weighted_average"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// XAYNET_AGGREGATION__RULE=encrypted_weighted_average
    /// ```
    #[serde(default)]
    pub rule: AggregationRule,
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// XAYNET_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use serial_test::serial;
    use xaynet_ckks::{testutils::TempDir, ContextState};

    use super::*;

    impl Default for CkksSettings {
        fn default() -> Self {
            Self {
                batch_size: 16,
                scaling_factor_bits: 40,
                key_dir: env::temp_dir().join("xaynet-aggregation-settings"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_settings_new() {
        assert!(Settings::new("../../configs/aggregation.toml").is_ok());
        assert!(Settings::new("").is_err());
    }

    #[test]
    #[serial]
    fn test_settings_from_file() {
        let settings = Settings::new("../../configs/aggregation.toml").unwrap();
        assert_eq!(settings.ckks.batch_size, 8192);
        assert_eq!(settings.ckks.scaling_factor_bits, 40);
        assert_eq!(
            settings.aggregation.rule,
            AggregationRule::EncryptedWeightedAverage
        );
    }

    #[test]
    #[serial]
    fn test_settings_env_override() {
        env::set_var("XAYNET_CKKS__BATCH_SIZE", "4096");
        env::set_var("XAYNET_AGGREGATION__RULE", "weighted_average");
        let settings = Settings::new("../../configs/aggregation.toml");
        env::remove_var("XAYNET_CKKS__BATCH_SIZE");
        env::remove_var("XAYNET_AGGREGATION__RULE");

        let settings = settings.unwrap();
        assert_eq!(settings.ckks.batch_size, 4096);
        assert_eq!(settings.aggregation.rule, AggregationRule::WeightedAverage);
    }

    #[test]
    #[serial]
    fn test_settings_invalid_env_override() {
        env::set_var("XAYNET_CKKS__BATCH_SIZE", "1000");
        let invalid_batch_size = Settings::new("../../configs/aggregation.toml");
        env::remove_var("XAYNET_CKKS__BATCH_SIZE");
        assert!(matches!(
            invalid_batch_size,
            Err(SettingsError::Validation(_))
        ));

        env::set_var("XAYNET_AGGREGATION__RULE", "median");
        let invalid_rule = Settings::new("../../configs/aggregation.toml");
        env::remove_var("XAYNET_AGGREGATION__RULE");
        assert!(matches!(invalid_rule, Err(SettingsError::Loading(_))));

        env::set_var("XAYNET_LOG__FILTER", "xaynet=loud");
        let invalid_filter = Settings::new("../../configs/aggregation.toml");
        env::remove_var("XAYNET_LOG__FILTER");
        assert!(matches!(invalid_filter, Err(SettingsError::Loading(_))));
    }

    #[test]
    fn test_validate_ckks() {
        assert!(CkksSettings::default().validate().is_ok());
        assert!(CkksSettings {
            batch_size: 100,
            ..CkksSettings::default()
        }
        .validate()
        .is_err());
        assert!(CkksSettings {
            batch_size: 1 << 17,
            ..CkksSettings::default()
        }
        .validate()
        .is_err());
        assert!(CkksSettings {
            scaling_factor_bits: 10,
            ..CkksSettings::default()
        }
        .validate()
        .is_err());
        assert!(CkksSettings {
            scaling_factor_bits: 60,
            ..CkksSettings::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_validate_ckks_modulus_chain() {
        // too few primes of 20 bits are congruent to 1 modulo twice the ring degree
        for batch_size in [1 << 15, 1 << 16].iter() {
            assert!(CkksSettings {
                batch_size: *batch_size,
                scaling_factor_bits: 20,
                ..CkksSettings::default()
            }
            .validate()
            .is_err());
        }
        assert!(CkksSettings {
            batch_size: 1 << 16,
            scaling_factor_bits: 25,
            ..CkksSettings::default()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_ckks_init() {
        let dir = TempDir::new("aggregation-settings");
        let settings = CkksSettings {
            key_dir: dir.path().to_path_buf(),
            ..CkksSettings::default()
        };
        let generated = settings.init().unwrap();
        assert_eq!(generated.state(), ContextState::OperationalReady);

        // the second instance loads the generated material
        let loaded = settings.init().unwrap();
        assert_eq!(loaded.state(), ContextState::OperationalReady);
        let ciphertext = generated.encrypt(&[1.5, -2.5]).unwrap();
        let values = loaded.decrypt(&ciphertext, 2).unwrap();
        assert!((values[0] - 1.5).abs() < 1e-5);
        assert!((values[1] + 2.5).abs() < 1e-5);

        // an aggregating party without the private key
        fs::remove_file(settings.key_dir.join("key_private.bin")).unwrap();
        let aggregator = settings.init().unwrap();
        assert_eq!(aggregator.state(), ContextState::KeysLoaded);
        assert!(aggregator
            .compute_weighted_average(&[ciphertext], &[1.])
            .is_ok());

        // parameters which don't match the stored context
        let other = CkksSettings {
            batch_size: 32,
            ..settings.clone()
        };
        assert!(matches!(other.init(), Err(CkksError::CryptoFile { .. })));
    }
}
