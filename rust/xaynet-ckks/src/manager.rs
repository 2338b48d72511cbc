//! Management of the crypto context and the keys of a process.
//!
//! See the [crate] documentation for the lifecycle.

use std::{
    fs,
    path::{Path, PathBuf},
};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    keys::{generate_keys, EvaluationKey, PublicKey, SecretKey},
    params::{CkksContext, CkksParameters, KeySetId},
    serialization::{decode_artifact, encode_artifact, ArtifactKind, FromContextBytes, Header},
    CkksError,
    KeyKind,
};

/// The canonical file name of the crypto context.
pub const CONTEXT_FILE_NAME: &str = "crypto_context.bin";
/// The canonical file name of the public key.
pub const PUBLIC_KEY_FILE_NAME: &str = "key_public.bin";
/// The canonical file name of the private key.
pub const PRIVATE_KEY_FILE_NAME: &str = "key_private.bin";
/// The canonical file name of the evaluation key.
pub const EVAL_MULT_KEY_FILE_NAME: &str = "key_eval_mult.bin";

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
/// The lifecycle states of a [`CryptoContextManager`].
pub enum ContextState {
    /// Neither a context nor keys are present.
    #[display(fmt = "Empty")]
    Empty,
    /// A context is present, but no keys.
    #[display(fmt = "ContextReady")]
    ContextReady,
    /// A context and some, but not all, keys are present.
    #[display(fmt = "KeysLoaded")]
    KeysLoaded,
    /// A context and all keys are present.
    #[display(fmt = "OperationalReady")]
    OperationalReady,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// The locations of the four artifacts of a key set.
pub struct CryptoParamsFiles {
    pub context_file: PathBuf,
    pub public_key_file: PathBuf,
    pub private_key_file: PathBuf,
    pub eval_mult_key_file: PathBuf,
}

impl CryptoParamsFiles {
    /// Gets the canonical locations of the artifacts within `directory`.
    pub fn in_directory(directory: impl AsRef<Path>) -> Self {
        let directory = directory.as_ref();
        Self {
            context_file: directory.join(CONTEXT_FILE_NAME),
            public_key_file: directory.join(PUBLIC_KEY_FILE_NAME),
            private_key_file: directory.join(PRIVATE_KEY_FILE_NAME),
            eval_mult_key_file: directory.join(EVAL_MULT_KEY_FILE_NAME),
        }
    }

    /// Gets the canonical locations of the artifacts next to the `context_file`.
    fn beside(context_file: &Path) -> Self {
        let directory = context_file.parent().unwrap_or_else(|| Path::new(""));
        Self {
            context_file: context_file.to_path_buf(),
            ..Self::in_directory(directory)
        }
    }
}

/// The owner of the crypto context and the keys of a process.
///
/// Generation and loading require exclusive access, while the [`Encryptor`], the [`Decryptor`]
/// and the [`HomomorphicAggregator`] borrow the manager immutably. Hence the material never
/// changes while it is in use.
///
/// [`Encryptor`]: crate::Encryptor
/// [`Decryptor`]: crate::Decryptor
/// [`HomomorphicAggregator`]: crate::HomomorphicAggregator
#[derive(Debug)]
pub struct CryptoContextManager {
    params: CkksParameters,
    context: Option<CkksContext>,
    public_key: Option<PublicKey>,
    secret_key: Option<SecretKey>,
    eval_key: Option<EvaluationKey>,
    files: Option<CryptoParamsFiles>,
}

impl CryptoContextManager {
    /// Creates an empty manager for the given parameters.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidParameters`] for unsupported parameters.
    pub fn new(batch_size: u32, scaling_factor_bits: u32) -> Result<Self, CkksError> {
        let params = CkksParameters::new(batch_size, scaling_factor_bits)?;
        Ok(Self {
            params,
            context: None,
            public_key: None,
            secret_key: None,
            eval_key: None,
            files: None,
        })
    }

    /// Gets the declared parameters.
    pub fn params(&self) -> &CkksParameters {
        &self.params
    }

    /// Gets the current lifecycle state.
    pub fn state(&self) -> ContextState {
        if self.context.is_none() {
            return ContextState::Empty;
        }
        match (
            self.public_key.is_some(),
            self.secret_key.is_some(),
            self.eval_key.is_some(),
        ) {
            (true, true, true) => ContextState::OperationalReady,
            (false, false, false) => ContextState::ContextReady,
            _ => ContextState::KeysLoaded,
        }
    }

    /// Generates a new context and key set and persists the four artifacts in `directory`.
    ///
    /// The directory is created if it doesn't exist. The manager is only updated if all
    /// artifacts were written.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidState`] unless the manager is empty and with
    /// [`CkksError::CryptoFile`] if an artifact can't be written.
    pub fn generate_context_and_keys(
        &mut self,
        directory: impl AsRef<Path>,
    ) -> Result<(), CkksError> {
        let state = self.state();
        if state != ContextState::Empty {
            return Err(CkksError::InvalidState {
                operation: "generating the context and keys",
                state,
            });
        }

        let directory = directory.as_ref();
        info!(
            "generating crypto context and keys ({}) into {}",
            self.params,
            directory.display()
        );
        let context = CkksContext::new(self.params, KeySetId::generate())?;
        debug!("derived modulus chain {:?}", context.moduli());
        let (secret_key, public_key, eval_key) = generate_keys(&context)?;

        fs::create_dir_all(directory)
            .map_err(|error| CkksError::crypto_file(directory, error))?;
        let files = CryptoParamsFiles::in_directory(directory);
        write_file(&files.context_file, &context.serialize())?;
        write_file(
            &files.public_key_file,
            &encode_artifact(&Header::new(ArtifactKind::PublicKey, &context), &public_key),
        )?;
        write_file(
            &files.private_key_file,
            &encode_artifact(&Header::new(ArtifactKind::PrivateKey, &context), &secret_key),
        )?;
        write_file(
            &files.eval_mult_key_file,
            &encode_artifact(&Header::new(ArtifactKind::EvalMultKey, &context), &eval_key),
        )?;
        info!("generated key set {}", context.key_set());

        self.context = Some(context);
        self.public_key = Some(public_key);
        self.secret_key = Some(secret_key);
        self.eval_key = Some(eval_key);
        self.files = Some(files);
        Ok(())
    }

    /// Gets the locations of the artifacts of the current context.
    ///
    /// Artifacts which were not loaded explicitly are reported at their canonical location next
    /// to the context file.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidState`] if no context was generated or loaded yet.
    pub fn get_crypto_params_files(&self) -> Result<CryptoParamsFiles, CkksError> {
        self.files.clone().ok_or(CkksError::InvalidState {
            operation: "getting the crypto params files",
            state: self.state(),
        })
    }

    /// Loads the crypto context from `path`.
    ///
    /// Loading the current context again has no effect.
    ///
    /// # Errors
    /// Fails with [`CkksError::CryptoFile`] if the file is missing or invalid, doesn't match the
    /// declared parameters or differs from an already loaded context.
    pub fn load_context_from_file(&mut self, path: impl AsRef<Path>) -> Result<(), CkksError> {
        let path = path.as_ref();
        let bytes = read_file(path)?;
        let context =
            CkksContext::deserialize(&bytes).map_err(|error| CkksError::crypto_file(path, error))?;
        if *context.params() != self.params {
            return Err(CkksError::crypto_file(
                path,
                anyhow::anyhow!(
                    "context parameters ({}) don't match the declared parameters ({})",
                    context.params(),
                    self.params
                ),
            ));
        }

        if let Some(current) = &self.context {
            if current.is_compatible(context.fingerprint(), context.key_set()) {
                debug!("crypto context {} is already loaded", path.display());
                return Ok(());
            }
            return Err(CkksError::crypto_file(
                path,
                anyhow::anyhow!(
                    "a different crypto context of key set {} is already loaded",
                    current.key_set()
                ),
            ));
        }

        info!(
            "loaded crypto context of key set {} from {}",
            context.key_set(),
            path.display()
        );
        self.context = Some(context);
        self.files = Some(CryptoParamsFiles::beside(path));
        Ok(())
    }

    /// Loads the public key from `path`.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidState`] if no context is loaded and with
    /// [`CkksError::CryptoFile`] if the file is missing or doesn't belong to the context.
    pub fn load_public_key_from_file(&mut self, path: impl AsRef<Path>) -> Result<(), CkksError> {
        let path = path.as_ref();
        let key = self.load_key(
            path,
            ArtifactKind::PublicKey,
            "loading the public key",
        )?;
        info!("loaded public key from {}", path.display());
        self.public_key = Some(key);
        self.update_files(|files| files.public_key_file = path.to_path_buf());
        Ok(())
    }

    /// Loads the private key from `path`.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidState`] if no context is loaded and with
    /// [`CkksError::CryptoFile`] if the file is missing or doesn't belong to the context.
    pub fn load_private_key_from_file(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<(), CkksError> {
        let path = path.as_ref();
        let key = self.load_key(
            path,
            ArtifactKind::PrivateKey,
            "loading the private key",
        )?;
        info!("loaded private key from {}", path.display());
        self.secret_key = Some(key);
        self.update_files(|files| files.private_key_file = path.to_path_buf());
        Ok(())
    }

    /// Loads the evaluation key from `path`.
    ///
    /// # Errors
    /// Fails with [`CkksError::InvalidState`] if no context is loaded and with
    /// [`CkksError::CryptoFile`] if the file is missing or doesn't belong to the context.
    pub fn load_eval_mult_key_from_file(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<(), CkksError> {
        let path = path.as_ref();
        let key = self.load_key(
            path,
            ArtifactKind::EvalMultKey,
            "loading the evaluation key",
        )?;
        info!("loaded evaluation key from {}", path.display());
        self.eval_key = Some(key);
        self.update_files(|files| files.eval_mult_key_file = path.to_path_buf());
        Ok(())
    }

    /// Loads the context, the public key and the private key.
    ///
    /// The evaluation key is loaded as well if it exists at its canonical location next to the
    /// context file.
    ///
    /// # Errors
    /// Fails like the individual loads.
    pub fn load_context_and_keys_from_files(
        &mut self,
        context_path: impl AsRef<Path>,
        public_key_path: impl AsRef<Path>,
        private_key_path: impl AsRef<Path>,
    ) -> Result<(), CkksError> {
        let context_path = context_path.as_ref();
        self.load_context_from_file(context_path)?;
        self.load_public_key_from_file(public_key_path)?;
        self.load_private_key_from_file(private_key_path)?;

        let eval_mult_key_file = CryptoParamsFiles::beside(context_path).eval_mult_key_file;
        if eval_mult_key_file.is_file() {
            self.load_eval_mult_key_from_file(&eval_mult_key_file)?;
        } else {
            debug!(
                "no evaluation key at {}, homomorphic aggregation won't be available",
                eval_mult_key_file.display()
            );
        }
        Ok(())
    }

    /// Gets the crypto context.
    ///
    /// # Errors
    /// Fails with [`CkksError::KeyNotLoaded`] if no context is loaded.
    pub fn context(&self) -> Result<&CkksContext, CkksError> {
        self.context
            .as_ref()
            .ok_or(CkksError::KeyNotLoaded(KeyKind::Context))
    }

    /// Gets the public key.
    ///
    /// # Errors
    /// Fails with [`CkksError::KeyNotLoaded`] if the context or the public key is not loaded.
    pub fn public_key(&self) -> Result<&PublicKey, CkksError> {
        self.context()?;
        self.public_key
            .as_ref()
            .ok_or(CkksError::KeyNotLoaded(KeyKind::Public))
    }

    /// Gets the private key.
    ///
    /// # Errors
    /// Fails with [`CkksError::KeyNotLoaded`] if the context or the private key is not loaded.
    pub fn secret_key(&self) -> Result<&SecretKey, CkksError> {
        self.context()?;
        self.secret_key
            .as_ref()
            .ok_or(CkksError::KeyNotLoaded(KeyKind::Private))
    }

    /// Gets the evaluation key.
    ///
    /// # Errors
    /// Fails with [`CkksError::KeyNotLoaded`] if the context or the evaluation key is not loaded.
    pub fn eval_key(&self) -> Result<&EvaluationKey, CkksError> {
        self.context()?;
        self.eval_key
            .as_ref()
            .ok_or(CkksError::KeyNotLoaded(KeyKind::EvalMult))
    }

    fn load_key<K: FromContextBytes>(
        &self,
        path: &Path,
        kind: ArtifactKind,
        operation: &'static str,
    ) -> Result<K, CkksError> {
        let context = self.context.as_ref().ok_or(CkksError::InvalidState {
            operation,
            state: ContextState::Empty,
        })?;
        let bytes = read_file(path)?;
        decode_artifact(&bytes, kind, context)
            .map_err(|error| CkksError::crypto_file(path, error))
    }

    fn update_files(&mut self, update: impl FnOnce(&mut CryptoParamsFiles)) {
        if let Some(files) = self.files.as_mut() {
            update(files);
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, CkksError> {
    fs::read(path).map_err(|error| CkksError::crypto_file(path, error))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), CkksError> {
    fs::write(path, bytes).map_err(|error| CkksError::crypto_file(path, error))?;
    debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::TempDir;

    #[test]
    fn test_generate() {
        let dir = TempDir::new("ckks-generate");
        let mut manager = CryptoContextManager::new(16, 30).unwrap();
        assert_eq!(manager.state(), ContextState::Empty);
        assert!(matches!(
            manager.get_crypto_params_files(),
            Err(CkksError::InvalidState { .. })
        ));

        manager.generate_context_and_keys(&dir).unwrap();
        assert_eq!(manager.state(), ContextState::OperationalReady);
        let files = manager.get_crypto_params_files().unwrap();
        assert_eq!(files, CryptoParamsFiles::in_directory(dir.path()));
        assert!(files.context_file.is_file());
        assert!(files.public_key_file.is_file());
        assert!(files.private_key_file.is_file());
        assert!(files.eval_mult_key_file.is_file());

        // a second generation is rejected
        assert!(matches!(
            manager.generate_context_and_keys(&dir),
            Err(CkksError::InvalidState {
                state: ContextState::OperationalReady,
                ..
            })
        ));
    }

    #[test]
    fn test_load_step_by_step() {
        let dir = TempDir::new("ckks-load");
        let mut generator = CryptoContextManager::new(16, 30).unwrap();
        generator.generate_context_and_keys(&dir).unwrap();
        let files = generator.get_crypto_params_files().unwrap();

        let mut manager = CryptoContextManager::new(16, 30).unwrap();
        assert!(matches!(
            manager.load_public_key_from_file(&files.public_key_file),
            Err(CkksError::InvalidState { .. })
        ));
        assert!(matches!(
            manager.public_key(),
            Err(CkksError::KeyNotLoaded(KeyKind::Context))
        ));

        manager.load_context_from_file(&files.context_file).unwrap();
        assert_eq!(manager.state(), ContextState::ContextReady);
        // idempotent
        manager.load_context_from_file(&files.context_file).unwrap();
        assert_eq!(manager.get_crypto_params_files().unwrap(), files);

        manager.load_public_key_from_file(&files.public_key_file).unwrap();
        assert_eq!(manager.state(), ContextState::KeysLoaded);
        assert!(matches!(
            manager.secret_key(),
            Err(CkksError::KeyNotLoaded(KeyKind::Private))
        ));
        manager.load_private_key_from_file(&files.private_key_file).unwrap();
        assert_eq!(manager.state(), ContextState::KeysLoaded);
        manager.load_eval_mult_key_from_file(&files.eval_mult_key_file).unwrap();
        assert_eq!(manager.state(), ContextState::OperationalReady);
        assert_eq!(manager.public_key().unwrap(), generator.public_key().unwrap());
    }

    #[test]
    fn test_load_without_eval_key() {
        let dir = TempDir::new("ckks-no-eval");
        let mut generator = CryptoContextManager::new(16, 30).unwrap();
        generator.generate_context_and_keys(&dir).unwrap();
        let files = generator.get_crypto_params_files().unwrap();
        fs::remove_file(&files.eval_mult_key_file).unwrap();

        let mut manager = CryptoContextManager::new(16, 30).unwrap();
        manager
            .load_context_and_keys_from_files(
                &files.context_file,
                &files.public_key_file,
                &files.private_key_file,
            )
            .unwrap();
        assert_eq!(manager.state(), ContextState::KeysLoaded);
        assert!(matches!(
            manager.eval_key(),
            Err(CkksError::KeyNotLoaded(KeyKind::EvalMult))
        ));
    }

    #[test]
    fn test_load_rejects_invalid_files() {
        let dir = TempDir::new("ckks-invalid");
        let mut generator = CryptoContextManager::new(16, 30).unwrap();
        generator.generate_context_and_keys(&dir).unwrap();
        let files = generator.get_crypto_params_files().unwrap();

        // missing file
        let mut manager = CryptoContextManager::new(16, 30).unwrap();
        assert!(matches!(
            manager.load_context_from_file(dir.path().join("missing.bin")),
            Err(CkksError::CryptoFile { .. })
        ));
        // a key is not a context
        assert!(matches!(
            manager.load_context_from_file(&files.public_key_file),
            Err(CkksError::CryptoFile { .. })
        ));
        // other declared parameters
        let mut other = CryptoContextManager::new(16, 31).unwrap();
        assert!(matches!(
            other.load_context_from_file(&files.context_file),
            Err(CkksError::CryptoFile { .. })
        ));
        // a context is not a key
        manager.load_context_from_file(&files.context_file).unwrap();
        assert!(matches!(
            manager.load_private_key_from_file(&files.context_file),
            Err(CkksError::CryptoFile { .. })
        ));
        // corrupted key
        let mut bytes = fs::read(&files.private_key_file).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 7;
        let corrupted = dir.path().join("corrupted.bin");
        fs::write(&corrupted, bytes).unwrap();
        assert!(matches!(
            manager.load_private_key_from_file(&corrupted),
            Err(CkksError::CryptoFile { .. })
        ));
    }

    #[test]
    fn test_load_rejects_mixed_key_sets() {
        let (dir_a, dir_b) = (TempDir::new("ckks-mixed-a"), TempDir::new("ckks-mixed-b"));
        let mut a = CryptoContextManager::new(16, 30).unwrap();
        a.generate_context_and_keys(&dir_a).unwrap();
        let mut b = CryptoContextManager::new(16, 30).unwrap();
        b.generate_context_and_keys(&dir_b).unwrap();
        let files_a = a.get_crypto_params_files().unwrap();
        let files_b = b.get_crypto_params_files().unwrap();

        let mut manager = CryptoContextManager::new(16, 30).unwrap();
        manager.load_context_from_file(&files_a.context_file).unwrap();
        assert!(matches!(
            manager.load_public_key_from_file(&files_b.public_key_file),
            Err(CkksError::CryptoFile { .. })
        ));
        assert!(matches!(
            manager.load_context_from_file(&files_b.context_file),
            Err(CkksError::CryptoFile { .. })
        ));
        assert_eq!(manager.state(), ContextState::ContextReady);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            CryptoContextManager::new(1000, 40),
            Err(CkksError::InvalidParameters(_))
        ));
    }
}
