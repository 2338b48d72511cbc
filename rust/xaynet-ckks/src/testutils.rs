//! Helpers for tests which write crypto material to disk.

use std::{
    env,
    fs,
    path::{Path, PathBuf},
};

use rand::RngCore;

/// A fresh directory below the temporary directory of the system.
///
/// The directory and everything in it is removed when the guard is dropped, even if the test
/// panicked.
#[derive(Debug)]
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    /// Creates a directory named after `prefix` and a random suffix.
    ///
    /// # Panics
    /// Panics if the directory can't be created.
    pub fn new(prefix: &str) -> Self {
        let path = env::temp_dir().join(format!(
            "xaynet-{}-{:016x}",
            prefix,
            rand::thread_rng().next_u64()
        ));
        fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRef<Path> for TempDir {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        // the directory may be gone already
        let _ = fs::remove_dir_all(&self.path);
    }
}
