// Secret Decryptor Port

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Materializes a plaintext env file from an encrypted one
#[async_trait]
pub trait SecretDecryptor: Send + Sync {
    /// Decrypt `encrypted` and write the plaintext to `output`
    ///
    /// # Errors
    /// - AppError::Secret if decryption fails or the output cannot be written
    async fn decrypt_to(&self, encrypted: &Path, output: &Path) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    /// Records calls, optionally failing every one of them
    #[derive(Clone, Default)]
    pub struct MockSecretDecryptor {
        failure: Option<String>,
        calls: Arc<Mutex<Vec<(PathBuf, PathBuf)>>>,
    }

    impl MockSecretDecryptor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing(message: impl Into<String>) -> Self {
            Self {
                failure: Some(message.into()),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SecretDecryptor for MockSecretDecryptor {
        async fn decrypt_to(&self, encrypted: &Path, output: &Path) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((encrypted.to_path_buf(), output.to_path_buf()));
            match &self.failure {
                Some(message) => Err(AppError::Secret(message.clone())),
                None => Ok(()),
            }
        }
    }
}
