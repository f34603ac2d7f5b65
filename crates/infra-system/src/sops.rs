// sops-backed SecretDecryptor

use async_trait::async_trait;
use shiparr_core::error::{AppError, Result};
use shiparr_core::port::{CommandRunner, CommandSpec, SecretDecryptor};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Upper bound for one `sops -d` call
pub const SOPS_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs `sops -d <file>` and writes its stdout to the plaintext file
pub struct SopsDecryptor {
    runner: Arc<dyn CommandRunner>,
}

impl SopsDecryptor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl SecretDecryptor for SopsDecryptor {
    async fn decrypt_to(&self, encrypted: &Path, output: &Path) -> Result<()> {
        let mut spec = CommandSpec::new("sops")
            .arg("-d")
            .arg(encrypted.to_string_lossy())
            .timeout(SOPS_TIMEOUT);
        if let Some(dir) = encrypted.parent().filter(|p| !p.as_os_str().is_empty()) {
            // .sops.yaml creation rules are looked up from the working directory
            spec = spec.current_dir(dir);
        }

        let out = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| AppError::Secret(format!("{}: {}", encrypted.display(), e)))?;
        if !out.success() {
            return Err(AppError::Secret(format!(
                "sops -d {} exited with {:?}: {}",
                encrypted.display(),
                out.exit_code,
                out.stderr.trim()
            )));
        }

        write_private(output, out.stdout.as_bytes())
            .await
            .map_err(|e| AppError::Secret(format!("writing {}: {}", output.display(), e)))?;

        info!(
            encrypted = %encrypted.display(),
            output = %output.display(),
            "Secrets decrypted"
        );
        Ok(())
    }
}

/// Write plaintext secrets into a file only the owner can read
///
/// A new file is created with mode 0600. An existing file is narrowed to
/// 0600 before it is truncated and refilled.
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }
    file.set_len(0).await?;
    file.write_all(contents).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiparr_core::port::command_runner::mocks::{MockCommandRunner, MockReply};

    #[tokio::test]
    async fn test_writes_decrypted_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let encrypted = dir.path().join("secrets.enc.env");
        let output = dir.path().join(".env");

        let runner = MockCommandRunner::new();
        runner.on("sops -d", MockReply::ok("DB_PASSWORD=hunter2\n"));
        let sops = SopsDecryptor::new(Arc::new(runner.clone()));

        sops.decrypt_to(&encrypted, &output).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "DB_PASSWORD=hunter2\n"
        );
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, vec!["-d".to_string(), encrypted.display().to_string()]);
        assert_eq!(calls[0].working_dir.as_deref(), Some(dir.path()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_plaintext_is_owner_only_even_when_file_existed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh.env");
        let stale = dir.path().join(".env");
        std::fs::write(&stale, "OLD=value-that-is-much-longer-than-the-new-one\n").unwrap();
        std::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644)).unwrap();

        let runner = MockCommandRunner::new();
        runner.on("sops -d", MockReply::ok("A=1\n"));
        let sops = SopsDecryptor::new(Arc::new(runner));

        for output in [&fresh, &stale] {
            sops.decrypt_to(&dir.path().join("secrets.enc.env"), output)
                .await
                .unwrap();
            let mode = std::fs::metadata(output).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
            assert_eq!(std::fs::read_to_string(output).unwrap(), "A=1\n");
        }
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_secret_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join(".env");

        let runner = MockCommandRunner::new();
        runner.on("sops -d", MockReply::exit(128, "", "no key could decrypt the data"));
        let sops = SopsDecryptor::new(Arc::new(runner));

        let err = sops
            .decrypt_to(&dir.path().join("secrets.enc.env"), &output)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Secret(ref m) if m.contains("no key could decrypt")));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_missing_sops_binary_is_secret_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockCommandRunner::new();
        runner.on("sops", MockReply::spawn_error("No such file or directory"));
        let sops = SopsDecryptor::new(Arc::new(runner));

        let result = sops
            .decrypt_to(&dir.path().join("a.env"), &dir.path().join(".env"))
            .await;
        assert!(matches!(result, Err(AppError::Secret(_))));
    }
}
