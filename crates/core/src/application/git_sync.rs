// GitSync - commit resolution and working-copy synchronization
// Every git invocation goes through the CommandRunner port.

use crate::application::retry::RetryPolicy;
use crate::port::{CommandRunner, CommandSpec};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

/// Remote hashes are reused for this long per (path, branch)
pub const REMOTE_HASH_CACHE_TTL: Duration = Duration::from_secs(5);

/// Fetch attempts before giving up
pub const FETCH_ATTEMPTS: u32 = 3;

/// Sleep between failed fetch attempts
pub const FETCH_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GitError {
    #[error("no git repository at {0}")]
    MissingRepository(PathBuf),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("fetch failed after {attempts} attempts: {last}")]
    FetchFailed { attempts: u32, last: String },

    #[error("could not run git: {0}")]
    Execution(String),

    #[error("filesystem error: {0}")]
    Io(String),
}

pub type GitResult<T> = std::result::Result<T, GitError>;

/// Insert the token as userinfo of an https URL
///
/// Non-https URLs and empty tokens are returned unchanged.
pub fn authenticated_url(url: &str, token: Option<&str>) -> String {
    match (token, url.strip_prefix("https://")) {
        (Some(token), Some(rest)) if !token.is_empty() => format!("https://{}@{}", token, rest),
        _ => url.to_string(),
    }
}

type CacheKey = (PathBuf, String);

struct CachedHash {
    hash: String,
    fetched_at: Instant,
}

/// One slot per (path, branch); holding the slot lock makes concurrent
/// lookups for the same key wait for a single fetch.
type CacheSlot = Arc<tokio::sync::Mutex<Option<CachedHash>>>;

/// Idle slot whose hash is gone or too old; slots held by a caller are kept
fn is_expired(slot: &CacheSlot, ttl: Duration) -> bool {
    if Arc::strong_count(slot) > 1 {
        return false;
    }
    match slot.try_lock() {
        Ok(cached) => cached
            .as_ref()
            .map_or(true, |entry| entry.fetched_at.elapsed() >= ttl),
        Err(_) => false,
    }
}

/// Git working-copy operations
pub struct GitSync {
    runner: Arc<dyn CommandRunner>,
    fetch_retry: RetryPolicy,
    cache_ttl: Duration,
    remote_cache: Mutex<HashMap<CacheKey, CacheSlot>>,
}

impl GitSync {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            fetch_retry: RetryPolicy::new(FETCH_ATTEMPTS, FETCH_RETRY_DELAY),
            cache_ttl: REMOTE_HASH_CACHE_TTL,
            remote_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Clone `branch` of `url` into `dest` and return the checked-out commit
    ///
    /// When a token is used, `origin` is rewritten to the plain URL afterwards
    /// so the credential never stays in `.git/config`.
    pub async fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        dest: &Path,
        token: Option<&str>,
    ) -> GitResult<String> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GitError::Io(format!("{}: {}", parent.display(), e)))?;
        }

        let auth_url = authenticated_url(url, token);
        let dest_str = dest.to_string_lossy();
        info!(url = %url, branch = %branch, dest = %dest.display(), "Cloning repository");

        self.git(
            None,
            &["clone", "--branch", branch, &auth_url, &dest_str],
            token,
        )
        .await?;

        if auth_url != url {
            self.git(Some(dest), &["remote", "set-url", "origin", url], token)
                .await?;
        }

        self.get_local_hash(dest).await
    }

    /// Commit currently checked out at `path`
    pub async fn get_local_hash(&self, path: &Path) -> GitResult<String> {
        self.ensure_repository(path).await?;
        self.git(Some(path), &["rev-parse", "HEAD"], None).await
    }

    /// Commit at the tip of `origin/<branch>` after a fetch
    ///
    /// Results are cached per (resolved path, branch) for the cache TTL, so a
    /// burst of units sharing one working copy triggers a single fetch.
    pub async fn get_remote_hash(
        &self,
        path: &Path,
        branch: &str,
        url: Option<&str>,
        token: Option<&str>,
    ) -> GitResult<String> {
        let slot = self.cache_slot(path, branch).await;
        let mut cached = slot.lock().await;

        if let Some(entry) = cached.as_ref() {
            if entry.fetched_at.elapsed() < self.cache_ttl {
                debug!(path = %path.display(), branch = %branch, "Remote hash cache hit");
                return Ok(entry.hash.clone());
            }
        }

        self.ensure_repository(path).await?;
        self.fetch(path, branch, url, token).await?;
        let hash = self.remote_ref_hash(path, branch).await?;

        *cached = Some(CachedHash {
            hash: hash.clone(),
            fetched_at: Instant::now(),
        });
        Ok(hash)
    }

    /// Fetch, hard-reset to `origin/<branch>` and drop untracked files
    ///
    /// Never merges: the working copy ends up identical to the remote ref
    /// whatever local drift it had.
    pub async fn pull(
        &self,
        path: &Path,
        branch: &str,
        url: Option<&str>,
        token: Option<&str>,
    ) -> GitResult<String> {
        self.ensure_repository(path).await?;

        let slot = self.cache_slot(path, branch).await;
        let mut cached = slot.lock().await;

        self.fetch(path, branch, url, token).await?;
        let remote_ref = format!("origin/{}", branch);
        self.git(Some(path), &["reset", "--hard", &remote_ref], None)
            .await?;
        self.git(Some(path), &["clean", "-fd"], None).await?;

        let hash = self.git(Some(path), &["rev-parse", "HEAD"], None).await?;
        *cached = Some(CachedHash {
            hash: hash.clone(),
            fetched_at: Instant::now(),
        });

        info!(path = %path.display(), branch = %branch, commit = %hash, "Working copy reset to remote");
        Ok(hash)
    }

    /// True when the remote branch moved away from the local checkout
    pub async fn has_changes(
        &self,
        path: &Path,
        branch: &str,
        url: Option<&str>,
        token: Option<&str>,
    ) -> GitResult<bool> {
        let local = self.get_local_hash(path).await?;
        let remote = self.get_remote_hash(path, branch, url, token).await?;
        Ok(local != remote)
    }

    /// Fetch `branch` into `refs/remotes/origin/<branch>` with retries
    async fn fetch(
        &self,
        path: &Path,
        branch: &str,
        url: Option<&str>,
        token: Option<&str>,
    ) -> GitResult<()> {
        let remote = match (url, token) {
            (Some(url), Some(token)) if !token.is_empty() => authenticated_url(url, Some(token)),
            _ => "origin".to_string(),
        };
        let refspec = format!("+refs/heads/{0}:refs/remotes/origin/{0}", branch);

        self.fetch_retry
            .run("git fetch", |_| {
                let remote = remote.as_str();
                let refspec = refspec.as_str();
                async move {
                    self.git(Some(path), &["fetch", remote, refspec], token)
                        .await
                }
            })
            .await
            .map(|_| ())
            .map_err(|e| GitError::FetchFailed {
                attempts: self.fetch_retry.max_attempts(),
                last: e.to_string(),
            })
    }

    async fn remote_ref_hash(&self, path: &Path, branch: &str) -> GitResult<String> {
        let remote_ref = format!("refs/remotes/origin/{}", branch);
        self.git(Some(path), &["rev-parse", &remote_ref], None).await
    }

    async fn ensure_repository(&self, path: &Path) -> GitResult<()> {
        match tokio::fs::try_exists(path.join(".git")).await {
            Ok(true) => Ok(()),
            _ => Err(GitError::MissingRepository(path.to_path_buf())),
        }
    }

    /// Slot of (canonical path, branch); creating a slot evicts expired ones
    async fn cache_slot(&self, path: &Path, branch: &str) -> CacheSlot {
        let resolved = match tokio::fs::canonicalize(path).await {
            Ok(resolved) => resolved,
            Err(_) => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
        };
        let key = (resolved, branch.to_string());

        let mut cache = self
            .remote_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !cache.contains_key(&key) {
            let ttl = self.cache_ttl;
            cache.retain(|_, slot| !is_expired(slot, ttl));
        }
        cache.entry(key).or_default().clone()
    }

    #[cfg(test)]
    fn cached_slots(&self) -> usize {
        self.remote_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Run one git command and return its trimmed stdout
    async fn git(&self, dir: Option<&Path>, args: &[&str], token: Option<&str>) -> GitResult<String> {
        let mut spec = CommandSpec::new("git")
            .args(args.iter().copied())
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = dir {
            spec = spec.current_dir(dir);
        }
        if let Some(token) = token {
            spec = spec.secret(token);
        }

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| GitError::Execution(spec.redact(&e.to_string())))?;

        if !output.success() {
            return Err(GitError::CommandFailed {
                command: spec.display_line(),
                stderr: spec.redact(output.stderr.trim()),
            });
        }

        Ok(output.stdout.trim().to_string())
    }
}
