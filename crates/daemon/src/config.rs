// Daemon configuration from environment variables

use anyhow::{bail, Result};
use shiparr_core::application::deployer::constants::SELF_UNIT_MARKER;
use shiparr_core::application::maintenance::DEFAULT_RETENTION_DAYS;
use shiparr_core::application::work_queue::{
    DEFAULT_DEPENDENCY_RETRY_DELAY, DEFAULT_MAX_CONCURRENT,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "~/.shiparr/shiparr.db";
pub const DEFAULT_UNIT_REFRESH: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub max_concurrent: usize,
    pub dependency_retry: Duration,
    pub prune_images: bool,
    pub github_token: Option<String>,
    pub self_marker: String,
    pub unit_refresh: Duration,
    /// Notification destinations applied to every unit
    pub notify_urls: Vec<String>,
    pub retention_days: u32,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = get("SHIPARR_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_path = PathBuf::from(shellexpand::tilde(&db_path).into_owned());

        let max_concurrent: usize =
            parse_or(&get, "SHIPARR_MAX_CONCURRENT", DEFAULT_MAX_CONCURRENT)?;
        if max_concurrent == 0 {
            bail!("SHIPARR_MAX_CONCURRENT must be at least 1");
        }

        Ok(Self {
            db_path,
            max_concurrent,
            dependency_retry: Duration::from_secs(parse_or(
                &get,
                "SHIPARR_DEPENDENCY_RETRY_SECS",
                DEFAULT_DEPENDENCY_RETRY_DELAY.as_secs(),
            )?),
            prune_images: parse_bool(&get, "SHIPARR_ENABLE_IMAGE_PRUNE")?,
            github_token: get("SHIPARR_GITHUB_TOKEN"),
            self_marker: get("SHIPARR_SELF_MARKER")
                .unwrap_or_else(|| SELF_UNIT_MARKER.to_string()),
            unit_refresh: Duration::from_secs(
                parse_or(&get, "SHIPARR_UNIT_REFRESH_SECS", DEFAULT_UNIT_REFRESH.as_secs())?
                    .max(1),
            ),
            notify_urls: get("SHIPARR_NOTIFY_URLS")
                .map(|urls| {
                    urls.split(',')
                        .map(str::trim)
                        .filter(|u| !u.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            retention_days: parse_or(
                &get,
                "SHIPARR_HISTORY_RETENTION_DAYS",
                DEFAULT_RETENTION_DAYS,
            )?,
        })
    }

    /// sqlx connection URL of the database file
    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Ok(value),
            Err(e) => bail!("Invalid {}={:?}: {}", key, raw, e),
        },
    }
}

fn parse_bool<G>(get: &G, key: &str) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("Invalid {}={:?}: expected true or false", key, v),
        },
    }
}
