// Deployment engine constants
use std::time::Duration;

/// Subdirectory name that marks the orchestrator's own unit
pub const SELF_UNIT_MARKER: &str = "Shiparr";

/// Compose bring-up attempts before the deployment fails
pub const BRING_UP_ATTEMPTS: u32 = 3;

/// Backoff between failed bring-up attempts (2s)
pub const BRING_UP_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Delay between two healthcheck probes (2s)
pub const HEALTHCHECK_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Timeout of a single healthcheck request (5s)
pub const HEALTHCHECK_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Plaintext env file written next to the compose file
pub const PLAINTEXT_ENV_FILE: &str = ".env";

pub const NO_CHANGES_LOG: &str = "No changes, services running";

pub const SELF_UPDATE_LOG: &str = "Self-update initiated - Container restarting...";
