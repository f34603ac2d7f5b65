// Healthcheck gate

use super::DeployLog;
use crate::domain::HealthcheckSpec;
use crate::error::{AppError, Result};
use crate::port::HttpProbe;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Poll `spec.url` until it answers `spec.expected_status` or the timeout
/// elapses. The last probe happens at the deadline.
pub async fn wait_until_healthy(
    probe: &dyn HttpProbe,
    spec: &HealthcheckSpec,
    poll_interval: Duration,
    request_timeout: Duration,
    log: &mut DeployLog,
) -> Result<()> {
    log.push(format!(
        "Starting healthcheck on {} (timeout: {}s)",
        spec.url, spec.timeout_secs
    ));

    let deadline = Instant::now() + Duration::from_secs(spec.timeout_secs);
    loop {
        match probe.get_status(&spec.url, request_timeout).await {
            Ok(status) if status == spec.expected_status => {
                log.push(format!("Healthcheck passed: {} returned {}", spec.url, status));
                return Ok(());
            }
            Ok(status) => debug!(url = %spec.url, status = status, "Healthcheck not ready"),
            Err(e) => debug!(url = %spec.url, error = %e, "Healthcheck probe failed"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(AppError::HealthcheckTimeout(format!(
                "Healthcheck failed: {} did not return {} within {}s",
                spec.url, spec.expected_status, spec.timeout_secs
            )));
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::http_probe::mocks::MockHttpProbe;

    const POLL: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_passes_once_expected_status_appears() {
        let probe = MockHttpProbe::new(vec![Ok(502), Ok(503), Ok(200)]);
        let spec = HealthcheckSpec::new("http://localhost/health").with_timeout_secs(5);
        let mut log = DeployLog::default();

        wait_until_healthy(&probe, &spec, POLL, POLL, &mut log).await.unwrap();

        assert_eq!(probe.call_count(), 3);
        assert!(log.render().contains("Healthcheck passed: http://localhost/health returned 200"));
    }

    #[tokio::test]
    async fn test_custom_expected_status() {
        let probe = MockHttpProbe::always(204);
        let spec = HealthcheckSpec::new("http://localhost/health").with_expected_status(204);
        let mut log = DeployLog::default();

        tokio_test::assert_ok!(wait_until_healthy(&probe, &spec, POLL, POLL, &mut log).await);
    }

    #[tokio::test]
    async fn test_times_out() {
        let probe = MockHttpProbe::unreachable();
        let spec = HealthcheckSpec::new("http://localhost/health").with_timeout_secs(0);
        let mut log = DeployLog::default();

        let err = wait_until_healthy(&probe, &spec, POLL, POLL, &mut log)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::HealthcheckTimeout(_)));
        assert!(err.to_string().starts_with("Healthcheck failed"));
        assert_eq!(probe.call_count(), 1);
    }
}
