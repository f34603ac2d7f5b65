// shoutrrr-backed Notifier

use async_trait::async_trait;
use futures::future::join_all;
use shiparr_core::domain::{DeploymentEvent, DeploymentRecord, UnitId};
use shiparr_core::port::{CommandRunner, CommandSpec, ExecutionError, Notifier};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Upper bound for one `shoutrrr send` call
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Destinations per event kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationRoutes {
    pub success: Vec<String>,
    pub failure: Vec<String>,
}

impl NotificationRoutes {
    /// Same destinations for both events
    pub fn all(urls: Vec<String>) -> Self {
        Self {
            success: urls.clone(),
            failure: urls,
        }
    }

    /// Append a destination for one event, ignoring repeats
    pub fn add(&mut self, event: DeploymentEvent, url: impl Into<String>) {
        let url = url.into();
        let urls = match event {
            DeploymentEvent::Success => &mut self.success,
            DeploymentEvent::Failure => &mut self.failure,
        };
        if !urls.contains(&url) {
            urls.push(url);
        }
    }

    fn for_event(&self, event: DeploymentEvent) -> &[String] {
        match event {
            DeploymentEvent::Success => &self.success,
            DeploymentEvent::Failure => &self.failure,
        }
    }
}

/// Sends deployment outcomes through the `shoutrrr` CLI
///
/// A unit's own routes and the global routes are both used. Delivery
/// problems are logged and never reach the caller.
pub struct ShoutrrrNotifier {
    runner: Arc<dyn CommandRunner>,
    global: NotificationRoutes,
    per_unit: RwLock<HashMap<UnitId, NotificationRoutes>>,
}

impl ShoutrrrNotifier {
    pub fn new(runner: Arc<dyn CommandRunner>, global: NotificationRoutes) -> Self {
        Self {
            runner,
            global,
            per_unit: RwLock::new(HashMap::new()),
        }
    }

    /// Set (or with empty routes, clear) the routes of one unit
    pub fn set_unit_routes(&self, unit_id: UnitId, routes: NotificationRoutes) {
        let mut per_unit = self.per_unit.write().unwrap_or_else(PoisonError::into_inner);
        if routes == NotificationRoutes::default() {
            per_unit.remove(&unit_id);
        } else {
            per_unit.insert(unit_id, routes);
        }
    }

    /// Replace the routes of every unit; units missing from `routes` lose theirs
    pub fn replace_unit_routes(&self, routes: HashMap<UnitId, NotificationRoutes>) {
        let routes = routes
            .into_iter()
            .filter(|(_, r)| *r != NotificationRoutes::default())
            .collect();
        *self.per_unit.write().unwrap_or_else(PoisonError::into_inner) = routes;
    }

    /// Unit destinations first, then global ones, without duplicates
    pub fn destinations(&self, unit_id: UnitId, event: DeploymentEvent) -> Vec<String> {
        let per_unit = self.per_unit.read().unwrap_or_else(PoisonError::into_inner);
        let unit_urls = per_unit
            .get(&unit_id)
            .map(|routes| routes.for_event(event))
            .unwrap_or_default();

        let mut urls: Vec<String> = Vec::new();
        for url in unit_urls.iter().chain(self.global.for_event(event)) {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }

    pub fn format_message(event: DeploymentEvent, record: &DeploymentRecord) -> String {
        format!(
            "Shiparr {} - repo={} status={} duration={:.1}s deployment_id={}",
            event.as_str().to_uppercase(),
            record.unit_id,
            record.status,
            record.duration_secs(),
            record.id
        )
    }

    async fn send(&self, url: &str, message: &str) {
        let spec = CommandSpec::new("shoutrrr")
            .args(["send", "-u", url, "-m", message])
            // urls embed credentials (tokens, passwords)
            .secret(url)
            .timeout(SEND_TIMEOUT);

        match self.runner.run(&spec).await {
            Ok(out) if out.success() => debug!("Notification sent"),
            Ok(out) => error!(
                exit_code = ?out.exit_code,
                stderr = %spec.redact(out.stderr.trim()),
                "Shoutrrr failed"
            ),
            Err(ExecutionError::SpawnFailed(e)) => {
                warn!(error = %e, "Shoutrrr executable not found, notification dropped")
            }
            Err(e) => error!(error = %e, "Failed to send notification"),
        }
    }
}

#[async_trait]
impl Notifier for ShoutrrrNotifier {
    async fn notify(&self, event: DeploymentEvent, record: &DeploymentRecord) {
        let urls = self.destinations(record.unit_id, event);
        if urls.is_empty() {
            debug!(unit_id = record.unit_id, event = event.as_str(), "No notification routes");
            return;
        }

        let message = Self::format_message(event, record);
        info!(
            unit_id = record.unit_id,
            deployment_id = record.id,
            event = event.as_str(),
            url_count = urls.len(),
            "Sending notifications"
        );
        join_all(urls.iter().map(|url| self.send(url, &message))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiparr_core::domain::DeploymentStatus;
    use shiparr_core::port::command_runner::mocks::{MockCommandRunner, MockReply};

    fn record() -> DeploymentRecord {
        let mut record =
            DeploymentRecord::completed(7, "abc", DeploymentStatus::Success, "ok", 1_000);
        record.id = 42;
        record.finished_at = Some(3_500);
        record
    }

    fn sent_urls(runner: &MockCommandRunner) -> Vec<String> {
        let mut urls: Vec<String> = runner.calls().iter().map(|c| c.args[2].clone()).collect();
        urls.sort();
        urls
    }

    #[test]
    fn test_message_format() {
        assert_eq!(
            ShoutrrrNotifier::format_message(DeploymentEvent::Success, &record()),
            "Shiparr SUCCESS - repo=7 status=success duration=2.5s deployment_id=42"
        );
    }

    #[tokio::test]
    async fn test_unit_and_global_routes_are_both_used() {
        let runner = MockCommandRunner::new();
        let notifier = ShoutrrrNotifier::new(
            Arc::new(runner.clone()),
            NotificationRoutes {
                success: vec!["global-success://url".into()],
                failure: vec!["global-failure://url".into()],
            },
        );
        notifier.set_unit_routes(
            7,
            NotificationRoutes {
                success: vec!["repo-success://url".into(), "global-success://url".into()],
                failure: vec!["repo-failure://url".into()],
            },
        );

        notifier.notify(DeploymentEvent::Success, &record()).await;

        assert_eq!(
            sent_urls(&runner),
            vec!["global-success://url".to_string(), "repo-success://url".to_string()]
        );
        let call = &runner.calls()[0];
        assert_eq!(call.program, "shoutrrr");
        assert_eq!(call.args[0], "send");
        assert_eq!(call.args[3], "-m");
        assert!(call.args[4].starts_with("Shiparr SUCCESS"));
    }

    #[tokio::test]
    async fn test_global_routes_apply_to_units_without_their_own() {
        let runner = MockCommandRunner::new();
        let notifier = ShoutrrrNotifier::new(
            Arc::new(runner.clone()),
            NotificationRoutes::all(vec!["ntfy://topic".into()]),
        );

        notifier.notify(DeploymentEvent::Failure, &record()).await;
        assert_eq!(sent_urls(&runner), vec!["ntfy://topic".to_string()]);
    }

    #[tokio::test]
    async fn test_no_routes_sends_nothing_and_failures_are_swallowed() {
        let runner = MockCommandRunner::new();
        runner.on("shoutrrr", MockReply::spawn_error("not found"));
        let notifier =
            ShoutrrrNotifier::new(Arc::new(runner.clone()), NotificationRoutes::default());

        notifier.notify(DeploymentEvent::Failure, &record()).await;
        assert_eq!(runner.call_count(), 0);

        notifier.set_unit_routes(7, NotificationRoutes::all(vec!["slack://x".into()]));
        notifier.notify(DeploymentEvent::Failure, &record()).await;
        assert_eq!(runner.call_count(), 1);

        notifier.set_unit_routes(7, NotificationRoutes::default());
        assert!(notifier.destinations(7, DeploymentEvent::Failure).is_empty());
    }

    #[test]
    fn test_replace_unit_routes_drops_units_not_listed() {
        let notifier =
            ShoutrrrNotifier::new(Arc::new(MockCommandRunner::new()), NotificationRoutes::default());
        notifier.set_unit_routes(1, NotificationRoutes::all(vec!["slack://old".into()]));

        let mut routes = NotificationRoutes::default();
        routes.add(DeploymentEvent::Failure, "gotify://a");
        routes.add(DeploymentEvent::Failure, "gotify://a");
        notifier.replace_unit_routes(HashMap::from([(2, routes), (3, NotificationRoutes::default())]));

        assert!(notifier.destinations(1, DeploymentEvent::Failure).is_empty());
        assert_eq!(
            notifier.destinations(2, DeploymentEvent::Failure),
            vec!["gotify://a".to_string()]
        );
        assert!(notifier.destinations(2, DeploymentEvent::Success).is_empty());
    }
}
