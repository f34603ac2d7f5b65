// Notifier Port

use crate::domain::{DeploymentEvent, DeploymentRecord};
use async_trait::async_trait;

/// Best-effort delivery of deployment outcomes
///
/// Implementations swallow and log their own failures: a broken notification
/// channel must never fail a deployment.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: DeploymentEvent, record: &DeploymentRecord);
}

/// Notifier that drops every event
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: DeploymentEvent, _record: &DeploymentRecord) {}
}

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every notification it receives
    #[derive(Clone, Default)]
    pub struct RecordingNotifier {
        events: Arc<Mutex<Vec<(DeploymentEvent, DeploymentRecord)>>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<(DeploymentEvent, DeploymentRecord)> {
            self.events.lock().unwrap().clone()
        }

        pub fn kinds(&self) -> Vec<DeploymentEvent> {
            self.events.lock().unwrap().iter().map(|(e, _)| *e).collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: DeploymentEvent, record: &DeploymentRecord) {
            self.events.lock().unwrap().push((event, record.clone()));
        }
    }
}
