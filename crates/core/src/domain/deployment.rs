// Deployment Record Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::unit::UnitId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Deployment record identifier (database row id)
pub type DeploymentId = i64;

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeploymentStatus::Pending)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

/// Event kinds sent to the notification collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentEvent {
    Success,
    Failure,
}

impl DeploymentEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentEvent::Success => "success",
            DeploymentEvent::Failure => "failure",
        }
    }
}

impl std::fmt::Display for DeploymentEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt to reconcile a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// 0 until persisted
    pub id: DeploymentId,
    pub unit_id: UnitId,
    pub commit_hash: String,
    pub status: DeploymentStatus,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub logs: Option<String>,
}

impl DeploymentRecord {
    /// Start a new pending attempt
    pub fn start(unit_id: UnitId, commit_hash: impl Into<String>, now_millis: i64) -> Self {
        Self {
            id: 0,
            unit_id,
            commit_hash: commit_hash.into(),
            status: DeploymentStatus::Pending,
            started_at: now_millis,
            finished_at: None,
            logs: None,
        }
    }

    /// Create a record that is already terminal (record-before-act)
    pub fn completed(
        unit_id: UnitId,
        commit_hash: impl Into<String>,
        status: DeploymentStatus,
        logs: impl Into<String>,
        now_millis: i64,
    ) -> Self {
        Self {
            id: 0,
            unit_id,
            commit_hash: commit_hash.into(),
            status,
            started_at: now_millis,
            finished_at: Some(now_millis),
            logs: Some(logs.into()),
        }
    }

    /// Transition to Success with explicit timestamp
    pub fn succeed(&mut self, logs: impl Into<String>, now_millis: i64) -> Result<()> {
        self.finish(DeploymentStatus::Success, logs.into(), now_millis)
    }

    /// Transition to Failed with explicit timestamp
    pub fn fail(&mut self, logs: impl Into<String>, now_millis: i64) -> Result<()> {
        self.finish(DeploymentStatus::Failed, logs.into(), now_millis)
    }

    fn finish(&mut self, status: DeploymentStatus, logs: String, now_millis: i64) -> Result<()> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.logs = Some(logs);
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Wall-clock duration in seconds (0.0 while pending)
    pub fn duration_secs(&self) -> f64 {
        self.finished_at
            .map(|end| (end - self.started_at).max(0) as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_leaves_pending_exactly_once() {
        let mut record = DeploymentRecord::start(7, "abc", 1_000);
        assert_eq!(record.status, DeploymentStatus::Pending);

        record.succeed("ok", 3_500).unwrap();
        assert_eq!(record.status, DeploymentStatus::Success);
        assert_eq!(record.finished_at, Some(3_500));
        assert_eq!(record.duration_secs(), 2.5);

        let err = record.fail("late failure", 4_000).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(record.status, DeploymentStatus::Success);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            DeploymentStatus::Pending,
            DeploymentStatus::Success,
            DeploymentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DeploymentStatus>().unwrap(), status);
        }
        assert!("running".parse::<DeploymentStatus>().is_err());
    }

    #[test]
    fn test_completed_record_is_terminal() {
        let record = DeploymentRecord::completed(
            1,
            "def",
            DeploymentStatus::Success,
            "Self-update initiated",
            10,
        );
        assert!(record.status.is_terminal());
        assert_eq!(record.finished_at, Some(10));
    }
}
