// Lazy per-project lock registry

use crate::domain::ProjectId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// One async mutex per project, created on first use
///
/// The map guard is only held while looking up or inserting a handle; the
/// returned handle is then locked independently of every other project.
#[derive(Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<ProjectId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle of the project's lock (created lazily)
    pub fn lock_for(&self, project_id: ProjectId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(project_id).or_default().clone()
    }

    /// Wait for exclusive access to the project
    pub async fn acquire(&self, project_id: ProjectId) -> OwnedMutexGuard<()> {
        self.lock_for(project_id).lock_owned().await
    }

    /// Number of projects seen so far
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_same_project_shares_handle() {
        let locks = ProjectLocks::new();
        let a = locks.lock_for(1);
        let b = locks.lock_for(1);
        let c = locks.lock_for(2);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_projects_lock_independently() {
        let locks = ProjectLocks::new();
        let _held = locks.acquire(1).await;

        // other project is free
        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire(2)).await;
        assert!(other.is_ok());

        // same project blocks
        let same = tokio::time::timeout(Duration::from_millis(50), locks.acquire(1)).await;
        assert!(same.is_err());
    }
}
