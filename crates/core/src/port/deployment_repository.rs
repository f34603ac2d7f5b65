// Deployment Repository Port

use crate::domain::{DeploymentId, DeploymentRecord, DeploymentStatus, UnitId};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence of deployment records
///
/// Every call commits on its own; callers needing "record before act"
/// semantics issue the writes in the order they need them durable.
#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// Insert a record (the `id` field is ignored) and return its id
    async fn insert(&self, record: &DeploymentRecord) -> Result<DeploymentId>;

    /// Persist status, finish time, commit hash and logs of an existing record
    async fn update(&self, record: &DeploymentRecord) -> Result<()>;

    async fn find_by_id(&self, id: DeploymentId) -> Result<Option<DeploymentRecord>>;

    /// Most recent record of a unit (latest `started_at`, then highest id)
    async fn latest_for_unit(&self, unit_id: UnitId) -> Result<Option<DeploymentRecord>>;

    /// Records of a unit, newest first
    async fn history_for_unit(&self, unit_id: UnitId, limit: i64)
        -> Result<Vec<DeploymentRecord>>;

    async fn find_by_status(&self, status: DeploymentStatus) -> Result<Vec<DeploymentRecord>>;

    /// Delete finished records older than `cutoff_millis`, always keeping the
    /// latest record of each unit. Returns the number of deleted rows.
    async fn prune_finished_before(&self, cutoff_millis: i64) -> Result<u64>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::{Arc, Mutex};

    /// In-memory record store
    #[derive(Clone, Default)]
    pub struct InMemoryDeploymentRepository {
        records: Arc<Mutex<BTreeMap<DeploymentId, DeploymentRecord>>>,
        update_count: Arc<Mutex<usize>>,
        fail_updates: Arc<Mutex<bool>>,
    }

    impl InMemoryDeploymentRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn all(&self) -> Vec<DeploymentRecord> {
            self.records.lock().unwrap().values().cloned().collect()
        }

        pub fn update_count(&self) -> usize {
            *self.update_count.lock().unwrap()
        }

        /// Make every following `update` fail like a lost database
        pub fn fail_updates(&self, fail: bool) {
            *self.fail_updates.lock().unwrap() = fail;
        }

        fn latest(records: &BTreeMap<DeploymentId, DeploymentRecord>, unit_id: UnitId)
            -> Option<DeploymentRecord>
        {
            records
                .values()
                .filter(|r| r.unit_id == unit_id)
                .max_by_key(|r| (r.started_at, r.id))
                .cloned()
        }
    }

    #[async_trait]
    impl DeploymentRepository for InMemoryDeploymentRepository {
        async fn insert(&self, record: &DeploymentRecord) -> Result<DeploymentId> {
            let mut records = self.records.lock().unwrap();
            let id = records.keys().next_back().copied().unwrap_or(0) + 1;
            let mut stored = record.clone();
            stored.id = id;
            records.insert(id, stored);
            Ok(id)
        }

        async fn update(&self, record: &DeploymentRecord) -> Result<()> {
            *self.update_count.lock().unwrap() += 1;
            if *self.fail_updates.lock().unwrap() {
                return Err(AppError::Database("disk I/O error".to_string()));
            }
            let mut records = self.records.lock().unwrap();
            match records.get_mut(&record.id) {
                Some(existing) => {
                    *existing = record.clone();
                    Ok(())
                }
                None => Err(AppError::NotFound(format!("deployment {}", record.id))),
            }
        }

        async fn find_by_id(&self, id: DeploymentId) -> Result<Option<DeploymentRecord>> {
            Ok(self.records.lock().unwrap().get(&id).cloned())
        }

        async fn latest_for_unit(&self, unit_id: UnitId) -> Result<Option<DeploymentRecord>> {
            Ok(Self::latest(&self.records.lock().unwrap(), unit_id))
        }

        async fn history_for_unit(
            &self,
            unit_id: UnitId,
            limit: i64,
        ) -> Result<Vec<DeploymentRecord>> {
            let mut history: Vec<_> = self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.unit_id == unit_id)
                .cloned()
                .collect();
            history.sort_by_key(|r| std::cmp::Reverse((r.started_at, r.id)));
            history.truncate(limit.max(0) as usize);
            Ok(history)
        }

        async fn find_by_status(
            &self,
            status: DeploymentStatus,
        ) -> Result<Vec<DeploymentRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.status == status)
                .cloned()
                .collect())
        }

        async fn prune_finished_before(&self, cutoff_millis: i64) -> Result<u64> {
            let mut records = self.records.lock().unwrap();
            let units: HashSet<UnitId> = records.values().map(|r| r.unit_id).collect();
            let keep: HashSet<DeploymentId> = units
                .into_iter()
                .filter_map(|unit_id| Self::latest(&records, unit_id).map(|r| r.id))
                .collect();

            let before = records.len();
            records.retain(|id, r| {
                keep.contains(id)
                    || r.finished_at.map(|f| f >= cutoff_millis).unwrap_or(true)
            });
            Ok((before - records.len()) as u64)
        }
    }
}
