// Unit Repository Port

use crate::domain::{DeployableUnit, ProjectId, UnitId};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence of deployable units
///
/// Units are written by the configuration-sync collaborator; the deployment
/// engine only calls `update_last_commit_hash`.
#[async_trait]
pub trait UnitRepository: Send + Sync {
    /// Insert a new unit (the `id` field is ignored) and return its id
    async fn insert(&self, unit: &DeployableUnit) -> Result<UnitId>;

    /// Overwrite every column of an existing unit
    async fn update(&self, unit: &DeployableUnit) -> Result<()>;

    /// Delete a unit, returns false if it did not exist
    async fn delete(&self, id: UnitId) -> Result<bool>;

    async fn find_by_id(&self, id: UnitId) -> Result<Option<DeployableUnit>>;

    async fn find_by_name(&self, project_id: ProjectId, name: &str)
        -> Result<Option<DeployableUnit>>;

    async fn list_all(&self) -> Result<Vec<DeployableUnit>>;

    async fn list_by_project(&self, project_id: ProjectId) -> Result<Vec<DeployableUnit>>;

    /// Persist the last observed commit (`None` forces the next deploy to restart)
    async fn update_last_commit_hash(&self, id: UnitId, hash: Option<&str>) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    /// In-memory unit store
    #[derive(Clone, Default)]
    pub struct InMemoryUnitRepository {
        units: Arc<Mutex<BTreeMap<UnitId, DeployableUnit>>>,
    }

    impl InMemoryUnitRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// Store a unit under its own id (test setup helper)
        pub fn put(&self, unit: DeployableUnit) {
            self.units.lock().unwrap().insert(unit.id, unit);
        }

        pub fn get(&self, id: UnitId) -> Option<DeployableUnit> {
            self.units.lock().unwrap().get(&id).cloned()
        }
    }

    #[async_trait]
    impl UnitRepository for InMemoryUnitRepository {
        async fn insert(&self, unit: &DeployableUnit) -> Result<UnitId> {
            let mut units = self.units.lock().unwrap();
            let id = units.keys().next_back().copied().unwrap_or(0) + 1;
            let mut stored = unit.clone();
            stored.id = id;
            units.insert(id, stored);
            Ok(id)
        }

        async fn update(&self, unit: &DeployableUnit) -> Result<()> {
            let mut units = self.units.lock().unwrap();
            match units.get_mut(&unit.id) {
                Some(existing) => {
                    *existing = unit.clone();
                    Ok(())
                }
                None => Err(AppError::NotFound(format!("unit {}", unit.id))),
            }
        }

        async fn delete(&self, id: UnitId) -> Result<bool> {
            Ok(self.units.lock().unwrap().remove(&id).is_some())
        }

        async fn find_by_id(&self, id: UnitId) -> Result<Option<DeployableUnit>> {
            Ok(self.get(id))
        }

        async fn find_by_name(
            &self,
            project_id: ProjectId,
            name: &str,
        ) -> Result<Option<DeployableUnit>> {
            Ok(self
                .units
                .lock()
                .unwrap()
                .values()
                .find(|u| u.project_id == project_id && u.name == name)
                .cloned())
        }

        async fn list_all(&self) -> Result<Vec<DeployableUnit>> {
            Ok(self.units.lock().unwrap().values().cloned().collect())
        }

        async fn list_by_project(&self, project_id: ProjectId) -> Result<Vec<DeployableUnit>> {
            Ok(self
                .units
                .lock()
                .unwrap()
                .values()
                .filter(|u| u.project_id == project_id)
                .cloned()
                .collect())
        }

        async fn update_last_commit_hash(&self, id: UnitId, hash: Option<&str>) -> Result<()> {
            let mut units = self.units.lock().unwrap();
            let unit = units
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("unit {}", id)))?;
            unit.last_commit_hash = hash.map(str::to_string);
            Ok(())
        }
    }
}
