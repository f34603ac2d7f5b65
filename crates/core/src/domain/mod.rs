// Domain Layer - Pure business logic and entities

pub mod deployment;
pub mod error;
pub mod unit;

// Re-exports
pub use deployment::{DeploymentEvent, DeploymentId, DeploymentRecord, DeploymentStatus};
pub use error::DomainError;
pub use unit::{DeployableUnit, HealthcheckSpec, ProjectId, UnitId, COMPOSE_PROJECT_PREFIX};
