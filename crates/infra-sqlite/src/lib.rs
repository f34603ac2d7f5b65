// Shiparr Infrastructure - SQLite Adapter
// Implements: UnitRepository, DeploymentRepository, plus the delivery settings store

mod connection;
mod delivery_settings;
mod deployment_repository;
mod error;
mod migration;
mod unit_repository;

pub use connection::create_pool;
pub use delivery_settings::{SqliteDeliverySettings, UnitRoute};
pub use deployment_repository::SqliteDeploymentRepository;
pub use migration::run_migrations;
pub use unit_repository::SqliteUnitRepository;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
