// Port Layer - Interfaces for external dependencies

pub mod command_runner;
pub mod deployment_repository;
pub mod http_probe;
pub mod notifier;
pub mod secret_decryptor;
pub mod time_provider;
pub mod unit_repository;

// Re-exports
pub use command_runner::{CommandOutput, CommandRunner, CommandSpec, ExecutionError};
pub use deployment_repository::DeploymentRepository;
pub use http_probe::{HttpProbe, ProbeError};
pub use notifier::{NoopNotifier, Notifier};
pub use secret_decryptor::SecretDecryptor;
pub use time_provider::TimeProvider;
pub use unit_repository::UnitRepository;
