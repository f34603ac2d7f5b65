// Application Layer - Use Cases and Business Logic

pub mod deployer;
pub mod git_sync;
pub mod maintenance;
pub mod project_locks;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod work_queue;

// Re-exports
pub use deployer::{DeploymentEngine, EnginePorts, EngineSettings};
pub use git_sync::{GitError, GitSync};
pub use maintenance::MaintenanceScheduler;
pub use project_locks::ProjectLocks;
pub use recovery::RecoveryService;
pub use retry::RetryPolicy;
pub use scheduler::{DeployTrigger, Scheduler};
pub use work_queue::{
    shutdown_channel, DeploymentHandler, ShutdownSender, ShutdownToken, WorkQueue,
    WorkQueueConfig,
};
