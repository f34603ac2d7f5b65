// Shiparr Infrastructure - System Adapters
// Implements: CommandRunner, HttpProbe, SecretDecryptor, Notifier

pub mod command_runner;
pub mod http_probe;
pub mod shoutrrr;
pub mod sops;

pub use command_runner::TokioCommandRunner;
pub use http_probe::ReqwestHttpProbe;
pub use shoutrrr::{NotificationRoutes, ShoutrrrNotifier};
pub use sops::SopsDecryptor;
