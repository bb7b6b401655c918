//! Kernel module - job infrastructure and the seams to external systems.

pub mod deps;
pub mod directory;
pub mod jobs;
pub mod notifier;
pub mod provisioning;
pub mod test_dependencies;
pub mod traits;

pub use deps::{JobDeps, MailSettings};
pub use directory::PostgresDirectory;
pub use notifier::{LogNotifier, Notification, SendmailNotifier, Sender};
pub use provisioning::{DirectoryAccounts, DirectoryVhosts, SqlDatabases, SysadminMailingLists};
pub use test_dependencies::TestDependencies;
pub use traits::*;
