pub mod consistency;
pub mod loader;
pub mod monitor;
pub mod phase;
pub mod recovery;
pub mod snapshot_store;
pub mod status;

pub use consistency::{MergeOutcome, MergeStrategy};
pub use loader::{LoaderSettings, ProgressiveLoader};
pub use monitor::{ActivityTracker, BackgroundHealthMonitor, MonitorOptions, MonitorSettings};
pub use phase::PhaseStateMachine;
pub use recovery::{ErrorRecoveryEngine, RecoverySettings, RetryPolicy};
pub use snapshot_store::{MemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};
pub use status::{ServiceStatusRegistry, StatusSettings};
