//! Offline-first sync engine: staged pull, queued push, and status broadcasting.

mod orchestrator;
pub mod scheduler;
pub mod status;

pub use orchestrator::{PullReport, PushReport, SyncOrchestrator, SyncReport};
pub use scheduler::{run_with_concurrency, BatchReport};
pub use status::{OperationGuard, SyncProgress, SyncStage, SyncStatusHub, TOTAL_STAGES};
