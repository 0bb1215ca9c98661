//! Sync status and progress broadcasting.
//!
//! Subscribers get a `watch` receiver: the current value is visible right
//! away and dropping the receiver unsubscribes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

/// Number of pull stages reported as progress.
pub const TOTAL_STAGES: usize = 7;

const DEFAULT_CLEAR_DELAY: Duration = Duration::from_secs(3);

/// Stage of a sync run as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Company,
    Sales,
    Lots,
    Contacts,
    PrimaryPhotos,
    Documents,
    RemainingPhotos,
    Complete,
    Error,
    Offline,
}

impl SyncStage {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Company => "Company",
            Self::Sales => "Active sales",
            Self::Lots => "Lots",
            Self::Contacts => "Contacts",
            Self::PrimaryPhotos => "Primary photos",
            Self::Documents => "Documents",
            Self::RemainingPhotos => "Remaining photos",
            Self::Complete => "Complete",
            Self::Error => "Error",
            Self::Offline => "No internet connection",
        }
    }

    /// One-based position among the pull stages; zero for failures.
    #[must_use]
    pub const fn step(self) -> usize {
        match self {
            Self::Company => 1,
            Self::Sales => 2,
            Self::Lots => 3,
            Self::Contacts => 4,
            Self::PrimaryPhotos => 5,
            Self::Documents => 6,
            Self::RemainingPhotos | Self::Complete => TOTAL_STAGES,
            Self::Error | Self::Offline => 0,
        }
    }

    /// Terminal stages are cleared automatically after a delay.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Offline)
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Progress snapshot published while a pull runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub stage: SyncStage,
    pub current: usize,
    pub total: usize,
    /// Failure detail for `Error` stages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SyncProgress {
    #[must_use]
    pub const fn new(stage: SyncStage) -> Self {
        Self {
            stage,
            current: stage.step(),
            total: TOTAL_STAGES,
            message: None,
        }
    }
}

struct HubInner {
    active_operations: Mutex<usize>,
    status_tx: watch::Sender<bool>,
    progress_tx: watch::Sender<Option<SyncProgress>>,
    generation: AtomicU64,
    clear_delay: Duration,
}

/// Reference-counted "is syncing" flag plus the latest progress.
#[derive(Clone)]
pub struct SyncStatusHub {
    inner: Arc<HubInner>,
}

impl fmt::Debug for SyncStatusHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncStatusHub")
            .field("syncing", &self.is_syncing())
            .field("progress", &self.current_progress())
            .finish_non_exhaustive()
    }
}

impl Default for SyncStatusHub {
    fn default() -> Self {
        Self::new(DEFAULT_CLEAR_DELAY)
    }
}

impl SyncStatusHub {
    /// Create a hub whose terminal stages clear after `clear_delay`.
    #[must_use]
    pub fn new(clear_delay: Duration) -> Self {
        let (status_tx, _) = watch::channel(false);
        let (progress_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(HubInner {
                active_operations: Mutex::new(0),
                status_tx,
                progress_tx,
                generation: AtomicU64::new(0),
                clear_delay,
            }),
        }
    }

    /// Register a running operation; the flag turns on for the first one.
    pub fn start_operation(&self) {
        let mut active = self
            .inner
            .active_operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *active += 1;
        if *active == 1 {
            self.inner.status_tx.send_replace(true);
        }
    }

    /// Unregister an operation; the flag turns off when none remain.
    pub fn end_operation(&self) {
        let mut active = self
            .inner
            .active_operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *active == 0 {
            tracing::warn!("end_operation called without a matching start_operation");
            return;
        }
        *active -= 1;
        if *active == 0 {
            self.inner.status_tx.send_replace(false);
        }
    }

    /// Start an operation that ends when the guard is dropped.
    #[must_use = "the operation ends as soon as the guard is dropped"]
    pub fn operation(&self) -> OperationGuard {
        self.start_operation();
        OperationGuard { hub: self.clone() }
    }

    pub fn is_syncing(&self) -> bool {
        *self.inner.status_tx.borrow()
    }

    pub fn current_progress(&self) -> Option<SyncProgress> {
        self.inner.progress_tx.borrow().clone()
    }

    pub fn on_status_change(&self) -> watch::Receiver<bool> {
        self.inner.status_tx.subscribe()
    }

    pub fn on_progress_change(&self) -> watch::Receiver<Option<SyncProgress>> {
        self.inner.progress_tx.subscribe()
    }

    pub fn report_stage(&self, stage: SyncStage) {
        self.publish(SyncProgress::new(stage));
    }

    pub fn report_error(&self, message: impl Into<String>) {
        let mut progress = SyncProgress::new(SyncStage::Error);
        progress.message = Some(message.into());
        self.publish(progress);
    }

    pub fn clear_progress(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.progress_tx.send_replace(None);
    }

    fn publish(&self, progress: SyncProgress) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let terminal = progress.stage.is_terminal();
        tracing::debug!(stage = %progress.stage, current = progress.current, "Sync progress");
        self.inner.progress_tx.send_replace(Some(progress));

        if terminal {
            self.schedule_clear(generation);
        }
    }

    fn schedule_clear(&self, generation: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            tokio::time::sleep(inner.clear_delay).await;
            // A newer stage supersedes the pending clear.
            if inner.generation.load(Ordering::SeqCst) == generation {
                inner.progress_tx.send_replace(None);
            }
        });
    }
}

/// Ends its operation on drop.
#[derive(Debug)]
pub struct OperationGuard {
    hub: SyncStatusHub,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.hub.end_operation();
    }
}
