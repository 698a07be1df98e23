//! Live progress counters and the periodic status line.
//!
//! The counters are advisory: the walker and copier tick them for display,
//! but phase termination is always decided by task-set drainage, never by a
//! counter reaching zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use indicatif::ProgressBar;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Refresh period of the status line.
const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Shared atomic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicI64);

impl Counter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, value: i64) {
        self.0.fetch_add(value, Ordering::SeqCst);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn dec(&self) {
        self.add(-1);
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::SeqCst);
    }

    #[must_use]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Which phase the status line is narrating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Walk,
    CreateFolders,
    CopyFiles,
}

impl StatusKind {
    fn message(self, done: i64, pending: i64) -> String {
        match self {
            Self::Walk => format!("Read {done} | Pending {pending}"),
            Self::CreateFolders => format!("Folders Created {done} | Folders Pending {pending}"),
            Self::CopyFiles => format!("Files Copied: {done} | Files Pending: {pending}"),
        }
    }
}

/// Spawns the 500 ms ticker that renders `done`/`pending` until `cancel`
/// fires, then prints one final line and exits.
pub fn spawn_status_line(
    cancel: CancellationToken,
    done: Arc<Counter>,
    pending: Arc<Counter>,
    kind: StatusKind,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new_spinner();
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    pending.set(0);
                    bar.finish_with_message(kind.message(done.get(), pending.get()));
                    return;
                }
                _ = ticker.tick() => {
                    bar.set_message(kind.message(done.get(), pending.get()));
                    bar.tick();
                }
            }
        }
    })
}
