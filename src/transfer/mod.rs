//! The parallel tree-copy engine.
//!
//! Pieces, leaves first: [`RateGate`] caps the aggregate request rate,
//! [`RemoteCaller`] wraps every remote call in the credential-checkout retry
//! envelope, [`Walker`] produces the source descendant set through the
//! listing cache, [`FolderReplicator`] rebuilds the folder tree level by
//! level, [`FileCopier`] fans the file copies out, and [`TaskCoordinator`]
//! owns the resume state machine that ties it all to a task row.
//!
//! Two orthogonal limits bound every worker fan-out: a semaphore of
//! `parallel_limit` permits around each remote call, and the process-wide
//! rate gate inside the envelope.

mod caller;
mod copier;
mod coordinator;
mod rate_gate;
mod replicator;
mod status;
mod walker;

pub use caller::RemoteCaller;
pub use copier::{CopyOutcome, FileCopier};
pub use coordinator::{CopyOptions, CopyReport, ResumeChoice, ResumePrompt, TaskCoordinator};
pub use rate_gate::RateGate;
pub use replicator::FolderReplicator;
pub use status::{Counter, StatusKind, spawn_status_line};
pub use walker::{WalkOptions, Walker, collect_cached};

use thiserror::Error;

use crate::auth::PoolError;
use crate::remote::ApiError;
use crate::store::StoreError;

/// Terminal errors surfaced by the transfer engine.
///
/// Rate-limit, backend, and timeout classes never appear here: the envelope
/// recovers them locally (rotating or retrying) until its budget runs out,
/// at which point callers see [`TransferError::Exhausted`].
#[derive(Debug, Error)]
pub enum TransferError {
    /// Every credential was discarded and the cold stack is drained.
    #[error("no usable credentials remain in the pool")]
    NoCredentials,

    /// The retry budget ran out without a terminal answer.
    #[error("retry budget exhausted for {op}")]
    Exhausted {
        /// The remote operation that kept failing.
        op: &'static str,
    },

    /// The governing cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// A resumable task row carries no root mapping to resume from.
    #[error("task {0} has no persisted root mapping")]
    MissingMapping(i64),

    /// A worker task died without reporting a result.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// Terminal remote error (not found, bad request, unknown).
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Task store failure outside the log-and-continue paths.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PoolError> for TransferError {
    fn from(_: PoolError) -> Self {
        Self::NoCredentials
    }
}
