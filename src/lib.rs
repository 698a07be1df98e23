//! drivemirror
//!
//! Recursively mirrors a tree of remote objects (files and folders) from a
//! source container to a destination container, rotating through a pool of
//! service-account credentials to spread the load across per-identity
//! quotas. Progress is persisted so interrupted jobs resume, and directory
//! listings are cached locally for fast recounts and incremental re-copies.
//!
//! # Architecture
//!
//! - [`remote`] - the provider seam: store trait, data model, error
//!   classifier, HTTP adapter
//! - [`auth`] - credentials, the file-based source, and the rotating pool
//! - [`transfer`] - the copy engine: rate gate, call envelope, walker,
//!   folder replicator, file copier, task coordinator
//! - [`store`] - durable tasks, copied marks, and the listing cache
//! - [`db`] - SQLite connectivity
//! - [`summary`] - per-extension roll-ups of walked subtrees

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]

pub mod auth;
pub mod config;
pub mod db;
pub mod remote;
pub mod store;
pub mod summary;
pub mod transfer;

// Re-export commonly used types
pub use auth::{Credential, CredentialPool, CredentialSource, FileCredentialSource, PoolError};
pub use config::Config;
pub use db::Database;
pub use remote::{
    ApiError, Drive, ErrorClass, FieldSelection, ListQuery, ObjectKind, RemoteObject, RemoteStore,
    classify, validate_object_id,
};
pub use store::{TaskRow, TaskStatus, TaskStore};
pub use transfer::{
    CopyOptions, CopyOutcome, CopyReport, FileCopier, FolderReplicator, RateGate, RemoteCaller,
    ResumeChoice, ResumePrompt, TaskCoordinator, TransferError, WalkOptions, Walker,
    collect_cached,
};
